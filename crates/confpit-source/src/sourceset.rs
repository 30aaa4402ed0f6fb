//! Resolves search paths into the ordered source list the aggregator merges.
//!
//! The order sources are added in is the merge precedence: later sources
//! override earlier ones.

use globset::{Glob, GlobMatcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use confpit_core::{PitError, Source};

use crate::file::FileSource;

/// File name (without extension) looked up when none is given.
pub const DEFAULT_NAME: &str = "config";

/// An ordered collection of sources under construction.
#[derive(Default)]
pub struct SourceSet {
    sources: Vec<Arc<dyn Source>>,
}

impl SourceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// One source per path, each looking for `name.<ext>`.
    pub fn paths_and_name<P: AsRef<Path>>(paths: &[P], name: &str) -> Self {
        let mut set = Self::new();
        for path in paths {
            set = set.push(FileSource::discover(path.as_ref(), name));
        }
        set
    }

    /// One source per path, each looking for `config.<ext>`.
    pub fn paths<P: AsRef<Path>>(paths: &[P]) -> Self {
        Self::paths_and_name(paths, DEFAULT_NAME)
    }

    /// One source per file matching `pattern` in each path, in path order
    /// and then lexical file name order.
    ///
    /// A path that is missing or has no matches contributes nothing. A
    /// malformed pattern is not fatal either: it is logged and that path
    /// contributes nothing, so deployments where some search paths are
    /// legitimately absent still come up.
    pub fn paths_and_glob<P: AsRef<Path>>(paths: &[P], pattern: &str) -> Self {
        let mut set = Self::new();
        for path in paths {
            let path = path.as_ref();
            match expand_glob(path, pattern) {
                Ok(matches) => {
                    debug!(path = %path.display(), pattern, count = matches.len(), "expanded config glob");
                    for file in matches {
                        set = set.push(FileSource::at(file));
                    }
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping search path");
                }
            }
        }
        set
    }

    /// Append any source, file-backed or not.
    pub fn push(mut self, source: impl Source + 'static) -> Self {
        self.sources.push(Arc::new(source));
        self
    }

    pub fn push_shared(mut self, source: Arc<dyn Source>) -> Self {
        self.sources.push(source);
        self
    }

    pub fn extend(mut self, other: SourceSet) -> Self {
        self.sources.extend(other.sources);
        self
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    pub fn into_sources(self) -> Vec<Arc<dyn Source>> {
        self.sources
    }
}

impl From<Vec<Arc<dyn Source>>> for SourceSet {
    fn from(sources: Vec<Arc<dyn Source>>) -> Self {
        Self { sources }
    }
}

fn compile(pattern: &str) -> Result<GlobMatcher, PitError> {
    Glob::new(pattern)
        .map(|glob| glob.compile_matcher())
        .map_err(|e| PitError::GlobExpansion {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })
}

/// Files directly inside `dir` whose name matches `pattern`, sorted.
fn expand_glob(dir: &Path, pattern: &str) -> Result<Vec<PathBuf>, PitError> {
    let matcher = compile(pattern)?;
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut matches: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| {
            path.file_name()
                .is_some_and(|name| matcher.is_match(Path::new(name)))
        })
        .collect();
    matches.sort();
    Ok(matches)
}
