//! # confpit
//!
//! Merges many independently watched configuration sources into one view
//! and republishes it whenever any source changes.
//!
//! Precedence, lowest first: the optional base mapping, then each source in
//! the order given, then the process environment.
//!
//! ```no_run
//! # async fn demo() -> confpit::Result<()> {
//! let mut streams = confpit::new_from_paths_and_glob(&["/etc/myapp/conf.d"], "*.yaml")?;
//! while let Some(view) = streams.views.recv().await {
//!     println!("generation {}: port = {:?}", view.generation, view.get_i64("server.port"));
//! }
//! # Ok(())
//! # }
//! ```

pub mod merge;
pub mod options;
pub mod pit;
mod remote;
pub mod view;

use std::path::Path;
use std::sync::Arc;

pub use confpit_core::{ChangeHandler, EnvOverlay, PitError, Result, Settings, Source, WatchGuard};
pub use confpit_source::{FetchSource, FileSource, MemorySource, SourceSet};
pub use options::{PitOptions, RemoteSchedule};
pub use pit::{Pit, PitBuilder, PitHandle, PitReceiver, PitStreams, SourceState};
pub use view::MergedView;
pub use tokio_util::sync::CancellationToken;

/// Watch `name.<ext>` in each of `paths`.
pub fn new_from_paths_and_name<P: AsRef<Path>>(paths: &[P], name: &str) -> Result<PitStreams> {
    PitBuilder::new(SourceSet::paths_and_name(paths, name)).spawn()
}

/// Watch `config.<ext>` in each of `paths`.
pub fn new_from_paths<P: AsRef<Path>>(paths: &[P]) -> Result<PitStreams> {
    PitBuilder::new(SourceSet::paths(paths)).spawn()
}

/// Watch every file matching `pattern` in each of `paths`.
pub fn new_from_paths_and_glob<P: AsRef<Path>>(paths: &[P], pattern: &str) -> Result<PitStreams> {
    PitBuilder::new(SourceSet::paths_and_glob(paths, pattern)).spawn()
}

/// Watch an explicit, ordered list of sources.
pub fn new(sources: Vec<Arc<dyn Source>>) -> Result<PitStreams> {
    PitBuilder::new(SourceSet::from(sources)).spawn()
}
