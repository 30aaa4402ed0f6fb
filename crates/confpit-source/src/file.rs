use parking_lot::RwLock;
use serde_json::Value;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use confpit_core::{ChangeHandler, PitError, Result, Settings, Source, WatchGuard, normalize_keys};

use crate::watcher;

/// Extensions tried, in order, when a file is looked up by name.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["json", "toml", "yaml", "yml"];

/// On-disk format of a config file, chosen by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Json,
    Toml,
    Yaml,
}

impl Format {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "json" => Some(Self::Json),
            "toml" => Some(Self::Toml),
            "yaml" | "yml" => Some(Self::Yaml),
            _ => None,
        }
    }

    /// Parse a document into settings. An empty document is an empty mapping;
    /// any other non-mapping root is rejected.
    pub fn parse(self, raw: &str) -> std::result::Result<Settings, String> {
        if raw.trim().is_empty() {
            return Ok(Settings::new());
        }
        let value: Value = match self {
            Self::Json => serde_json::from_str(raw).map_err(|e| e.to_string())?,
            Self::Toml => toml::from_str(raw).map_err(|e| e.to_string())?,
            Self::Yaml => serde_yaml::from_str(raw).map_err(|e| e.to_string())?,
        };
        match value {
            Value::Object(map) => Ok(normalize_keys(map)),
            Value::Null => Ok(Settings::new()),
            other => Err(format!("document root must be a mapping, found {other}")),
        }
    }
}

#[derive(Debug)]
enum Location {
    /// A known file.
    Exact(PathBuf),
    /// `name.<ext>` inside `dir`, for any supported extension.
    Search { dir: PathBuf, name: String },
}

/// A config file on disk.
pub struct FileSource {
    location: Location,
    resolved: RwLock<Option<PathBuf>>,
}

impl FileSource {
    /// A specific file, such as a glob match.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            location: Location::Exact(path.into()),
            resolved: RwLock::new(None),
        }
    }

    /// The first `name.<ext>` found in `dir`, trying [`SUPPORTED_EXTENSIONS`] in order.
    pub fn discover(dir: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            location: Location::Search {
                dir: dir.into(),
                name: name.into(),
            },
            resolved: RwLock::new(None),
        }
    }

    /// The file the last successful lookup settled on.
    pub fn resolved_path(&self) -> Option<PathBuf> {
        self.resolved.read().clone()
    }

    fn resolve(&self) -> Option<PathBuf> {
        match &self.location {
            Location::Exact(path) => Some(path.clone()),
            Location::Search { dir, name } => SUPPORTED_EXTENSIONS
                .iter()
                .map(|ext| dir.join(format!("{name}.{ext}")))
                .find(|candidate| candidate.is_file()),
        }
    }

    fn not_found(&self) -> PitError {
        PitError::SourceNotFound { name: self.name() }
    }
}

impl Source for FileSource {
    fn name(&self) -> String {
        match &self.location {
            Location::Exact(path) => path.display().to_string(),
            Location::Search { dir, name } => dir.join(name).display().to_string(),
        }
    }

    fn load(&self) -> Result<Settings> {
        let path = self.resolve().ok_or_else(|| self.not_found())?;
        let format = Format::from_path(&path).ok_or_else(|| {
            PitError::source_load(path.display().to_string(), "unsupported file extension")
        })?;

        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(self.not_found()),
            Err(e) => return Err(PitError::source_load(path.display().to_string(), e)),
        };
        let settings = format
            .parse(&raw)
            .map_err(|reason| PitError::source_load(path.display().to_string(), reason))?;

        debug!(path = %path.display(), keys = settings.len(), "loaded config file");
        *self.resolved.write() = Some(path);
        Ok(settings)
    }

    fn watch(
        &self,
        handler: Arc<dyn ChangeHandler>,
        debounce: Duration,
    ) -> Result<Option<Box<dyn WatchGuard>>> {
        let Some(path) = self.resolved_path().or_else(|| self.resolve()) else {
            return Ok(None);
        };
        let guard = watcher::watch_file(&path, handler, debounce).map_err(|reason| {
            PitError::Watch {
                name: self.name(),
                reason,
            }
        })?;
        Ok(Some(Box::new(guard)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_format_from_extension() {
        assert_eq!(Format::from_path(Path::new("a/b.yaml")), Some(Format::Yaml));
        assert_eq!(Format::from_path(Path::new("a/b.YML")), Some(Format::Yaml));
        assert_eq!(Format::from_path(Path::new("b.toml")), Some(Format::Toml));
        assert_eq!(Format::from_path(Path::new("b.json")), Some(Format::Json));
        assert_eq!(Format::from_path(Path::new("b.ini")), None);
        assert_eq!(Format::from_path(Path::new("noext")), None);
    }

    #[test]
    fn test_parse_each_format() {
        let yaml = Format::Yaml.parse("Val-0: 1\nnested:\n  Key: x\n").unwrap();
        assert_eq!(Value::Object(yaml), json!({"val-0": 1, "nested": {"key": "x"}}));

        let toml = Format::Toml.parse("[server]\nport = 80\n").unwrap();
        assert_eq!(Value::Object(toml), json!({"server": {"port": 80}}));

        let json = Format::Json.parse(r#"{"A": [1, 2]}"#).unwrap();
        assert_eq!(Value::Object(json), json!({"a": [1, 2]}));
    }

    #[test]
    fn test_parse_empty_document() {
        assert!(Format::Yaml.parse("").unwrap().is_empty());
        assert!(Format::Json.parse("  \n").unwrap().is_empty());
        assert!(Format::Yaml.parse("~\n").unwrap().is_empty());
    }

    #[test]
    fn test_parse_rejects_scalar_root() {
        assert!(Format::Yaml.parse("- a\n- b\n").is_err());
        assert!(Format::Json.parse("42").is_err());
        assert!(Format::Json.parse("{not json").is_err());
    }

    #[test]
    fn test_exact_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let source = FileSource::at(dir.path().join("gone.yaml"));
        assert!(source.load().unwrap_err().is_not_found());
    }

    #[test]
    fn test_discover_prefers_extension_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.yaml"), "from: yaml\n").unwrap();
        std::fs::write(dir.path().join("config.json"), r#"{"from": "json"}"#).unwrap();

        let source = FileSource::discover(dir.path(), "config");
        let settings = source.load().unwrap();
        assert_eq!(settings["from"], json!("json"));
        assert_eq!(source.resolved_path(), Some(dir.path().join("config.json")));
    }

    #[test]
    fn test_discover_without_match_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("other.yaml"), "a: 1\n").unwrap();
        let source = FileSource::discover(dir.path(), "config");
        assert!(source.load().unwrap_err().is_not_found());
        assert_eq!(source.resolved_path(), None);
    }

    #[test]
    fn test_unsupported_extension_is_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.ini");
        std::fs::write(&path, "a=1").unwrap();
        let err = FileSource::at(&path).load().unwrap_err();
        assert!(matches!(err, PitError::SourceLoad { .. }));
    }

    #[test]
    fn test_malformed_file_is_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.yaml");
        std::fs::write(&path, "a: [1, 2\n").unwrap();
        let err = FileSource::at(&path).load().unwrap_err();
        assert!(matches!(err, PitError::SourceLoad { .. }));
        assert!(!err.is_not_found());
    }
}
