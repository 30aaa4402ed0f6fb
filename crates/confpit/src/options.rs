use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use confpit_core::{EnvOverlay, PitError, Result};
use confpit_source::DEFAULT_NAME;

/// How remote sources are polled once remote watching is on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteSchedule {
    /// Poll once, after one interval.
    #[default]
    Once,
    /// Poll every interval until cancelled.
    Periodic,
}

/// Tuning for the aggregator itself. Can be embedded in a host's own
/// config file or loaded from a standalone TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PitOptions {
    /// Register a filesystem watcher for every loaded file source.
    pub watch_files: bool,
    /// Poll remote sources for changes.
    pub watch_remote: bool,
    pub remote_schedule: RemoteSchedule,
    /// Delay before the first remote poll, and the period between polls.
    pub remote_interval_secs: u64,
    /// File events closer together than this collapse into one reload.
    pub debounce_ms: u64,
    /// Prefix for environment overlay variables (`APP` → `APP_SERVER_PORT`).
    pub env_prefix: Option<String>,
    /// Keys read from the environment even when no source defines them.
    pub env_bindings: Vec<String>,
    /// File name used by the paths-only constructor.
    pub default_name: String,
}

impl Default for PitOptions {
    fn default() -> Self {
        Self {
            watch_files: true,
            watch_remote: false,
            remote_schedule: RemoteSchedule::Once,
            remote_interval_secs: 5,
            debounce_ms: 50,
            env_prefix: None,
            env_bindings: Vec::new(),
            default_name: DEFAULT_NAME.to_string(),
        }
    }
}

impl PitOptions {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let options: Self = toml::from_str(raw)
            .map_err(|e| PitError::Config(format!("failed to parse options: {e}")))?;
        options.validate()?;
        Ok(options)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
            .map_err(|e| PitError::Config(format!("{}: {e}", path.display())))
    }

    pub fn validate(&self) -> Result<()> {
        if self.watch_remote && self.remote_interval_secs == 0 {
            return Err(PitError::Config(
                "remote_interval_secs must be positive when watch_remote is enabled".into(),
            ));
        }
        if self.default_name.trim().is_empty() {
            return Err(PitError::Config("default_name must not be empty".into()));
        }
        Ok(())
    }

    pub fn remote_interval(&self) -> Duration {
        Duration::from_secs(self.remote_interval_secs)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// The process-environment overlay these options describe.
    pub fn env_overlay(&self) -> EnvOverlay {
        let mut overlay = EnvOverlay::process();
        if let Some(prefix) = &self.env_prefix {
            overlay = overlay.with_prefix(prefix.clone());
        }
        for key in &self.env_bindings {
            overlay = overlay.bind(key.clone());
        }
        overlay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = PitOptions::default();
        assert!(options.watch_files);
        assert!(!options.watch_remote);
        assert_eq!(options.remote_schedule, RemoteSchedule::Once);
        assert_eq!(options.remote_interval(), Duration::from_secs(5));
        assert_eq!(options.debounce(), Duration::from_millis(50));
        assert_eq!(options.default_name, "config");
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_applies_defaults() {
        let options = PitOptions::from_toml_str(
            r#"
watch_remote = true
remote_schedule = "periodic"
env_prefix = "app"
"#,
        )
        .unwrap();
        assert!(options.watch_remote);
        assert_eq!(options.remote_schedule, RemoteSchedule::Periodic);
        assert_eq!(options.env_prefix.as_deref(), Some("app"));
        assert_eq!(options.remote_interval_secs, 5);
        assert!(options.watch_files);
    }

    #[test]
    fn test_zero_interval_rejected_with_remote_watch() {
        let err = PitOptions::from_toml_str("watch_remote = true\nremote_interval_secs = 0\n")
            .unwrap_err();
        assert!(matches!(err, PitError::Config(_)));
        // Irrelevant while remote watching is off.
        assert!(PitOptions::from_toml_str("remote_interval_secs = 0\n").is_ok());
    }

    #[test]
    fn test_empty_default_name_rejected() {
        assert!(PitOptions::from_toml_str("default_name = \"  \"\n").is_err());
    }

    #[test]
    fn test_unknown_schedule_is_parse_error() {
        assert!(PitOptions::from_toml_str("remote_schedule = \"hourly\"\n").is_err());
    }

    #[test]
    fn test_env_overlay_uses_prefix() {
        let options = PitOptions {
            env_prefix: Some("svc".into()),
            ..PitOptions::default()
        };
        assert_eq!(options.env_overlay().var_name("db.url"), "SVC_DB_URL");
    }
}
