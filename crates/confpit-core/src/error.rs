use thiserror::Error;

/// Unified error type for every confpit crate.
///
/// Everything that reaches the caller's error stream is one of these. The
/// variants mirror how far a failure reaches: a missing source is not an
/// error at all for the aggregation, a load failure is fatal for one source,
/// a merge failure is fatal for one pass.
#[derive(Error, Debug)]
pub enum PitError {
    // ── Source errors ──────────────────────────────────────────
    #[error("config source not found: {name}")]
    SourceNotFound { name: String },

    #[error("failed to load config source {name}: {reason}")]
    SourceLoad { name: String, reason: String },

    #[error("failed to watch config source {name}: {reason}")]
    Watch { name: String, reason: String },

    // ── Merge errors ───────────────────────────────────────────
    #[error("merge conflict at `{key}`: {reason}")]
    Merge { key: String, reason: String },

    // ── Remote errors ──────────────────────────────────────────
    #[error("remote fetch failed for {name}: {reason}")]
    RemoteFetch { name: String, reason: String },

    // ── Discovery errors ───────────────────────────────────────
    #[error("invalid glob pattern `{pattern}`: {reason}")]
    GlobExpansion { pattern: String, reason: String },

    // ── Options errors ─────────────────────────────────────────
    #[error("config error: {0}")]
    Config(String),

    // ── Generic wrappers ───────────────────────────────────────
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl PitError {
    pub fn source_load(name: impl Into<String>, reason: impl ToString) -> Self {
        Self::SourceLoad {
            name: name.into(),
            reason: reason.to_string(),
        }
    }

    pub fn remote_fetch(name: impl Into<String>, reason: impl ToString) -> Self {
        Self::RemoteFetch {
            name: name.into(),
            reason: reason.to_string(),
        }
    }

    /// A missing source is optional configuration, not a failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::SourceNotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, PitError>;
