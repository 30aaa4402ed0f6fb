//! Environment-variable overlay, applied last in every merge so the
//! process environment always wins over file-derived values.

use std::collections::HashMap;

use serde_json::Value;

use crate::settings::{Settings, leaf_keys, set_path};

/// Maps dotted config keys onto environment variables and overlays any
/// that are set.
///
/// `server.port` with prefix `app` reads `APP_SERVER_PORT`; dots and dashes
/// both become underscores.
#[derive(Debug, Clone, Default)]
pub struct EnvOverlay {
    prefix: Option<String>,
    bindings: Vec<String>,
    /// Fixed variables; `None` reads the process environment at apply time.
    vars: Option<HashMap<String, String>>,
}

impl EnvOverlay {
    /// Overlay from the live process environment.
    pub fn process() -> Self {
        Self::default()
    }

    /// Overlay from a fixed set of variables instead of the process environment.
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: Some(vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect()),
            ..Self::default()
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        self.prefix = (!prefix.is_empty()).then_some(prefix);
        self
    }

    /// Also overlay `key` when no source defines it.
    pub fn bind(mut self, key: impl Into<String>) -> Self {
        self.bindings.push(key.into().to_lowercase());
        self
    }

    /// The variable name consulted for a dotted key.
    pub fn var_name(&self, key: &str) -> String {
        let name: String = key
            .chars()
            .map(|c| match c {
                '.' | '-' => '_',
                other => other.to_ascii_uppercase(),
            })
            .collect();
        match &self.prefix {
            Some(prefix) => format!("{}_{name}", prefix.to_ascii_uppercase()),
            None => name,
        }
    }

    fn lookup(&self, name: &str) -> Option<String> {
        match &self.vars {
            Some(vars) => vars.get(name).cloned(),
            None => std::env::var(name).ok(),
        }
    }

    /// Replace every leaf (and every bound key) whose variable is set.
    pub fn apply(&self, settings: &mut Settings) {
        let mut keys = leaf_keys(settings);
        for bound in &self.bindings {
            if !keys.contains(bound) {
                keys.push(bound.clone());
            }
        }
        for key in keys {
            if let Some(value) = self.lookup(&self.var_name(&key)) {
                tracing::trace!(key = %key, "environment overrides config value");
                set_path(settings, &key, Value::String(value));
            }
        }
    }
}
