use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use confpit_core::{Result, Settings, get_path};

/// One fully merged configuration, as published to the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergedView {
    /// 0 for the initial view, then one more for every republished merge.
    pub generation: u64,
    pub settings: Settings,
}

impl MergedView {
    pub fn new(generation: u64, settings: Settings) -> Self {
        Self {
            generation,
            settings,
        }
    }

    /// Look up a dotted key (`server.port`), case-insensitively.
    pub fn get(&self, key: &str) -> Option<&Value> {
        get_path(&self.settings, key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key)?.as_str()
    }

    /// Integer value. Strings are parsed too, since environment overrides
    /// always arrive as strings.
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        match self.get(key)? {
            Value::String(s) => s.trim().parse().ok(),
            other => other.as_i64(),
        }
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.get(key)? {
            Value::String(s) => s.trim().parse().ok(),
            other => other.as_bool(),
        }
    }

    /// Deserialize the value at `key` into `T`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<Result<T>> {
        let value = self.get(key)?.clone();
        Some(serde_json::from_value(value).map_err(Into::into))
    }

    /// Deserialize the whole view into `T`.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(Value::Object(self.settings.clone()))?)
    }

    /// Top-level keys, sorted.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.settings.keys().map(String::as_str)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.settings)?)
    }
}
