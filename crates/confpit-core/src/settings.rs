//! The key/value mapping every source produces and every merge consumes.
//!
//! Keys are case-insensitive: sources lowercase them on load, and lookups
//! lowercase the requested key. Nested tables are addressed with dotted
//! paths (`server.port`).

use serde_json::{Map, Value};

use crate::error::{PitError, Result};

/// A configuration mapping. Backed by a `BTreeMap`, so iteration and
/// serialization order are deterministic.
pub type Settings = Map<String, Value>;

/// Lowercase every key, recursing into nested tables.
pub fn normalize_keys(settings: Settings) -> Settings {
    settings
        .into_iter()
        .map(|(key, value)| (key.to_lowercase(), normalize_value(value)))
        .collect()
}

fn normalize_value(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(normalize_keys(map)),
        Value::Array(items) => Value::Array(items.into_iter().map(normalize_value).collect()),
        other => other,
    }
}

/// Fold `source` into `target`. Keys in `source` win; nested tables are
/// merged recursively. A table on one side and a scalar on the other is a
/// type conflict and fails the whole merge.
pub fn merge_into(target: &mut Settings, source: &Settings) -> Result<()> {
    merge_at(target, source, "")
}

fn merge_at(target: &mut Settings, source: &Settings, prefix: &str) -> Result<()> {
    for (key, incoming) in source {
        let path = join_key(prefix, key);
        match (target.get_mut(key), incoming) {
            (Some(Value::Object(existing)), Value::Object(nested)) => {
                merge_at(existing, nested, &path)?;
            }
            (Some(Value::Object(_)), other) => {
                return Err(PitError::Merge {
                    key: path,
                    reason: format!("cannot replace a table with {}", kind(other)),
                });
            }
            (Some(existing), Value::Object(_)) if !existing.is_null() => {
                return Err(PitError::Merge {
                    key: path,
                    reason: format!("cannot replace {} with a table", kind(existing)),
                });
            }
            (Some(existing), _) => *existing = incoming.clone(),
            (None, _) => {
                target.insert(key.clone(), incoming.clone());
            }
        }
    }
    Ok(())
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a table",
    }
}

fn join_key(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

/// Look up a dotted key, case-insensitively.
pub fn get_path<'a>(settings: &'a Settings, key: &str) -> Option<&'a Value> {
    let key = key.to_lowercase();
    let mut parts = key.split('.');
    let mut current = settings.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// Set a dotted key, creating intermediate tables. A scalar sitting where a
/// table is needed is replaced.
pub fn set_path(settings: &mut Settings, key: &str, value: Value) {
    let key = key.to_lowercase();
    let mut parts: Vec<&str> = key.split('.').collect();
    let Some(last) = parts.pop() else {
        return;
    };
    let mut current = settings;
    for part in parts {
        let slot = current
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        let Value::Object(next) = slot else {
            return;
        };
        current = next;
    }
    current.insert(last.to_string(), value);
}

/// Every leaf key as a dotted path, in sorted order.
///
/// Keys that themselves contain a `.` are left out: their dotted path would
/// name a different location.
pub fn leaf_keys(settings: &Settings) -> Vec<String> {
    let mut keys = Vec::new();
    collect_leaves(settings, "", &mut keys);
    keys
}

fn collect_leaves(settings: &Settings, prefix: &str, out: &mut Vec<String>) {
    for (key, value) in settings {
        if key.contains('.') {
            continue;
        }
        let path = join_key(prefix, key);
        match value {
            Value::Object(nested) if !nested.is_empty() => collect_leaves(nested, &path, out),
            _ => out.push(path),
        }
    }
}
