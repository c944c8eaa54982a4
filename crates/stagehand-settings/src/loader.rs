//! Settings loading with deep merge and environment variable overrides.
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::{StagehandSettings, TransportKind};

/// `~/.stagehand`, falling back to `/tmp/.stagehand` without `HOME`.
pub fn stagehand_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".stagehand")
}

/// Resolve the path to the settings file (`~/.stagehand/settings.json`).
pub fn settings_path() -> PathBuf {
    stagehand_dir().join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<StagehandSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<StagehandSettings> {
    let defaults = serde_json::to_value(StagehandSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: StagehandSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings, |name| std::env::var(name).ok());
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `STAGEHAND_*` overrides read through `lookup`.
///
/// Invalid values are ignored with a warning.
pub fn apply_env_overrides(
    settings: &mut StagehandSettings,
    lookup: impl Fn(&str) -> Option<String>,
) {
    let read = |name: &str| lookup(name).filter(|v| !v.is_empty());

    if let Some(v) = read("STAGEHAND_TRANSPORT") {
        match parse_transport(&v) {
            Some(t) => settings.server.transport = t,
            None => warn_invalid("STAGEHAND_TRANSPORT", &v),
        }
    }
    if let Some(v) = read("STAGEHAND_LISTEN_ADDR") {
        settings.server.listen_addr = v;
    }
    if let Some(v) = read("STAGEHAND_DB_PATH") {
        settings.store.db_path = v;
    }
    if let Some(v) = read("STAGEHAND_API_URL") {
        settings.api.base_url = v;
    }
    if let Some(v) = read("STAGEHAND_PROGRESS_INTERVAL_MS") {
        match parse_u64_range(&v, 0, 60_000) {
            Some(n) => settings.progress.notify_interval_ms = n,
            None => warn_invalid("STAGEHAND_PROGRESS_INTERVAL_MS", &v),
        }
    }
    if let Some(v) = read("STAGEHAND_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read("STAGEHAND_LOG_JSON") {
        match parse_bool(&v) {
            Some(b) => settings.logging.json = b,
            None => warn_invalid("STAGEHAND_LOG_JSON", &v),
        }
    }
}

fn warn_invalid(key: &str, value: &str) {
    tracing::warn!(key, value, "invalid env var, ignoring");
}

/// Parse a transport name (case-insensitive).
pub fn parse_transport(val: &str) -> Option<TransportKind> {
    match val.to_lowercase().as_str() {
        "stdio" => Some(TransportKind::Stdio),
        "tcp" => Some(TransportKind::Tcp),
        _ => None,
    }
}

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn deep_merge_nested_objects() {
        let merged = deep_merge(
            json!({"a": {"x": 1, "y": 2}, "b": 3}),
            json!({"a": {"y": 20}, "c": 4}),
        );
        assert_eq!(merged, json!({"a": {"x": 1, "y": 20}, "b": 3, "c": 4}));
    }

    #[test]
    fn deep_merge_skips_null() {
        let merged = deep_merge(json!({"a": 1}), json!({"a": null}));
        assert_eq!(merged["a"], 1);
    }

    #[test]
    fn deep_merge_replaces_arrays() {
        let merged = deep_merge(json!({"a": [1, 2]}), json!({"a": [3]}));
        assert_eq!(merged["a"], json!([3]));
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let s = load_settings_from_path(&dir.path().join("nope.json")).unwrap();
        assert_eq!(s.server.listen_addr, StagehandSettings::default().server.listen_addr);
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"progress":{"notifyIntervalMs":1000},"logging":{"json":true}}"#)
            .unwrap();
        let s = load_settings_from_path(&path).unwrap();
        assert_eq!(s.progress.notify_interval_ms, 1000);
        assert!(s.logging.json);
        assert_eq!(s.logging.level, "info");
    }

    #[test]
    fn invalid_json_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(load_settings_from_path(&path).is_err());
    }

    #[test]
    fn env_overrides_apply() {
        let mut s = StagehandSettings::default();
        apply_env_overrides(
            &mut s,
            env(&[
                ("STAGEHAND_TRANSPORT", "TCP"),
                ("STAGEHAND_LISTEN_ADDR", "0.0.0.0:9000"),
                ("STAGEHAND_PROGRESS_INTERVAL_MS", "50"),
                ("STAGEHAND_LOG_JSON", "yes"),
            ]),
        );
        assert_eq!(s.server.transport, TransportKind::Tcp);
        assert_eq!(s.server.listen_addr, "0.0.0.0:9000");
        assert_eq!(s.progress.notify_interval_ms, 50);
        assert!(s.logging.json);
    }

    #[test]
    fn invalid_env_values_are_ignored() {
        let mut s = StagehandSettings::default();
        apply_env_overrides(
            &mut s,
            env(&[
                ("STAGEHAND_TRANSPORT", "carrier-pigeon"),
                ("STAGEHAND_PROGRESS_INTERVAL_MS", "999999999"),
                ("STAGEHAND_LOG_JSON", "maybe"),
                ("STAGEHAND_DB_PATH", ""),
            ]),
        );
        assert_eq!(s, StagehandSettings::default());
    }

    #[test]
    fn parse_helpers() {
        assert_eq!(parse_bool("ON"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("x"), None);
        assert_eq!(parse_u64_range("10", 0, 5), None);
        assert_eq!(parse_u64_range("5", 0, 5), Some(5));
        assert_eq!(parse_transport("stdio"), Some(TransportKind::Stdio));
    }
}
