//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`TallySettings::default()`]
//! 2. If `~/.tally/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `TALLY_*` environment variable overrides
//! 4. Validate the result

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::TallySettings;

/// Path of the user settings file (`~/.tally/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".tally").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<TallySettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from `path` with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or out-of-range values are
/// errors.
pub fn load_settings_from_path(path: &Path) -> Result<TallySettings> {
    let defaults = serde_json::to_value(TallySettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: TallySettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
///
/// Objects merge per key; arrays and primitives from `source` replace the
/// target; `null` in `source` keeps the target value.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `TALLY_*` environment overrides. Invalid values are ignored with a
/// warning.
pub fn apply_env_overrides(settings: &mut TallySettings) {
    if let Some(v) = read_env_string("TALLY_DB_PATH") {
        settings.storage.database_path = v;
    }
    if let Some(v) = read_env_u32("TALLY_POOL_SIZE", 1, 64) {
        settings.storage.pool_size = v;
    }
    if let Some(v) = read_env_u64("TALLY_BUSY_TIMEOUT_MS", 0, 600_000) {
        settings.storage.busy_timeout_ms = v;
    }
    if let Some(v) = read_env_string("TALLY_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read_env_bool("TALLY_LOG_JSON") {
        settings.logging.json = v;
    }
    if let Some(v) = read_env_string("TALLY_QUEUE_NAME") {
        settings.notifications.queue_name = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a boolean: `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`, any case.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a `u32` within an inclusive range.
pub fn parse_u32_range(val: &str, min: u32, max: u32) -> Option<u32> {
    let n: u32 = val.parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

/// Parse a `u64` within an inclusive range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

// ── Env var readers ─────────────────────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_bool(name: &str) -> Option<bool> {
    let val = std::env::var(name).ok()?;
    let result = parse_bool(&val);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
    }
    result
}

fn read_env_u32(name: &str, min: u32, max: u32) -> Option<u32> {
    let val = std::env::var(name).ok()?;
    let result = parse_u32_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u32 env var, ignoring");
    }
    result
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SettingsError;

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"storage": {"poolSize": 4, "databasePath": "a.db"}});
        let source = serde_json::json!({"storage": {"poolSize": 8}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["storage"]["poolSize"], 8);
        assert_eq!(merged["storage"]["databasePath"], "a.db");
    }

    #[test]
    fn merge_null_preserves_target() {
        let target = serde_json::json!({"a": 1, "b": 2});
        let merged = deep_merge(target, serde_json::json!({"a": null}));
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    #[test]
    fn merge_array_replaces() {
        let target = serde_json::json!({"items": [1, 2, 3]});
        let merged = deep_merge(target, serde_json::json!({"items": [4]}));
        assert_eq!(merged["items"], serde_json::json!([4]));
    }

    #[test]
    fn merge_primitive_replaces_object() {
        let target = serde_json::json!({"a": {"nested": true}});
        let merged = deep_merge(target, serde_json::json!({"a": 42}));
        assert_eq!(merged["a"], 42);
    }

    // ── load_settings_from_path ─────────────────────────────────────

    #[test]
    fn load_missing_file_returns_defaults() {
        let settings = load_settings_from_path(Path::new("/nonexistent/settings.json")).unwrap();
        assert_eq!(settings.storage.pool_size, TallySettings::default().storage.pool_size);
    }

    #[test]
    fn load_partial_json_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"storage": {"busyTimeoutMs": 250}, "notifications": {"serviceName": "billing"}}"#,
        )
        .unwrap();

        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.storage.busy_timeout_ms, 250);
        assert_eq!(settings.storage.pool_size, 4);
        assert_eq!(settings.notifications.service_name, "billing");
        assert_eq!(settings.notifications.queue_name, "next-billing-date-queue");
    }

    #[test]
    fn load_invalid_json_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not valid json").unwrap();

        assert!(matches!(
            load_settings_from_path(&path),
            Err(SettingsError::Json(_))
        ));
    }

    #[test]
    fn load_rejects_zero_pool_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"storage": {"poolSize": 0}}"#).unwrap();

        assert!(matches!(
            load_settings_from_path(&path),
            Err(SettingsError::InvalidValue(_))
        ));
    }

    // ── parsing ─────────────────────────────────────────────────────

    #[test]
    fn parse_bool_variants() {
        for val in &["true", "1", "YES", "on"] {
            assert_eq!(parse_bool(val), Some(true), "failed for {val}");
        }
        for val in &["false", "0", "No", "OFF"] {
            assert_eq!(parse_bool(val), Some(false), "failed for {val}");
        }
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn parse_u32_range_bounds() {
        assert_eq!(parse_u32_range("1", 1, 64), Some(1));
        assert_eq!(parse_u32_range("64", 1, 64), Some(64));
        assert_eq!(parse_u32_range("0", 1, 64), None);
        assert_eq!(parse_u32_range("65", 1, 64), None);
        assert_eq!(parse_u32_range("four", 1, 64), None);
    }

    #[test]
    fn parse_u64_range_bounds() {
        assert_eq!(parse_u64_range("0", 0, 600_000), Some(0));
        assert_eq!(parse_u64_range("700000", 0, 600_000), None);
        assert_eq!(parse_u64_range("-1", 0, 600_000), None);
    }
}
