//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`ProviderSettings::default()`]
//! 2. Deep-merge the file's `defaults` object over it
//! 3. Deep-merge each entry of the file's `providers` object over that
//! 4. Apply `PUSHWIRE_*` environment overrides to every provider
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::{Environment, ProviderSettings, PushwireSettings};

/// Environment variable naming an alternative providers file.
pub const CONFIG_PATH_ENV: &str = "PUSHWIRE_CONFIG";

/// Raw shape of the providers file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SettingsFile {
    defaults: Value,
    providers: Map<String, Value>,
}

/// Resolve the providers file path.
///
/// `PUSHWIRE_CONFIG` if set, else `~/.pushwire/providers.json`.
pub fn settings_path() -> PathBuf {
    settings_path_from(|name| std::env::var(name).ok())
}

/// [`settings_path`] with an injectable environment lookup.
pub fn settings_path_from(lookup: impl Fn(&str) -> Option<String>) -> PathBuf {
    if let Some(path) = lookup(CONFIG_PATH_ENV).filter(|v| !v.is_empty()) {
        return PathBuf::from(path);
    }
    let home = lookup("HOME").unwrap_or_else(|| "/tmp".to_string());
    PathBuf::from(home).join(".pushwire").join("providers.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<PushwireSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields no providers. Invalid JSON or an invalid
/// provider value is an error.
pub fn load_settings_from_path(path: &Path) -> Result<PushwireSettings> {
    let mut settings = if path.exists() {
        debug!(?path, "loading provider settings");
        let content = std::fs::read_to_string(path)?;
        parse_settings(&content)?
    } else {
        debug!(?path, "providers file not found");
        PushwireSettings::default()
    };

    apply_env_overrides(&mut settings);
    for (name, provider) in &settings.providers {
        provider.validate(name)?;
    }
    Ok(settings)
}

/// Parse the providers file contents, merging defaults into every provider.
pub fn parse_settings(content: &str) -> Result<PushwireSettings> {
    let file: SettingsFile = serde_json::from_str(content)?;
    let base = deep_merge(serde_json::to_value(ProviderSettings::default())?, file.defaults);

    let providers = file
        .providers
        .into_iter()
        .map(|(name, overrides)| -> Result<(String, ProviderSettings)> {
            let merged = deep_merge(base.clone(), overrides);
            let provider: ProviderSettings = serde_json::from_value(merged)?;
            Ok((name, provider))
        })
        .collect::<Result<_>>()?;

    Ok(PushwireSettings { providers })
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
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
        (target, Value::Null) => target,
        (_, source) => source,
    }
}

/// Apply environment variable overrides to every provider.
pub fn apply_env_overrides(settings: &mut PushwireSettings) {
    apply_env_overrides_from(settings, |name| std::env::var(name).ok());
}

/// [`apply_env_overrides`] with an injectable environment lookup.
///
/// Invalid values are logged and ignored.
pub fn apply_env_overrides_from(
    settings: &mut PushwireSettings,
    lookup: impl Fn(&str) -> Option<String>,
) {
    let log_level = read_env(&lookup, "PUSHWIRE_LOG_LEVEL", parse_log_level);
    let delay_for_errors = read_env(&lookup, "PUSHWIRE_DELAY_FOR_ERRORS", parse_seconds);
    let error_skip_delay = read_env(&lookup, "PUSHWIRE_ERROR_SKIP_DELAY", parse_seconds);
    let environment = read_env(&lookup, "PUSHWIRE_ENVIRONMENT", parse_environment);

    for provider in settings.providers.values_mut() {
        if let Some(v) = &log_level {
            provider.log_level.clone_from(v);
        }
        if let Some(v) = delay_for_errors {
            provider.delay_for_errors = v;
        }
        if let Some(v) = error_skip_delay {
            provider.error_skip_delay = v;
        }
        if let Some(v) = environment {
            provider.environment = Some(v);
        }
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a log level name (case-insensitive).
pub fn parse_log_level(val: &str) -> Option<String> {
    let level = val.trim().to_lowercase();
    matches!(level.as_str(), "trace" | "debug" | "info" | "warn" | "error").then_some(level)
}

/// Parse a finite, non-negative number of seconds.
pub fn parse_seconds(val: &str) -> Option<f64> {
    let secs: f64 = val.trim().parse().ok()?;
    (secs.is_finite() && secs >= 0.0).then_some(secs)
}

/// Parse an environment preset name.
pub fn parse_environment(val: &str) -> Option<Environment> {
    match val.trim().to_lowercase().as_str() {
        "production" => Some(Environment::Production),
        "sandbox" => Some(Environment::Sandbox),
        _ => None,
    }
}

fn read_env<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> Option<T> {
    let val = lookup(name).filter(|v| !v.is_empty())?;
    let result = parse(&val);
    if result.is_none() {
        warn!(key = name, value = %val, "invalid env var, ignoring");
    }
    result
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use assert_matches::assert_matches;
    use pushwire_core::Endpoints;
    use serde_json::json;

    use super::*;
    use crate::errors::SettingsError;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_simple_override() {
        let merged = deep_merge(json!({"a": 1, "b": 2}), json!({"a": 10}));
        assert_eq!(merged, json!({"a": 10, "b": 2}));
    }

    #[test]
    fn merge_nested_override() {
        let merged = deep_merge(
            json!({"tls": {"port": 2195, "host": "gw"}}),
            json!({"tls": {"port": 2295}}),
        );
        assert_eq!(merged, json!({"tls": {"port": 2295, "host": "gw"}}));
    }

    #[test]
    fn merge_array_replace() {
        let merged = deep_merge(json!({"retry_backoff": [1, 2, 3]}), json!({"retry_backoff": [4]}));
        assert_eq!(merged["retry_backoff"], json!([4]));
    }

    #[test]
    fn merge_null_preserves_target() {
        let merged = deep_merge(json!({"a": 1}), json!({"a": null}));
        assert_eq!(merged["a"], 1);
        assert_eq!(deep_merge(json!({"a": 1}), Value::Null), json!({"a": 1}));
    }

    // ── parse_settings ──────────────────────────────────────────────

    #[test]
    fn defaults_merge_into_each_provider() {
        let settings = parse_settings(
            r#"{
                "defaults": {"environment": "sandbox", "delay_for_errors": 2.0},
                "providers": {
                    "ios": {"cert_bundle_path": "/keys/ios.pem"},
                    "mac": {"environment": "production", "retry_backoff": [1.0]}
                }
            }"#,
        )
        .unwrap();

        let ios = &settings.providers["ios"];
        assert_eq!(ios.endpoints("ios").unwrap(), Endpoints::sandbox());
        assert_eq!(ios.delay_for_errors, 2.0);
        assert_eq!(ios.retry_backoff, vec![0.25, 0.75, 2.5]);

        let mac = &settings.providers["mac"];
        assert_eq!(mac.endpoints("mac").unwrap(), Endpoints::production());
        assert_eq!(
            mac.policy("mac").unwrap().retry_backoff,
            vec![Duration::from_secs(1)]
        );
        assert_eq!(mac.error_skip_delay, 0.5);
    }

    #[test]
    fn empty_file_has_no_providers() {
        assert!(parse_settings("{}").unwrap().providers.is_empty());
    }

    #[test]
    fn unknown_environment_is_a_parse_error() {
        let result = parse_settings(r#"{"providers": {"p": {"environment": "staging"}}}"#);
        assert_matches!(result, Err(SettingsError::Json(_)));
    }

    #[test]
    fn invalid_json_is_an_error() {
        assert_matches!(parse_settings("not json"), Err(SettingsError::Json(_)));
    }

    // ── load_settings_from_path ─────────────────────────────────────

    #[test]
    fn load_missing_file_returns_no_providers() {
        let settings = load_settings_from_path(Path::new("/nonexistent/providers.json")).unwrap();
        assert!(settings.providers.is_empty());
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("providers.json");
        std::fs::write(
            &path,
            r#"{"providers": {"main": {"gateway_host": "localhost", "gateway_port": 2295}}}"#,
        )
        .unwrap();

        let settings = load_settings_from_path(&path).unwrap();
        let main = settings.provider("main").unwrap();
        assert_eq!(main.gateway_host.as_deref(), Some("localhost"));
        assert_eq!(main.gateway_port, Some(2295));
    }

    #[test]
    fn load_rejects_invalid_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("providers.json");
        std::fs::write(&path, r#"{"providers": {"main": {"error_skip_delay": -3}}}"#).unwrap();

        assert_matches!(
            load_settings_from_path(&path),
            Err(SettingsError::InvalidValue { provider, .. }) if provider == "main"
        );
    }

    // ── env overrides ───────────────────────────────────────────────

    #[test]
    fn env_overrides_apply_to_every_provider() {
        let mut settings = parse_settings(r#"{"providers": {"a": {}, "b": {"log_level": "info"}}}"#).unwrap();
        apply_env_overrides_from(
            &mut settings,
            env(&[
                ("PUSHWIRE_LOG_LEVEL", "DEBUG"),
                ("PUSHWIRE_DELAY_FOR_ERRORS", "0.1"),
                ("PUSHWIRE_ENVIRONMENT", "sandbox"),
            ]),
        );

        for provider in settings.providers.values() {
            assert_eq!(provider.log_level, "debug");
            assert_eq!(provider.delay_for_errors, 0.1);
            assert_eq!(provider.environment, Some(Environment::Sandbox));
            assert_eq!(provider.error_skip_delay, 0.5);
        }
    }

    #[test]
    fn invalid_env_values_are_ignored() {
        let mut settings = parse_settings(r#"{"providers": {"a": {}}}"#).unwrap();
        apply_env_overrides_from(
            &mut settings,
            env(&[
                ("PUSHWIRE_LOG_LEVEL", "loud"),
                ("PUSHWIRE_ERROR_SKIP_DELAY", "-1"),
                ("PUSHWIRE_ENVIRONMENT", "staging"),
            ]),
        );

        let a = &settings.providers["a"];
        assert_eq!(a.log_level, "warn");
        assert_eq!(a.error_skip_delay, 0.5);
        assert_eq!(a.environment, None);
    }

    #[test]
    fn settings_path_prefers_env() {
        assert_eq!(
            settings_path_from(env(&[("PUSHWIRE_CONFIG", "/etc/pushwire.json")])),
            PathBuf::from("/etc/pushwire.json")
        );
        assert_eq!(
            settings_path_from(env(&[("HOME", "/home/ops")])),
            PathBuf::from("/home/ops/.pushwire/providers.json")
        );
    }

    // ── pure parsers ────────────────────────────────────────────────

    #[test]
    fn parse_seconds_accepts_non_negative_finite() {
        assert_eq!(parse_seconds("0"), Some(0.0));
        assert_eq!(parse_seconds(" 1.5 "), Some(1.5));
        assert_eq!(parse_seconds("-0.5"), None);
        assert_eq!(parse_seconds("inf"), None);
        assert_eq!(parse_seconds("NaN"), None);
        assert_eq!(parse_seconds("soon"), None);
    }

    #[test]
    fn parse_log_level_normalizes_case() {
        assert_eq!(parse_log_level("WARN").as_deref(), Some("warn"));
        assert_eq!(parse_log_level("verbose"), None);
    }

    #[test]
    fn parse_environment_names() {
        assert_eq!(parse_environment("Sandbox"), Some(Environment::Sandbox));
        assert_eq!(parse_environment("production"), Some(Environment::Production));
        assert_eq!(parse_environment("dev"), None);
    }
}
