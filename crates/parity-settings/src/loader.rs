//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`ParitySettings::default()`]
//! 2. If a settings file is given and exists, deep-merge its values over defaults
//! 3. Apply `PARITY_*` environment variable overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::ParitySettings;

/// Env var naming an optional JSON settings file.
pub const SETTINGS_PATH_ENV: &str = "PARITY_SETTINGS_PATH";

/// Resolve the settings file path from the environment, if any.
pub fn settings_path() -> Option<PathBuf> {
    read_env_string(SETTINGS_PATH_ENV).map(PathBuf::from)
}

/// Load settings from the env-named file (if any) with env var overrides.
pub fn load_settings() -> Result<ParitySettings> {
    match settings_path() {
        Some(path) => load_settings_from_path(&path),
        None => {
            let mut settings = ParitySettings::default();
            apply_env_overrides(&mut settings);
            Ok(settings)
        }
    }
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<ParitySettings> {
    let mut settings = merge_file(path)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

fn merge_file(path: &Path) -> Result<ParitySettings> {
    let defaults = serde_json::to_value(ParitySettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
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

/// Apply process environment overrides.
pub fn apply_env_overrides(settings: &mut ParitySettings) {
    apply_overrides_from(settings, |name| std::env::var(name).ok());
}

/// Apply overrides from an arbitrary lookup (the process env in production).
///
/// Invalid values are ignored with a warning, falling back to file/default.
pub fn apply_overrides_from(settings: &mut ParitySettings, lookup: impl Fn(&str) -> Option<String>) {
    let env = EnvReader { lookup };

    // ── Gateway ─────────────────────────────────────────────────────
    if let Some(v) = env.string("PARITY_GATEWAY_HOST") {
        settings.gateway.host = v;
    }
    if let Some(v) = env.u16_range("PARITY_GATEWAY_PORT", 1, 65535) {
        settings.gateway.port = v;
    }
    // The token may legitimately be set to empty, so read it raw.
    if let Some(v) = (env.lookup)("PARITY_GATEWAY_TOKEN") {
        settings.gateway.token = v.clone();
        settings.client.token = v;
    }

    // ── Telemetry ───────────────────────────────────────────────────
    if let Some(v) = env.string("PARITY_GATEWAY_LOG_LEVEL") {
        settings.telemetry.log_level = v;
    }
    if let Some(v) = env.string("PARITY_LOG_FORMAT") {
        settings.telemetry.format = v;
    }

    // ── Client roles ────────────────────────────────────────────────
    if let Some(v) = env.string("PARITY_GATEWAY_URL") {
        settings.client.url = v;
    }
    if let Some(v) = env.string("PARITY_ACTION_ID") {
        settings.client.action_id = v;
    }
    if let Some(v) = env.string("PARITY_EXPECT_ACTION") {
        settings.client.expect_action = v.trim().to_lowercase();
    }
    if let Some(v) = env.string("PARITY_EXPECTATIONS_JSON") {
        settings.client.expectations_json = Some(v);
    }
    if let Some(v) = env.string("PARITY_SCENARIO_JSON") {
        settings.client.scenario_json = Some(v);
    }
    if let Some(v) = (env.lookup)("PARITY_WAIT_FOR_CLIENTS") {
        settings.client.wait_for_clients = parse_name_list(&v);
    }

    // ── Timeouts ────────────────────────────────────────────────────
    if let Some(v) = env.secs_as_ms("PARITY_ASSERT_TIMEOUT_SECS") {
        settings.timeouts.assert_ms = v;
    }
    if let Some(v) = env.secs_as_ms("PARITY_PRODUCER_WAIT_SECS") {
        settings.timeouts.ready_ms = v;
    }
    if let Some(v) = env.secs_as_ms("PARITY_PRODUCER_TAIL_SECS") {
        settings.timeouts.tail_ms = v;
    }
    if let Some(v) = env.i64("PARITY_SCENARIO_DELAY_MS") {
        settings.timeouts.scenario_delay_ms = u64::try_from(v).unwrap_or(0);
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Split a comma-separated name list, dropping blanks.
pub fn parse_name_list(val: &str) -> Vec<String> {
    val.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse fractional seconds (e.g. `"2.5"`) into whole milliseconds.
/// Negative values clamp to zero.
pub fn parse_secs_as_ms(val: &str) -> Option<u64> {
    let secs: f64 = val.trim().parse().ok()?;
    if !secs.is_finite() {
        return None;
    }
    Some((secs.max(0.0) * 1_000.0).round() as u64)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn u16_range(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        let val = self.string(name)?;
        let result = parse_u16_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid u16 env var, ignoring");
        }
        result
    }

    fn i64(&self, name: &str) -> Option<i64> {
        let val = self.string(name)?;
        let result = val.parse().ok();
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid integer env var, ignoring");
        }
        result
    }

    fn secs_as_ms(&self, name: &str) -> Option<u64> {
        let val = self.string(name)?;
        let result = parse_secs_as_ms(&val);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid seconds env var, ignoring");
        }
        result
    }
}

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}
