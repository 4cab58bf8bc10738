//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`LiveBridgeSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over defaults
//! 3. Apply environment variable overrides (highest priority)
//! 4. Validate
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::LiveBridgeSettings;

/// Resolve the default settings path (`~/.livebridge/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".livebridge").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<LiveBridgeSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON or invalid values are errors.
pub fn load_settings_from_path(path: &Path) -> Result<LiveBridgeSettings> {
    let mut settings = read_settings_file(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Read and merge the settings file without env overrides or validation.
pub fn read_settings_file(path: &Path) -> Result<LiveBridgeSettings> {
    let defaults = serde_json::to_value(LiveBridgeSettings::default())?;

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
pub fn apply_env_overrides(settings: &mut LiveBridgeSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides from an arbitrary variable lookup.
///
/// Invalid values are ignored with a warning (fall back to file/default).
pub fn apply_overrides<F>(settings: &mut LiveBridgeSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let read = |name: &str| lookup(name).filter(|v| !v.is_empty());

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = read("LIVEBRIDGE_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = parsed(&read, "LIVEBRIDGE_PORT", |s| parse_u16_range(s, 0, 65535)) {
        settings.server.port = v;
    }

    // ── Upstream ────────────────────────────────────────────────────
    if let Some(v) = read("LIVEBRIDGE_UPSTREAM_URL") {
        settings.upstream.url = v;
    }
    if let Some(v) = read("LIVEBRIDGE_API_KEY").or_else(|| read("GEMINI_API_KEY")) {
        settings.upstream.api_key = Some(v);
    }
    if let Some(v) = read("LIVEBRIDGE_MODEL") {
        settings.upstream.setup.model = v;
    }

    // ── Retry ───────────────────────────────────────────────────────
    if let Some(v) = parsed(&read, "LIVEBRIDGE_MAX_ATTEMPTS", |s| parse_u32_range(s, 1, 1000)) {
        settings.retry.max_attempts = v;
    }
    if let Some(v) = parsed(&read, "LIVEBRIDGE_RETRY_DELAY_MS", |s| {
        parse_u64_range(s, 1, 600_000)
    }) {
        settings.retry.retry_delay_ms = v;
    }
    if let Some(v) = parsed(&read, "LIVEBRIDGE_BACKOFF_FACTOR", |s| {
        parse_f64_range(s, 1.0, 100.0)
    }) {
        settings.retry.backoff_factor = v;
    }

    // ── Bridge ──────────────────────────────────────────────────────
    if let Some(v) = parsed(&read, "LIVEBRIDGE_MAX_QUEUED_MESSAGES", |s| {
        parse_usize_range(s, 1, 1_000_000)
    }) {
        settings.bridge.max_queued_messages = v;
    }

    // ── Metrics ─────────────────────────────────────────────────────
    if let Some(v) = parsed(&read, "LIVEBRIDGE_METRICS_ENABLED", parse_bool) {
        settings.metrics.enabled = v;
    }
    if let Some(v) = parsed(&read, "LIVEBRIDGE_METRICS_INTERVAL_MS", |s| {
        parse_u64_range(s, 100, 3_600_000)
    }) {
        settings.metrics.interval_ms = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = read("LIVEBRIDGE_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = parsed(&read, "LIVEBRIDGE_LOG_JSON", parse_bool) {
        settings.logging.json = v;
    }
}

fn parsed<T, R, P>(read: &R, name: &str, parse: P) -> Option<T>
where
    R: Fn(&str) -> Option<String>,
    P: Fn(&str) -> Option<T>,
{
    let val = read(name)?;
    let result = parse(&val);
    if result.is_none() {
        warn!(key = name, value = %val, "invalid env var, ignoring");
    }
    result
}

// ── Pure parsing functions ──────────────────────────────────────────────────

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

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u32` within a range.
pub fn parse_u32_range(val: &str, min: u32, max: u32) -> Option<u32> {
    let n: u32 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a finite `f64` within a range.
pub fn parse_f64_range(val: &str, min: f64, max: f64) -> Option<f64> {
    let n: f64 = val.parse().ok()?;
    (n.is_finite() && n >= min && n <= max).then_some(n)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
