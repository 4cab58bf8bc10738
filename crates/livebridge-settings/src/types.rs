//! Settings types.
//!
//! All sections deserialize with `camelCase` keys and fall back to their
//! `Default` for any missing field.

use livebridge_core::{RetryConfig, SetupConfig};
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Default upstream endpoint (Gemini Live bidirectional stream).
pub const DEFAULT_UPSTREAM_URL: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LiveBridgeSettings {
    /// HTTP / WebSocket listener.
    pub server: ServerSettings,
    /// Upstream endpoint and session setup.
    pub upstream: UpstreamSettings,
    /// Reconnect policy.
    pub retry: RetryConfig,
    /// Per-bridge limits.
    pub bridge: BridgeSettings,
    /// Metrics aggregate and broadcast.
    pub metrics: MetricsSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl LiveBridgeSettings {
    /// Reject values the bridge cannot operate with.
    pub fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            return Err(SettingsError::InvalidValue(
                "retry.maxAttempts must be positive".into(),
            ));
        }
        if self.retry.retry_delay_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "retry.retryDelayMs must be positive".into(),
            ));
        }
        let factor = self.retry.backoff_factor;
        if factor.is_nan() || factor < 1.0 {
            return Err(SettingsError::InvalidValue(format!(
                "retry.backoffFactor must be >= 1 (got {factor})"
            )));
        }
        if self.bridge.max_queued_messages == 0 {
            return Err(SettingsError::InvalidValue(
                "bridge.maxQueuedMessages must be positive".into(),
            ));
        }
        if self.metrics.interval_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "metrics.intervalMs must be positive".into(),
            ));
        }
        if self.upstream.url.is_empty() {
            return Err(SettingsError::InvalidValue("upstream.url is empty".into()));
        }
        Ok(())
    }
}

/// Listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Port (0 to auto-assign).
    pub port: u16,
    /// Max client WebSocket message size in bytes.
    pub max_message_size: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8787,
            max_message_size: 16 * 1024 * 1024,
        }
    }
}

/// Upstream endpoint and the setup frame sent on every open.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpstreamSettings {
    /// WebSocket URL without credentials.
    pub url: String,
    /// API key appended as the `key` query parameter.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Setup payload fields.
    #[serde(flatten)]
    pub setup: SetupConfig,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_UPSTREAM_URL.to_string(),
            api_key: None,
            setup: SetupConfig::default(),
        }
    }
}

/// Per-bridge limits.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BridgeSettings {
    /// Outbound messages held while upstream is unavailable.
    pub max_queued_messages: usize,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            max_queued_messages: 1000,
        }
    }
}

/// Metrics settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MetricsSettings {
    /// Whether the aggregate is maintained at all.
    pub enabled: bool,
    /// Broadcast interval in milliseconds.
    pub interval_ms: u64,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 5000,
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive (overridden by `RUST_LOG`).
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        LiveBridgeSettings::default().validate().unwrap();
    }

    #[test]
    fn default_values() {
        let s = LiveBridgeSettings::default();
        assert_eq!(s.server.port, 8787);
        assert_eq!(s.upstream.url, DEFAULT_UPSTREAM_URL);
        assert!(s.upstream.api_key.is_none());
        assert_eq!(s.retry.max_attempts, 5);
        assert_eq!(s.bridge.max_queued_messages, 1000);
        assert!(s.metrics.enabled);
        assert_eq!(s.metrics.interval_ms, 5000);
        assert_eq!(s.logging.level, "info");
    }

    #[test]
    fn upstream_setup_is_flattened() {
        let json = serde_json::to_value(UpstreamSettings::default()).unwrap();
        assert!(json.get("model").is_some());
        assert!(json.get("setup").is_none());
        assert!(json.get("apiKey").is_none());
    }

    #[test]
    fn rejects_zero_attempts() {
        let mut s = LiveBridgeSettings::default();
        s.retry.max_attempts = 0;
        assert!(matches!(s.validate(), Err(SettingsError::InvalidValue(_))));
    }

    #[test]
    fn rejects_factor_below_one() {
        let mut s = LiveBridgeSettings::default();
        s.retry.backoff_factor = 0.5;
        assert!(s.validate().is_err());
        s.retry.backoff_factor = f64::NAN;
        assert!(s.validate().is_err());
    }

    #[test]
    fn rejects_zero_queue_and_interval() {
        let mut s = LiveBridgeSettings::default();
        s.bridge.max_queued_messages = 0;
        assert!(s.validate().is_err());

        let mut s = LiveBridgeSettings::default();
        s.metrics.interval_ms = 0;
        assert!(s.validate().is_err());
    }
}
