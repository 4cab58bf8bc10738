//! Reconnect backoff.
//!
//! Pure configuration and math; scheduling the delay is the bridge's job.
//!
//! - [`RetryConfig`]: attempt budget and backoff parameters
//! - [`RetryPolicy`]: `delay_for` / `should_retry` over a config

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Default maximum connection attempts.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
/// Default delay before the first reconnect in milliseconds.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1000;
/// Default multiplier applied per attempt.
pub const DEFAULT_BACKOFF_FACTOR: f64 = 2.0;

/// Immutable retry parameters.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    /// Maximum number of connection attempts (default: 5).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first reconnect in ms (default: 1000).
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Multiplier applied per attempt, at least 1 (default: 2.0).
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}
fn default_retry_delay_ms() -> u64 {
    DEFAULT_RETRY_DELAY_MS
}
fn default_backoff_factor() -> f64 {
    DEFAULT_BACKOFF_FACTOR
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Policy
// ─────────────────────────────────────────────────────────────────────────────

/// Maps attempt counts to backoff delays.
#[derive(Clone, Copy, Debug, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Create a policy over the given config.
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// The underlying config.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Maximum number of attempts.
    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Delay before reconnecting after attempt `attempt` (1-based) failed.
    ///
    /// `retry_delay * backoff_factor^(attempt - 1)`. Attempt 0 is treated as 1.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        backoff_delay(
            attempt,
            self.config.retry_delay_ms,
            self.config.backoff_factor,
        )
    }

    /// Whether another attempt is allowed after `attempt` attempts.
    pub fn should_retry(&self, attempt: u32) -> bool {
        should_retry(attempt, self.config.max_attempts)
    }
}

/// `attempt < max_attempts`.
#[must_use]
pub fn should_retry(attempt: u32, max_attempts: u32) -> bool {
    attempt < max_attempts
}

/// Exponential backoff without jitter.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap
)]
pub fn backoff_delay(attempt: u32, retry_delay_ms: u64, backoff_factor: f64) -> Duration {
    let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
    let millis = (retry_delay_ms as f64) * backoff_factor.max(1.0).powi(exponent);
    // Saturate rather than overflow for absurd attempt counts.
    let millis = if millis.is_finite() {
        millis.min(u64::MAX as f64)
    } else {
        u64::MAX as f64
    };
    Duration::from_millis(millis.round() as u64)
}
