//! `/health` endpoint.

use std::time::Instant;

use serde::Serialize;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Always `"ok"` when the server is running.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Number of live session bridges.
    pub active_bridges: usize,
}

/// Build a health response from live counters.
pub fn health_check(start_time: Instant, active_bridges: usize) -> HealthResponse {
    HealthResponse {
        status: "ok".into(),
        uptime_secs: start_time.elapsed().as_secs(),
        active_bridges,
    }
}
