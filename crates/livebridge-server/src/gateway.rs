//! Transport-facing facade over the bridge registry and metrics.
//!
//! The transport calls `on_connect` / `on_client_message` / `on_disconnect` /
//! `on_transport_error`; application code calls `send_tool_response` and the
//! metrics accessors.

use std::sync::Arc;
use std::time::Duration;

use livebridge_core::session::EVENT_ERROR;
use livebridge_core::{BridgeError, BridgeHooks, ClientSession, RetryPolicy};
use livebridge_settings::LiveBridgeSettings;
use livebridge_telemetry::{
    MetricsAggregate, MetricsBroadcaster, MetricsSnapshot, MetricsSubscription,
};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::bridge::{BridgeConfig, BridgeContext, BridgeHandle};
use crate::registry::BridgeRegistry;
use crate::upstream::{TungsteniteConnector, UpstreamConnector};

/// Entry point for transports and application code.
pub struct Gateway {
    registry: BridgeRegistry,
    hooks: Arc<dyn BridgeHooks>,
    metrics: Option<Arc<MetricsAggregate>>,
    broadcaster: Option<Arc<MetricsBroadcaster>>,
}

impl Gateway {
    /// Create a gateway. Metrics are tracked only when `metrics_enabled`.
    pub fn new(
        connector: Arc<dyn UpstreamConnector>,
        hooks: Arc<dyn BridgeHooks>,
        config: BridgeConfig,
        metrics_enabled: bool,
    ) -> Self {
        let metrics = metrics_enabled.then(|| Arc::new(MetricsAggregate::new()));
        let broadcaster = metrics
            .as_ref()
            .map(|m| Arc::new(MetricsBroadcaster::new(Arc::clone(m))));
        let ctx = BridgeContext {
            connector,
            hooks: Arc::clone(&hooks),
            metrics: metrics.clone(),
            config: Arc::new(config),
        };
        Self {
            registry: BridgeRegistry::new(ctx),
            hooks,
            metrics,
            broadcaster,
        }
    }

    /// Build a gateway talking to the configured upstream over WebSocket.
    pub fn from_settings(settings: &LiveBridgeSettings, hooks: Arc<dyn BridgeHooks>) -> Self {
        let connector = TungsteniteConnector::new(
            settings.upstream.url.clone(),
            settings.upstream.api_key.clone(),
        );
        let config = BridgeConfig::new(
            RetryPolicy::new(settings.retry),
            &settings.upstream.setup,
            settings.bridge.max_queued_messages,
        );
        Self::new(Arc::new(connector), hooks, config, settings.metrics.enabled)
    }

    // ── Transport callbacks ─────────────────────────────────────────

    /// A client session was accepted.
    pub fn on_connect(&self, session: Arc<dyn ClientSession>) -> BridgeHandle {
        self.hooks.on_client_connect(session.as_ref());
        let handle = self.registry.create(session);
        if let Some(ref metrics) = self.metrics {
            metrics.increment_active();
        }
        handle
    }

    /// Data of a client `message` frame. Returns `false` if no bridge exists.
    pub fn on_client_message(&self, session_id: &str, data: Option<Value>) -> bool {
        match self.registry.get(session_id) {
            Some(handle) => handle.send_message(data),
            None => {
                warn!(session_id, "client message for unknown session");
                false
            }
        }
    }

    /// The client session ended. Safe to call more than once.
    pub fn on_disconnect(&self, session_id: &str, reason: &str) {
        match self.registry.remove(session_id) {
            Some(handle) => {
                let _ = handle.teardown(reason);
            }
            None => debug!(session_id, "disconnect for unknown session"),
        }
    }

    /// The client transport reported an error. The session is not torn down;
    /// the transport follows up with `on_disconnect` if the socket is gone.
    pub fn on_transport_error(&self, session: &dyn ClientSession, error: &str) {
        let err = BridgeError::Transport(error.to_string());
        self.hooks.on_error(&err, session);
        if let Some(ref metrics) = self.metrics {
            metrics.increment_errors();
        }
    }

    /// Report an error raised at the transport layer (e.g. a malformed
    /// frame) to the client, the error hook, and the error counter.
    pub fn report_client_error(&self, session: &dyn ClientSession, error: &BridgeError) {
        let _ = session.emit(EVENT_ERROR, error.to_payload());
        self.hooks.on_error(error, session);
        if let Some(ref metrics) = self.metrics {
            metrics.increment_errors();
        }
    }

    // ── Public operations ───────────────────────────────────────────

    /// Send tool response entries (one entry or a list) to a session's upstream.
    pub async fn send_tool_response(
        &self,
        session_id: &str,
        entries: Value,
    ) -> Result<(), BridgeError> {
        let Some(handle) = self.registry.get(session_id) else {
            warn!(session_id, "tool response for unknown session");
            return Err(BridgeError::SessionNotFound(session_id.to_string()));
        };
        handle.send_tool_response(entries).await
    }

    /// Current metrics.
    pub fn metrics_snapshot(&self) -> Result<MetricsSnapshot, BridgeError> {
        self.metrics
            .as_ref()
            .map(|m| m.snapshot())
            .ok_or(BridgeError::MetricsDisabled)
    }

    /// Receive a snapshot on every broadcast tick, optionally for a bounded
    /// `duration`. Must be called from within a Tokio runtime when bounded.
    pub fn subscribe_to_metrics<F>(
        &self,
        callback: F,
        duration: Option<Duration>,
    ) -> Result<MetricsSubscription, BridgeError>
    where
        F: Fn(&MetricsSnapshot) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let broadcaster = self.broadcaster.as_ref().ok_or(BridgeError::MetricsDisabled)?;
        Ok(broadcaster.subscribe(callback, duration))
    }

    /// Broadcaster to drive with [`MetricsBroadcaster::run`], if metrics are on.
    pub fn metrics_broadcaster(&self) -> Option<Arc<MetricsBroadcaster>> {
        self.broadcaster.clone()
    }

    /// Number of live bridges.
    pub fn active_bridges(&self) -> usize {
        self.registry.count()
    }

    /// Tear down every bridge with the normal-closure code.
    pub fn shutdown(&self, reason: &str) {
        let count = self.registry.teardown_all(reason);
        info!(count, reason, "bridges torn down");
    }
}
