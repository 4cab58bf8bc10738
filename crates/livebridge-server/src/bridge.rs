//! Per-session connection bridge.
//!
//! [`ConnectionBridge`] is a plain state machine: every input (client message,
//! upstream event, reconnect timer, tool response, teardown) is a synchronous
//! method that mutates the bridge and emits side effects through the session,
//! the hooks, the metrics aggregate, and the upstream handle.
//!
//! [`spawn_bridge`] runs one bridge as an actor task. The task owns the bridge
//! exclusively and multiplexes three sources with `select!`:
//!
//! - commands from [`BridgeHandle`] (client messages, tool responses, teardown)
//! - upstream events tagged with the attempt generation
//! - the reconnect backoff timer
//!
//! Dropping out of the loop drops the timer, so a pending reconnect can never
//! fire for a destroyed bridge.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use livebridge_core::frames::{setup_frame, tool_response_frame};
use livebridge_core::session::{EVENT_ERROR, EVENT_MESSAGE, EVENT_READY, EVENT_TRANSCRIPTION};
use livebridge_core::{
    BridgeError, BridgeHooks, ClassifiedEvent, ClientSession, NORMAL_CLOSURE, RetryPolicy,
    SetupConfig, classify,
};
use livebridge_telemetry::MetricsAggregate;
use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::upstream::{UpstreamConnector, UpstreamEvent, UpstreamEventSink, UpstreamHandle};

/// Upper bound on a single reconnect sleep, keeps `Instant` arithmetic in range.
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Lifecycle of the bridge's upstream link.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpstreamState {
    /// No attempt has been made yet.
    Absent,
    /// An attempt is in flight.
    Connecting,
    /// Handshake done, setup sent, queue drained.
    Open,
    /// Teardown closed a live handle; upstream has not confirmed yet.
    Closing,
    /// Closed, normally or abnormally.
    Closed,
}

/// Immutable per-bridge configuration, shared by all bridges.
#[derive(Clone, Debug)]
pub struct BridgeConfig {
    retry: RetryPolicy,
    setup_frame: String,
    max_queued_messages: usize,
}

impl BridgeConfig {
    /// Build a config. The setup frame is serialized once here.
    pub fn new(retry: RetryPolicy, setup: &SetupConfig, max_queued_messages: usize) -> Self {
        Self {
            retry,
            setup_frame: setup_frame(setup).to_string(),
            max_queued_messages: max_queued_messages.max(1),
        }
    }

    /// Reconnect policy.
    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Serialized setup frame sent on every successful open.
    pub fn setup_frame(&self) -> &str {
        &self.setup_frame
    }

    /// Outbound queue bound.
    pub fn max_queued_messages(&self) -> usize {
        self.max_queued_messages
    }
}

/// Collaborators shared by every bridge in the process.
#[derive(Clone)]
pub struct BridgeContext {
    /// Opens upstream connections.
    pub connector: Arc<dyn UpstreamConnector>,
    /// Lifecycle callbacks.
    pub hooks: Arc<dyn BridgeHooks>,
    /// Shared counters, `None` when metrics are disabled.
    pub metrics: Option<Arc<MetricsAggregate>>,
    /// Bridge configuration.
    pub config: Arc<BridgeConfig>,
}

/// Turn client message data into an upstream text frame.
///
/// Strings are forwarded verbatim, other JSON values are serialized. Absent,
/// `null`, and empty-string data yield `None`.
pub fn outbound_frame(data: Option<Value>) -> Option<String> {
    match data? {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

/// One client session's upstream supervisor.
pub struct ConnectionBridge {
    session: Arc<dyn ClientSession>,
    ctx: BridgeContext,
    events_tx: mpsc::UnboundedSender<(u64, UpstreamEvent)>,
    state: UpstreamState,
    attempt_count: u32,
    queue: VecDeque<String>,
    upstream: Option<Box<dyn UpstreamHandle>>,
    generation: u64,
    reconnect_pending: bool,
    scheduled_delay: Option<Duration>,
    halted: bool,
    torn_down: bool,
}

impl ConnectionBridge {
    /// Create a bridge in the `Absent` state. Upstream events for its
    /// attempts are delivered on `events_tx`.
    pub fn new(
        session: Arc<dyn ClientSession>,
        ctx: BridgeContext,
        events_tx: mpsc::UnboundedSender<(u64, UpstreamEvent)>,
    ) -> Self {
        Self {
            session,
            ctx,
            events_tx,
            state: UpstreamState::Absent,
            attempt_count: 0,
            queue: VecDeque::new(),
            upstream: None,
            generation: 0,
            reconnect_pending: false,
            scheduled_delay: None,
            halted: false,
            torn_down: false,
        }
    }

    /// Session this bridge serves.
    pub fn session_id(&self) -> &str {
        self.session.id()
    }

    /// Current upstream state.
    pub fn state(&self) -> UpstreamState {
        self.state
    }

    /// Attempts since the last successful open.
    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Number of frames waiting for an open upstream.
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Whether reconnect attempts were exhausted.
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Whether a reconnect is scheduled and not yet due.
    pub fn is_reconnect_pending(&self) -> bool {
        self.reconnect_pending
    }

    /// Take the delay of a newly scheduled reconnect, if any. The caller arms
    /// a timer and calls [`reconnect_due`](Self::reconnect_due) when it fires.
    pub fn take_scheduled_reconnect(&mut self) -> Option<Duration> {
        self.scheduled_delay.take()
    }

    // ── Outbound (client → upstream) ────────────────────────────────

    /// Forward or queue a client message.
    pub fn handle_client_message(&mut self, data: Option<Value>) -> Result<(), BridgeError> {
        let Some(frame) = outbound_frame(data) else {
            return Err(self.report(BridgeError::EmptyMessage));
        };
        if self.torn_down || self.halted {
            return Err(self.report(BridgeError::BridgeHalted));
        }

        if self.state == UpstreamState::Open {
            if let Some(handle) = self.upstream.as_ref().filter(|h| !h.is_closed()) {
                return handle
                    .send(frame)
                    .map_err(|e| self.report(BridgeError::UpstreamSendFailure(e.to_string())));
            }
        }

        let limit = self.ctx.config.max_queued_messages();
        if self.queue.len() >= limit {
            return Err(self.report(BridgeError::OutboundQueueFull { limit }));
        }
        self.queue.push_back(frame);
        debug!(session_id = self.session_id(), queued = self.queue.len(), "message queued");

        if self.needs_connect() {
            self.start_connect();
        }
        Ok(())
    }

    /// Send a tool response immediately. Never queued.
    pub fn send_tool_response(&mut self, entries: Value) -> Result<(), BridgeError> {
        let handle = match self.upstream.as_ref() {
            Some(h) if self.state == UpstreamState::Open && !h.is_closed() => h,
            _ => return Err(self.report(BridgeError::ToolResponseNotReady)),
        };
        handle
            .send(tool_response_frame(entries).to_string())
            .map_err(|e| self.report(BridgeError::UpstreamSendFailure(e.to_string())))
    }

    // ── Inbound (upstream → bridge) ─────────────────────────────────

    /// Process one event from upstream attempt `generation`.
    pub fn handle_upstream_event(&mut self, generation: u64, event: UpstreamEvent) {
        if self.torn_down && generation == self.generation {
            if self.state == UpstreamState::Closing
                && matches!(event, UpstreamEvent::Closed { .. } | UpstreamEvent::Failed(_))
            {
                self.state = UpstreamState::Closed;
                debug!(session_id = self.session_id(), "upstream close confirmed");
            }
            return;
        }
        if generation != self.generation {
            debug!(
                session_id = self.session_id(),
                generation,
                current = self.generation,
                "ignoring stale upstream event"
            );
            return;
        }
        match event {
            UpstreamEvent::Opened => self.on_open(),
            UpstreamEvent::Message(text) => self.on_upstream_message(&text),
            UpstreamEvent::Closed { code, reason } => self.on_closed(code, &reason),
            UpstreamEvent::Failed(err) => {
                let _ = self.report_hidden(BridgeError::UpstreamConnection(err));
                self.on_abnormal_close();
            }
        }
    }

    /// The backoff timer fired.
    pub fn reconnect_due(&mut self) {
        if !self.reconnect_pending || self.torn_down || self.halted {
            return;
        }
        self.reconnect_pending = false;
        if matches!(self.state, UpstreamState::Connecting | UpstreamState::Open) {
            return;
        }
        self.start_connect();
    }

    /// Close the upstream with the normal-closure code and release the
    /// session. Returns `false` if already torn down.
    pub fn teardown(&mut self, reason: &str) -> bool {
        if self.torn_down {
            return false;
        }
        self.torn_down = true;
        self.reconnect_pending = false;
        self.scheduled_delay = None;

        self.state = match self.upstream.take() {
            Some(handle) if !handle.is_closed() => {
                handle.close(NORMAL_CLOSURE, reason);
                UpstreamState::Closing
            }
            _ => UpstreamState::Closed,
        };

        if !self.queue.is_empty() {
            debug!(
                session_id = self.session_id(),
                dropped = self.queue.len(),
                "discarding queued messages on teardown"
            );
            self.queue.clear();
        }

        self.ctx.hooks.on_disconnect(self.session.as_ref(), reason);
        if let Some(ref metrics) = self.ctx.metrics {
            metrics.decrement_active();
        }
        info!(session_id = self.session_id(), reason, "bridge torn down");
        true
    }

    // ── Transitions ─────────────────────────────────────────────────

    fn needs_connect(&self) -> bool {
        !self.reconnect_pending
            && self.state != UpstreamState::Connecting
            && self.upstream.as_ref().is_none_or(|h| h.is_closed())
    }

    fn start_connect(&mut self) {
        if self.halted || self.torn_down {
            return;
        }
        self.attempt_count += 1;
        let max_attempts = self.ctx.config.retry().max_attempts();
        if self.attempt_count > max_attempts {
            self.exhaust(max_attempts);
            return;
        }

        if let Some(stale) = self.upstream.take() {
            stale.close(NORMAL_CLOSURE, "superseded");
        }
        self.generation += 1;
        self.state = UpstreamState::Connecting;
        info!(
            session_id = self.session_id(),
            attempt = self.attempt_count,
            max_attempts,
            "connecting upstream"
        );
        let sink = UpstreamEventSink::new(self.generation, self.events_tx.clone());
        self.upstream = Some(self.ctx.connector.connect(sink));
    }

    fn on_open(&mut self) {
        self.state = UpstreamState::Open;
        self.attempt_count = 0;
        self.reconnect_pending = false;
        self.scheduled_delay = None;

        let Some(handle) = self.upstream.as_ref() else {
            return;
        };

        // Setup first, then the queue in FIFO order, then ready.
        if let Err(e) = handle.send(self.ctx.config.setup_frame().to_string()) {
            let _ = self.report(BridgeError::UpstreamSendFailure(e.to_string()));
            return;
        }
        let mut failure = None;
        while let Some(frame) = self.queue.pop_front() {
            if let Err(e) = handle.send(frame.clone()) {
                self.queue.push_front(frame);
                failure = Some(e);
                break;
            }
        }
        if let Some(e) = failure {
            let _ = self.report(BridgeError::UpstreamSendFailure(e.to_string()));
            return;
        }

        info!(session_id = self.session_id(), "upstream open");
        let _ = self.session.emit(
            EVENT_READY,
            json!({ "timestamp": Utc::now().timestamp_millis() }),
        );
    }

    fn on_upstream_message(&mut self, text: &str) {
        let decoded = match serde_json::from_str::<Value>(text) {
            Ok(value) => value,
            Err(e) => {
                // Forward the raw text rather than dropping it.
                let _ = self.report(BridgeError::UpstreamDecodeFailure(e.to_string()));
                Value::String(text.to_string())
            }
        };

        let session = self.session.as_ref();
        match classify(&decoded) {
            ClassifiedEvent::Transcription { text, timestamp } => {
                let _ = session.emit(
                    EVENT_TRANSCRIPTION,
                    json!({ "text": text, "timestamp": timestamp.timestamp_millis() }),
                );
            }
            ClassifiedEvent::ToolCall { entries } => {
                let _ = session.emit(EVENT_MESSAGE, decoded.clone());
                for entry in &entries {
                    self.ctx.hooks.on_tool_call(entry, session);
                }
            }
            ClassifiedEvent::Generic { .. } => {
                let _ = session.emit(EVENT_MESSAGE, decoded.clone());
            }
        }

        self.ctx.hooks.on_message(&decoded, session);
        if let Some(ref metrics) = self.ctx.metrics {
            metrics.increment_messages();
        }
    }

    fn on_closed(&mut self, code: u16, reason: &str) {
        if code == NORMAL_CLOSURE {
            info!(session_id = self.session_id(), reason, "upstream closed normally");
            self.upstream = None;
            self.state = UpstreamState::Closed;
            return;
        }
        warn!(session_id = self.session_id(), code, reason, "upstream closed abnormally");
        self.on_abnormal_close();
    }

    fn on_abnormal_close(&mut self) {
        self.upstream = None;
        self.state = UpstreamState::Closed;

        let retry = *self.ctx.config.retry();
        if retry.should_retry(self.attempt_count) {
            let delay = retry.delay_for(self.attempt_count);
            self.reconnect_pending = true;
            self.scheduled_delay = Some(delay);
            warn!(
                session_id = self.session_id(),
                attempt = self.attempt_count,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "scheduling upstream reconnect"
            );
        } else {
            self.exhaust(self.attempt_count);
        }
    }

    fn exhaust(&mut self, attempts: u32) {
        self.halted = true;
        self.reconnect_pending = false;
        self.scheduled_delay = None;
        self.state = UpstreamState::Closed;
        if !self.queue.is_empty() {
            warn!(
                session_id = self.session_id(),
                undelivered = self.queue.len(),
                "reconnect exhausted with queued messages"
            );
        }
        let _ = self.report(BridgeError::UpstreamConnectExhausted { attempts });
    }

    // ── Error reporting ─────────────────────────────────────────────

    /// Client error event, error hook, error counter.
    fn report(&self, error: BridgeError) -> BridgeError {
        let _ = self.session.emit(EVENT_ERROR, error.to_payload());
        self.report_hidden(error)
    }

    /// Error hook and counter only.
    fn report_hidden(&self, error: BridgeError) -> BridgeError {
        self.ctx.hooks.on_error(&error, self.session.as_ref());
        if let Some(ref metrics) = self.ctx.metrics {
            metrics.increment_errors();
        }
        error
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Actor
// ─────────────────────────────────────────────────────────────────────────────

/// Input to a running bridge task.
#[derive(Debug)]
pub enum BridgeCommand {
    /// Data of a client `message` frame.
    ClientMessage(Option<Value>),
    /// Out-of-band tool response.
    ToolResponse {
        /// Entry or list of entries.
        entries: Value,
        /// Receives the send outcome.
        reply: oneshot::Sender<Result<(), BridgeError>>,
    },
    /// Tear down and stop the task.
    Teardown {
        /// Reason passed to the upstream close and the disconnect hook.
        reason: String,
    },
}

/// Cheap, cloneable handle to a running bridge task.
#[derive(Clone, Debug)]
pub struct BridgeHandle {
    session_id: Arc<str>,
    tx: mpsc::UnboundedSender<BridgeCommand>,
}

impl BridgeHandle {
    /// Session this bridge serves.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Forward client message data. Returns `false` if the task has exited.
    pub fn send_message(&self, data: Option<Value>) -> bool {
        self.tx.send(BridgeCommand::ClientMessage(data)).is_ok()
    }

    /// Send a tool response and wait for the outcome.
    pub async fn send_tool_response(&self, entries: Value) -> Result<(), BridgeError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(BridgeCommand::ToolResponse { entries, reply })
            .map_err(|_| BridgeError::SessionNotFound(self.session_id.to_string()))?;
        rx.await
            .map_err(|_| BridgeError::SessionNotFound(self.session_id.to_string()))?
    }

    /// Ask the task to tear down. Returns `false` if it has already exited.
    pub fn teardown(&self, reason: impl Into<String>) -> bool {
        self.tx
            .send(BridgeCommand::Teardown {
                reason: reason.into(),
            })
            .is_ok()
    }

    /// Whether the task has exited.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Spawn a bridge for `session` as its own task.
pub fn spawn_bridge(
    session: Arc<dyn ClientSession>,
    ctx: BridgeContext,
) -> (BridgeHandle, JoinHandle<()>) {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (tx, rx) = mpsc::unbounded_channel();
    let session_id: Arc<str> = Arc::from(session.id());
    let bridge = ConnectionBridge::new(session, ctx, events_tx);
    let task = tokio::spawn(run_bridge(bridge, rx, events_rx));
    (BridgeHandle { session_id, tx }, task)
}

async fn run_bridge(
    mut bridge: ConnectionBridge,
    mut commands: mpsc::UnboundedReceiver<BridgeCommand>,
    mut events: mpsc::UnboundedReceiver<(u64, UpstreamEvent)>,
) {
    let timer = tokio::time::sleep(Duration::ZERO);
    tokio::pin!(timer);
    let mut timer_armed = false;

    loop {
        if let Some(delay) = bridge.take_scheduled_reconnect() {
            timer
                .as_mut()
                .reset(Instant::now() + delay.min(MAX_RECONNECT_DELAY));
            timer_armed = true;
        }

        tokio::select! {
            cmd = commands.recv() => match cmd {
                Some(BridgeCommand::ClientMessage(data)) => {
                    let _ = bridge.handle_client_message(data);
                }
                Some(BridgeCommand::ToolResponse { entries, reply }) => {
                    let _ = reply.send(bridge.send_tool_response(entries));
                }
                Some(BridgeCommand::Teardown { reason }) => {
                    let _ = bridge.teardown(&reason);
                    break;
                }
                None => {
                    let _ = bridge.teardown("bridge handle dropped");
                    break;
                }
            },
            Some((generation, event)) = events.recv() => {
                bridge.handle_upstream_event(generation, event);
            }
            () = &mut timer, if timer_armed => {
                timer_armed = false;
                bridge.reconnect_due();
            }
        }
    }
    debug!(session_id = bridge.session_id(), "bridge task exited");
}
