//! Recording fakes shared by unit tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use livebridge_core::session::EVENT_ERROR;
use livebridge_core::{BridgeError, BridgeHooks, ClientSession, ToolCallEntry};
use parking_lot::Mutex;
use serde_json::Value;

use crate::upstream::{UpstreamConnector, UpstreamError, UpstreamEvent, UpstreamEventSink, UpstreamHandle};

// ── ClientSession ───────────────────────────────────────────────────────────

pub struct RecordingSession {
    id: String,
    pub events: Mutex<Vec<(String, Value)>>,
}

impl RecordingSession {
    pub fn new(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            events: Mutex::new(Vec::new()),
        })
    }

    pub fn events_named(&self, name: &str) -> Vec<Value> {
        self.events
            .lock()
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, v)| v.clone())
            .collect()
    }

    pub fn error_codes(&self) -> Vec<String> {
        self.events_named(EVENT_ERROR)
            .iter()
            .filter_map(|v| v["code"].as_str().map(String::from))
            .collect()
    }

    pub fn event_names(&self) -> Vec<String> {
        self.events.lock().iter().map(|(n, _)| n.clone()).collect()
    }
}

impl ClientSession for RecordingSession {
    fn id(&self) -> &str {
        &self.id
    }

    fn emit(&self, event: &str, data: Value) -> bool {
        self.events.lock().push((event.to_string(), data));
        true
    }
}

// ── BridgeHooks ─────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingHooks {
    pub connects: Mutex<Vec<String>>,
    pub messages: Mutex<Vec<Value>>,
    pub tool_calls: Mutex<Vec<ToolCallEntry>>,
    pub disconnects: Mutex<Vec<(String, String)>>,
    pub errors: Mutex<Vec<BridgeError>>,
}

impl BridgeHooks for RecordingHooks {
    fn on_client_connect(&self, session: &dyn ClientSession) {
        self.connects.lock().push(session.id().to_string());
    }
    fn on_message(&self, decoded: &Value, _session: &dyn ClientSession) {
        self.messages.lock().push(decoded.clone());
    }
    fn on_tool_call(&self, entry: &ToolCallEntry, _session: &dyn ClientSession) {
        self.tool_calls.lock().push(entry.clone());
    }
    fn on_disconnect(&self, session: &dyn ClientSession, reason: &str) {
        self.disconnects
            .lock()
            .push((session.id().to_string(), reason.to_string()));
    }
    fn on_error(&self, error: &BridgeError, _session: &dyn ClientSession) {
        self.errors.lock().push(error.clone());
    }
}

// ── UpstreamConnector ───────────────────────────────────────────────────────

/// How a fake connection behaves right after `connect`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OnConnect {
    /// Stay pending; the test drives events by hand.
    Pending,
    /// Emit `Opened` immediately.
    Open,
    /// Emit `Failed` immediately.
    Fail,
}

/// One connection handed out by [`FakeConnector`].
#[derive(Clone)]
pub struct FakeConnection {
    pub sink: UpstreamEventSink,
    pub sent: Arc<Mutex<Vec<String>>>,
    pub closed_with: Arc<Mutex<Option<(u16, String)>>>,
    pub fail_sends: Arc<AtomicBool>,
}

impl FakeConnection {
    pub fn generation(&self) -> u64 {
        self.sink.generation()
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    pub fn sent_json(&self) -> Vec<Value> {
        self.sent()
            .iter()
            .map(|s| serde_json::from_str(s).unwrap_or_else(|_| Value::String(s.clone())))
            .collect()
    }
}

struct FakeHandle {
    conn: FakeConnection,
}

impl UpstreamHandle for FakeHandle {
    fn send(&self, frame: String) -> Result<(), UpstreamError> {
        if self.conn.fail_sends.load(Ordering::SeqCst) || self.is_closed() {
            return Err(UpstreamError::Closed);
        }
        self.conn.sent.lock().push(frame);
        Ok(())
    }

    fn close(&self, code: u16, reason: &str) {
        let mut closed = self.conn.closed_with.lock();
        if closed.is_none() {
            *closed = Some((code, reason.to_string()));
        }
    }

    fn is_closed(&self) -> bool {
        self.conn.closed_with.lock().is_some()
    }
}

pub struct FakeConnector {
    behavior: Mutex<OnConnect>,
    pub connections: Mutex<Vec<FakeConnection>>,
}

impl FakeConnector {
    pub fn new(behavior: OnConnect) -> Arc<Self> {
        Arc::new(Self {
            behavior: Mutex::new(behavior),
            connections: Mutex::new(Vec::new()),
        })
    }

    pub fn set_behavior(&self, behavior: OnConnect) {
        *self.behavior.lock() = behavior;
    }

    pub fn count(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn last(&self) -> FakeConnection {
        self.connections.lock().last().cloned().unwrap()
    }
}

impl UpstreamConnector for FakeConnector {
    fn connect(&self, sink: UpstreamEventSink) -> Box<dyn UpstreamHandle> {
        let conn = FakeConnection {
            sink: sink.clone(),
            sent: Arc::new(Mutex::new(Vec::new())),
            closed_with: Arc::new(Mutex::new(None)),
            fail_sends: Arc::new(AtomicBool::new(false)),
        };
        self.connections.lock().push(conn.clone());
        match *self.behavior.lock() {
            OnConnect::Pending => {}
            OnConnect::Open => {
                let _ = sink.emit(UpstreamEvent::Opened);
            }
            OnConnect::Fail => {
                let _ = sink.emit(UpstreamEvent::Failed("connection refused".into()));
            }
        }
        Box::new(FakeHandle { conn })
    }
}
