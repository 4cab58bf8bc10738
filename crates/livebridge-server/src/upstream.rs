//! Upstream connector: a thin client over `tokio-tungstenite`.
//!
//! A connector hands back a handle immediately and drives the socket on a
//! spawned task. Lifecycle events flow back to the owning bridge through an
//! [`UpstreamEventSink`] tagged with the attempt generation, so events from a
//! superseded attempt can be told apart from the live one.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::{debug, warn};

/// Close code used when the peer drops the socket without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;
/// Close code reported when a close frame carries no status.
pub const NO_STATUS_RECEIVED: u16 = 1005;

/// Lifecycle and data events from one upstream connection attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UpstreamEvent {
    /// Handshake completed.
    Opened,
    /// A text frame (binary frames are decoded as UTF-8).
    Message(String),
    /// The connection closed with the given code.
    Closed {
        /// WebSocket close code.
        code: u16,
        /// Close reason, possibly empty.
        reason: String,
    },
    /// The attempt failed or the link broke.
    Failed(String),
}

/// Errors from an upstream handle.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UpstreamError {
    /// The connection is closed or its task has exited.
    #[error("upstream connection is closed")]
    Closed,
}

/// Channel half that delivers events to the owning bridge.
#[derive(Clone, Debug)]
pub struct UpstreamEventSink {
    generation: u64,
    tx: mpsc::UnboundedSender<(u64, UpstreamEvent)>,
}

impl UpstreamEventSink {
    /// Create a sink tagging every event with `generation`.
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<(u64, UpstreamEvent)>) -> Self {
        Self { generation, tx }
    }

    /// Attempt generation this sink belongs to.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Deliver an event. Returns `false` if the bridge is gone.
    pub fn emit(&self, event: UpstreamEvent) -> bool {
        self.tx.send((self.generation, event)).is_ok()
    }
}

/// A live (or pending) upstream connection owned by one bridge.
pub trait UpstreamHandle: Send {
    /// Send a text frame.
    fn send(&self, frame: String) -> Result<(), UpstreamError>;
    /// Close with the given code and reason. Idempotent.
    fn close(&self, code: u16, reason: &str);
    /// Whether the connection is fully closed.
    fn is_closed(&self) -> bool;
}

/// Opens upstream connections.
pub trait UpstreamConnector: Send + Sync {
    /// Start a connection attempt. Must not block; the outcome arrives on `sink`.
    fn connect(&self, sink: UpstreamEventSink) -> Box<dyn UpstreamHandle>;
}

// ─────────────────────────────────────────────────────────────────────────────
// tokio-tungstenite implementation
// ─────────────────────────────────────────────────────────────────────────────

/// Connects to a WebSocket endpoint, appending `key=<api key>` to the query.
#[derive(Clone)]
pub struct TungsteniteConnector {
    url: String,
    api_key: Option<String>,
}

impl TungsteniteConnector {
    /// Create a connector for `url`.
    pub fn new(url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            url: url.into(),
            api_key,
        }
    }

    /// Full endpoint including the API key.
    pub fn endpoint(&self) -> String {
        match self.api_key.as_deref().filter(|k| !k.is_empty()) {
            Some(key) => {
                let sep = if self.url.contains('?') { '&' } else { '?' };
                format!("{}{sep}key={key}", self.url)
            }
            None => self.url.clone(),
        }
    }
}

impl std::fmt::Debug for TungsteniteConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TungsteniteConnector")
            .field("url", &self.url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl UpstreamConnector for TungsteniteConnector {
    fn connect(&self, sink: UpstreamEventSink) -> Box<dyn UpstreamHandle> {
        let (tx, rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        drop(tokio::spawn(connection_loop(
            self.endpoint(),
            rx,
            Arc::clone(&closed),
            sink,
        )));
        Box::new(TungsteniteHandle { tx, closed })
    }
}

enum Outgoing {
    Text(String),
    Close { code: u16, reason: String },
}

struct TungsteniteHandle {
    tx: mpsc::UnboundedSender<Outgoing>,
    closed: Arc<AtomicBool>,
}

impl UpstreamHandle for TungsteniteHandle {
    fn send(&self, frame: String) -> Result<(), UpstreamError> {
        if self.is_closed() {
            return Err(UpstreamError::Closed);
        }
        self.tx
            .send(Outgoing::Text(frame))
            .map_err(|_| UpstreamError::Closed)
    }

    fn close(&self, code: u16, reason: &str) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let _ = self.tx.send(Outgoing::Close {
                code,
                reason: reason.to_string(),
            });
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.tx.is_closed()
    }
}

async fn connection_loop(
    endpoint: String,
    mut rx: mpsc::UnboundedReceiver<Outgoing>,
    closed: Arc<AtomicBool>,
    sink: UpstreamEventSink,
) {
    let generation = sink.generation();
    let ws = match connect_async(endpoint.as_str()).await {
        Ok((ws, _)) => ws,
        Err(e) => {
            closed.store(true, Ordering::Release);
            let _ = sink.emit(UpstreamEvent::Failed(e.to_string()));
            return;
        }
    };
    debug!(generation, "upstream connected");
    let _ = sink.emit(UpstreamEvent::Opened);

    let (mut write, mut read) = ws.split();
    loop {
        tokio::select! {
            cmd = rx.recv() => match cmd {
                Some(Outgoing::Text(text)) => {
                    if let Err(e) = write.send(Message::Text(text.into())).await {
                        closed.store(true, Ordering::Release);
                        let _ = sink.emit(UpstreamEvent::Failed(e.to_string()));
                        break;
                    }
                }
                Some(Outgoing::Close { code, reason }) => {
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: reason.into(),
                    };
                    if let Err(e) = write.send(Message::Close(Some(frame))).await {
                        debug!(generation, error = %e, "upstream close frame not sent");
                    }
                    break;
                }
                None => {
                    // Handle dropped without an explicit close.
                    closed.store(true, Ordering::Release);
                    let _ = write.close().await;
                    break;
                }
            },
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let _ = sink.emit(UpstreamEvent::Message(text.to_string()));
                }
                Some(Ok(Message::Binary(bytes))) => {
                    let text = String::from_utf8_lossy(&bytes).into_owned();
                    let _ = sink.emit(UpstreamEvent::Message(text));
                }
                Some(Ok(Message::Close(frame))) => {
                    closed.store(true, Ordering::Release);
                    let (code, reason) = frame.map_or_else(
                        || (NO_STATUS_RECEIVED, String::new()),
                        |f| (u16::from(f.code), f.reason.to_string()),
                    );
                    let _ = sink.emit(UpstreamEvent::Closed { code, reason });
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    closed.store(true, Ordering::Release);
                    warn!(generation, error = %e, "upstream read error");
                    let _ = sink.emit(UpstreamEvent::Failed(e.to_string()));
                    break;
                }
                None => {
                    closed.store(true, Ordering::Release);
                    let _ = sink.emit(UpstreamEvent::Closed {
                        code: ABNORMAL_CLOSURE,
                        reason: String::new(),
                    });
                    break;
                }
            },
        }
    }
    debug!(generation, "upstream connection task exited");
}
