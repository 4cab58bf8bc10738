//! Client WebSocket transport.
//!
//! Each socket gets a `client_<uuid>` session whose events are written as
//! `{"type": <event>, "data": <payload>}` text frames. Inbound frames are
//! envelopes of the same shape:
//!
//! - `{"type": "message", "data": ...}` → forwarded to the session's bridge
//! - `{"type": "toolResponse", "data": entry | [entries]}` → sent upstream now

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message as WsMessage, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use livebridge_core::{BridgeError, ClientSession};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};
use uuid::Uuid;

use crate::gateway::Gateway;

const SEND_QUEUE_CAPACITY: usize = 256;
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);
/// Close code sent to clients when the server shuts down.
pub const GOING_AWAY: u16 = 1001;

/// Generate a new unique session ID.
pub fn new_session_id() -> String {
    format!("client_{}", Uuid::now_v7())
}

/// Encode an outbound event frame.
pub fn encode_event(event: &str, data: Value) -> String {
    json!({ "type": event, "data": data }).to_string()
}

// ─────────────────────────────────────────────────────────────────────────────
// Inbound frames
// ─────────────────────────────────────────────────────────────────────────────

/// A parsed client frame.
#[derive(Clone, Debug, PartialEq)]
pub enum ClientFrame {
    /// Data for the upstream; `None` when absent or `null`.
    Message(Option<Value>),
    /// Tool response entries.
    ToolResponse(Value),
}

#[derive(Deserialize)]
struct ClientEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Option<Value>,
}

/// Parse a client text frame.
pub fn parse_client_frame(text: &str) -> Result<ClientFrame, BridgeError> {
    let envelope: ClientEnvelope = serde_json::from_str(text)
        .map_err(|e| BridgeError::InvalidClientFrame(e.to_string()))?;
    match envelope.kind.as_str() {
        "message" => Ok(ClientFrame::Message(envelope.data)),
        "toolResponse" => Ok(ClientFrame::ToolResponse(
            envelope.data.unwrap_or(Value::Null),
        )),
        other => Err(BridgeError::InvalidClientFrame(format!(
            "unknown frame type '{other}'"
        ))),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Session
// ─────────────────────────────────────────────────────────────────────────────

enum Outbound {
    Text(String),
    Close { code: u16, reason: String },
}

/// [`ClientSession`] backed by a socket writer task.
pub struct WsClientSession {
    id: String,
    tx: mpsc::Sender<Outbound>,
}

impl WsClientSession {
    fn new(id: String, tx: mpsc::Sender<Outbound>) -> Self {
        Self { id, tx }
    }
}

impl ClientSession for WsClientSession {
    fn id(&self) -> &str {
        &self.id
    }

    fn emit(&self, event: &str, data: Value) -> bool {
        match self.tx.try_send(Outbound::Text(encode_event(event, data))) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(session_id = %self.id, event, "send queue full, dropping event");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Connection loop
// ─────────────────────────────────────────────────────────────────────────────

/// Drive one client socket until it closes or `shutdown` fires.
#[instrument(skip_all, fields(session_id = tracing::field::Empty))]
pub async fn handle_socket(socket: WebSocket, gateway: Arc<Gateway>, shutdown: CancellationToken) {
    let session_id = new_session_id();
    let _ = tracing::Span::current().record("session_id", session_id.as_str());

    let (out_tx, out_rx) = mpsc::channel(SEND_QUEUE_CAPACITY);
    let session = Arc::new(WsClientSession::new(session_id.clone(), out_tx.clone()));
    let _ = gateway.on_connect(session.clone());

    let (ws_tx, mut ws_rx) = socket.split();
    let mut writer = tokio::spawn(write_loop(ws_tx, out_rx));

    let reason = loop {
        tokio::select! {
            () = shutdown.cancelled() => {
                let _ = out_tx.try_send(Outbound::Close {
                    code: GOING_AWAY,
                    reason: "server shutting down".into(),
                });
                break "server shutting down".to_string();
            }
            msg = ws_rx.next() => match msg {
                Some(Ok(WsMessage::Text(text))) => {
                    dispatch(&gateway, &session, text.as_str()).await;
                }
                Some(Ok(WsMessage::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                    Ok(text) => dispatch(&gateway, &session, text).await,
                    Err(e) => gateway.report_client_error(
                        session.as_ref(),
                        &BridgeError::InvalidClientFrame(format!("binary frame is not UTF-8: {e}")),
                    ),
                },
                Some(Ok(WsMessage::Close(frame))) => {
                    break frame.map_or_else(
                        || "client closed".to_string(),
                        |f| format!("client closed ({})", f.code),
                    );
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    gateway.on_transport_error(session.as_ref(), &e.to_string());
                    break "transport error".to_string();
                }
                None => break "client disconnected".to_string(),
            },
        }
    };

    gateway.on_disconnect(&session_id, &reason);
    drop(session);
    drop(out_tx);
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer)
        .await
        .is_err()
    {
        writer.abort();
    }
    debug!(reason, "client socket closed");
}

async fn dispatch(gateway: &Gateway, session: &Arc<WsClientSession>, text: &str) {
    match parse_client_frame(text) {
        Ok(ClientFrame::Message(data)) => {
            let _ = gateway.on_client_message(session.id(), data);
        }
        Ok(ClientFrame::ToolResponse(entries)) => {
            if let Err(e) = gateway.send_tool_response(session.id(), entries).await {
                debug!(code = e.code(), "tool response not delivered");
            }
        }
        Err(e) => gateway.report_client_error(session.as_ref(), &e),
    }
}

async fn write_loop(mut ws_tx: SplitSink<WebSocket, WsMessage>, mut rx: mpsc::Receiver<Outbound>) {
    let mut ping_interval = tokio::time::interval(HEARTBEAT_INTERVAL);
    ping_interval.tick().await; // consume first immediate tick

    loop {
        tokio::select! {
            msg = rx.recv() => match msg {
                Some(Outbound::Text(text)) => {
                    if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Some(Outbound::Close { code, reason }) => {
                    let frame = CloseFrame { code, reason: reason.into() };
                    let _ = ws_tx.send(WsMessage::Close(Some(frame))).await;
                    break;
                }
                None => {
                    let _ = ws_tx.close().await;
                    break;
                }
            },
            _ = ping_interval.tick() => {
                if ws_tx.send(WsMessage::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
                trace!("sent ping");
            }
        }
    }
}
