//! Bridge lifecycle hooks.
//!
//! Every method has a provided implementation that logs and continues, so
//! implementors override only what they need.

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::classify::ToolCallEntry;
use crate::errors::BridgeError;
use crate::session::ClientSession;

/// Callbacks invoked by bridges and the gateway.
pub trait BridgeHooks: Send + Sync {
    /// A client session was accepted.
    fn on_client_connect(&self, session: &dyn ClientSession) {
        info!(session_id = session.id(), "client connected");
    }

    /// An upstream frame was decoded (every frame, regardless of category).
    fn on_message(&self, decoded: &Value, session: &dyn ClientSession) {
        debug!(session_id = session.id(), bytes = decoded.to_string().len(), "upstream message");
    }

    /// The upstream requested a tool invocation. Called once per entry.
    fn on_tool_call(&self, entry: &ToolCallEntry, session: &dyn ClientSession) {
        info!(
            session_id = session.id(),
            tool = %entry.name,
            call_id = ?entry.id,
            "tool call"
        );
    }

    /// The client session ended.
    fn on_disconnect(&self, session: &dyn ClientSession, reason: &str) {
        info!(session_id = session.id(), reason, "client disconnected");
    }

    /// A bridge error occurred.
    fn on_error(&self, error: &BridgeError, session: &dyn ClientSession) {
        warn!(session_id = session.id(), code = error.code(), error = %error, "bridge error");
    }
}

/// Hooks that only log.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingHooks;

impl BridgeHooks for LoggingHooks {}
