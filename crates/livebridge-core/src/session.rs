//! Client session capability.
//!
//! The transport owns the session; bridges only hold a shared reference and
//! emit events through it.

use serde_json::Value;

/// Event carrying a decoded upstream payload.
pub const EVENT_MESSAGE: &str = "message";
/// Event carrying a transcription.
pub const EVENT_TRANSCRIPTION: &str = "transcription";
/// Event signalling the upstream link is open and the queue is drained.
pub const EVENT_READY: &str = "ready";
/// Event carrying a [`BridgeError`](crate::errors::BridgeError) payload.
pub const EVENT_ERROR: &str = "error";

/// A connected client as seen by the bridge.
pub trait ClientSession: Send + Sync {
    /// Unique, stable session identifier.
    fn id(&self) -> &str;

    /// Emit a named event toward the client.
    ///
    /// Returns `false` if the event could not be queued (client gone or
    /// backpressured).
    fn emit(&self, event: &str, data: Value) -> bool;
}
