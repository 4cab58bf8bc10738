//! Error taxonomy for bridge operations.
//!
//! Every variant is recovered locally. Bridge-side errors are reported to the
//! client as an `error` event, passed to
//! [`BridgeHooks::on_error`](crate::hooks::BridgeHooks::on_error), and counted.
//! Exceptions:
//!
//! - [`BridgeError::UpstreamConnection`] and [`BridgeError::Transport`] go to
//!   the hook and the counter only; the client learns the outcome from `ready`
//!   or exhaustion.
//! - [`BridgeError::SessionNotFound`] and [`BridgeError::MetricsDisabled`] are
//!   returned to the caller only, since no session is involved.
//!
//! Only [`BridgeError::UpstreamConnectExhausted`] stops a session's reconnect
//! attempts.

use serde_json::{Value, json};
use thiserror::Error;

/// Errors surfaced by a connection bridge or the gateway around it.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum BridgeError {
    /// The client sent an empty or absent message.
    #[error("message is empty")]
    EmptyMessage,

    /// Sending on an open upstream handle failed.
    #[error("failed to send to upstream: {0}")]
    UpstreamSendFailure(String),

    /// An inbound upstream frame was not valid JSON; it is forwarded as raw text.
    #[error("failed to decode upstream frame: {0}")]
    UpstreamDecodeFailure(String),

    /// The upstream connection could not be established within the retry budget.
    #[error("upstream connection failed after {attempts} attempts")]
    UpstreamConnectExhausted {
        /// Number of attempts made before giving up.
        attempts: u32,
    },

    /// A tool response was sent while no upstream connection was open.
    #[error("upstream is not ready for tool responses")]
    ToolResponseNotReady,

    /// Metrics were accessed while the feature is disabled.
    #[error("metrics are disabled")]
    MetricsDisabled,

    /// A single upstream connection attempt failed or the link dropped.
    #[error("upstream connection error: {0}")]
    UpstreamConnection(String),

    /// The outbound queue reached its configured bound.
    #[error("outbound queue is full ({limit} messages)")]
    OutboundQueueFull {
        /// Configured queue bound.
        limit: usize,
    },

    /// The bridge gave up reconnecting; the client must reconnect to retry.
    #[error("bridge halted after exhausting reconnect attempts")]
    BridgeHalted,

    /// No bridge is registered for the session.
    #[error("no bridge for session {0}")]
    SessionNotFound(String),

    /// The client sent a frame that is not a valid envelope.
    #[error("invalid client frame: {0}")]
    InvalidClientFrame(String),

    /// The client transport reported an error.
    #[error("transport error: {0}")]
    Transport(String),
}

impl BridgeError {
    /// Stable machine-readable code sent to clients.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::EmptyMessage => "EMPTY_MESSAGE",
            Self::UpstreamSendFailure(_) => "UPSTREAM_SEND_FAILURE",
            Self::UpstreamDecodeFailure(_) => "UPSTREAM_DECODE_FAILURE",
            Self::UpstreamConnectExhausted { .. } => "UPSTREAM_CONNECT_EXHAUSTED",
            Self::ToolResponseNotReady => "TOOL_RESPONSE_NOT_READY",
            Self::MetricsDisabled => "METRICS_DISABLED",
            Self::UpstreamConnection(_) => "UPSTREAM_CONNECTION",
            Self::OutboundQueueFull { .. } => "OUTBOUND_QUEUE_FULL",
            Self::BridgeHalted => "BRIDGE_HALTED",
            Self::SessionNotFound(_) => "SESSION_NOT_FOUND",
            Self::InvalidClientFrame(_) => "INVALID_CLIENT_FRAME",
            Self::Transport(_) => "TRANSPORT_ERROR",
        }
    }

    /// Whether this error ends the session's reconnect attempts.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::UpstreamConnectExhausted { .. })
    }

    /// Payload of the client-facing `error` event.
    #[must_use]
    pub fn to_payload(&self) -> Value {
        json!({
            "code": self.code(),
            "message": self.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_screaming_snake_case() {
        let all = [
            BridgeError::EmptyMessage,
            BridgeError::UpstreamSendFailure("x".into()),
            BridgeError::UpstreamDecodeFailure("x".into()),
            BridgeError::UpstreamConnectExhausted { attempts: 3 },
            BridgeError::ToolResponseNotReady,
            BridgeError::MetricsDisabled,
            BridgeError::UpstreamConnection("x".into()),
            BridgeError::OutboundQueueFull { limit: 10 },
            BridgeError::BridgeHalted,
            BridgeError::SessionNotFound("s".into()),
            BridgeError::InvalidClientFrame("x".into()),
            BridgeError::Transport("x".into()),
        ];
        for err in &all {
            let code = err.code();
            assert!(
                code.chars().all(|c| c.is_ascii_uppercase() || c == '_'),
                "code '{code}' must be SCREAMING_SNAKE_CASE"
            );
        }
    }

    #[test]
    fn only_exhaustion_is_fatal() {
        assert!(BridgeError::UpstreamConnectExhausted { attempts: 1 }.is_fatal());
        assert!(!BridgeError::UpstreamSendFailure("boom".into()).is_fatal());
        assert!(!BridgeError::ToolResponseNotReady.is_fatal());
        assert!(!BridgeError::BridgeHalted.is_fatal());
    }

    #[test]
    fn payload_carries_code_and_message() {
        let payload = BridgeError::UpstreamConnectExhausted { attempts: 3 }.to_payload();
        assert_eq!(payload["code"], "UPSTREAM_CONNECT_EXHAUSTED");
        assert_eq!(payload["message"], "upstream connection failed after 3 attempts");
    }

    #[test]
    fn display_includes_context() {
        let err = BridgeError::OutboundQueueFull { limit: 1000 };
        assert_eq!(err.to_string(), "outbound queue is full (1000 messages)");
        let err = BridgeError::SessionNotFound("client_1".into());
        assert!(err.to_string().contains("client_1"));
    }
}
