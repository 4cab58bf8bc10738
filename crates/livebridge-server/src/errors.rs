//! Server error types.

use thiserror::Error;

/// Errors starting the HTTP / WebSocket server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Binding the listener failed.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested.
        addr: String,
        /// Underlying error.
        source: std::io::Error,
    },
    /// Any other I/O failure.
    #[error("server I/O error: {0}")]
    Io(#[from] std::io::Error),
}
