//! # livebridge-core
//!
//! Pure building blocks shared by the bridge and its surfaces:
//!
//! - [`retry`]: reconnect backoff policy
//! - [`classify`]: upstream frame classification
//! - [`frames`]: setup and tool-response frame builders
//! - [`errors`]: the bridge error taxonomy
//! - [`session`] / [`hooks`]: capabilities the bridge calls into

#![deny(unsafe_code)]

pub mod classify;
pub mod errors;
pub mod frames;
pub mod hooks;
pub mod retry;
pub mod session;

pub use classify::{ClassifiedEvent, ToolCallEntry, classify};
pub use errors::BridgeError;
pub use frames::SetupConfig;
pub use hooks::{BridgeHooks, LoggingHooks};
pub use retry::{RetryConfig, RetryPolicy};
pub use session::ClientSession;

/// WebSocket close code for a normal, non-retriable closure.
pub const NORMAL_CLOSURE: u16 = 1000;
