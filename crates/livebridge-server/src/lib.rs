//! # livebridge-server
//!
//! Per-session bridges between client WebSockets and an upstream realtime API.
//!
//! - [`upstream`]: connector trait and `tokio-tungstenite` implementation
//! - [`bridge`]: the per-session state machine and its actor task
//! - [`registry`]: session ID → bridge mapping
//! - [`gateway`]: transport callbacks, tool responses, metrics access
//! - [`websocket`] / [`server`]: axum transport, `/health`, `/metrics`
//! - [`shutdown`]: cancellation signal and bounded task drain

#![deny(unsafe_code)]

pub mod bridge;
pub mod errors;
pub mod gateway;
pub mod health;
pub mod registry;
pub mod server;
pub mod shutdown;
pub mod upstream;
pub mod websocket;

#[cfg(test)]
mod testing;

pub use bridge::{BridgeConfig, BridgeContext, BridgeHandle, ConnectionBridge, UpstreamState};
pub use errors::ServerError;
pub use gateway::Gateway;
pub use registry::BridgeRegistry;
pub use server::{AppState, ServerHandle, build_router, start};
pub use shutdown::{DrainOutcome, ShutdownCoordinator};
pub use upstream::{TungsteniteConnector, UpstreamConnector, UpstreamEvent, UpstreamHandle};
