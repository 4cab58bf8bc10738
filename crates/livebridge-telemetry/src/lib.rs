//! # livebridge-telemetry
//!
//! Logging setup and session metrics.
//!
//! - [`init_logging`]: global `tracing` subscriber with `EnvFilter` and JSON or text output
//! - [`MetricsAggregate`]: shared counters updated by bridges
//! - [`MetricsBroadcaster`]: periodic snapshot delivery to subscribers

#![deny(unsafe_code)]

mod logging;
mod metrics;

pub use logging::{LoggingConfig, init_logging};
pub use metrics::{
    MetricsAggregate, MetricsBroadcaster, MetricsCallback, MetricsSnapshot, MetricsSubscription,
};
