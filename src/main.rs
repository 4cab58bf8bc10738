//! # livebridge
//!
//! Bridge server binary: loads settings, initializes logging, and serves
//! client WebSockets that are proxied to the upstream realtime API.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use livebridge_core::LoggingHooks;
use livebridge_server::{Gateway, ShutdownCoordinator};
use livebridge_settings::{LiveBridgeSettings, load_settings, load_settings_from_path};
use livebridge_telemetry::{LoggingConfig, init_logging};
use tracing::{debug, info, warn};

/// Per-session WebSocket bridge to a realtime streaming API.
#[derive(Parser, Debug)]
#[command(name = "livebridge", version, about)]
struct Cli {
    /// Settings file (default: `~/.livebridge/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Log level or filter directive (overrides settings).
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON logs.
    #[arg(long)]
    log_json: bool,
}

impl Cli {
    fn resolve_settings(&self) -> Result<LiveBridgeSettings> {
        let mut settings = match self.config {
            Some(ref path) => load_settings_from_path(path)
                .with_context(|| format!("failed to load settings from {}", path.display()))?,
            None => load_settings().context("failed to load settings")?,
        };
        if let Some(ref host) = self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(ref level) = self.log_level {
            settings.logging.level.clone_from(level);
        }
        if self.log_json {
            settings.logging.json = true;
        }
        settings.validate().context("invalid settings")?;
        Ok(settings)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = cli.resolve_settings()?;

    init_logging(&LoggingConfig {
        level: settings.logging.level.clone(),
        module_levels: Vec::new(),
        json: settings.logging.json,
    })?;

    let _ = rustls::crypto::ring::default_provider().install_default();

    if settings.upstream.api_key.is_none() {
        warn!("no upstream API key configured (set GEMINI_API_KEY or upstream.apiKey)");
    }

    let gateway = Arc::new(Gateway::from_settings(&settings, Arc::new(LoggingHooks)));
    let mut shutdown = ShutdownCoordinator::new();

    if let Some(broadcaster) = gateway.metrics_broadcaster() {
        let _subscription = gateway.subscribe_to_metrics(
            |snapshot| {
                debug!(
                    active_sessions = snapshot.active_sessions,
                    messages_processed = snapshot.messages_processed,
                    errors = snapshot.errors,
                    "metrics"
                );
                Ok(())
            },
            None,
        )?;
        let interval = Duration::from_millis(settings.metrics.interval_ms);
        let token = shutdown.token();
        shutdown.spawn(async move {
            broadcaster.run(interval, token).await;
        });
    }

    let server = livebridge_server::start(&settings.server, Arc::clone(&gateway), shutdown.token())
        .await
        .context("failed to start server")?;
    info!(
        port = server.port(),
        upstream = %settings.upstream.url,
        model = %settings.upstream.setup.model,
        "livebridge ready"
    );
    shutdown.track(server.into_task());

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl+c")?;
    info!("shutting down");

    gateway.shutdown("server shutting down");
    let _ = shutdown.drain().await;
    Ok(())
}
