//! Axum router and listener.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use livebridge_settings::ServerSettings;
use serde_json::json;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::errors::ServerError;
use crate::gateway::Gateway;
use crate::health::health_check;
use crate::websocket::handle_socket;

/// Shared state passed to handlers.
#[derive(Clone)]
pub struct AppState {
    /// Bridge gateway.
    pub gateway: Arc<Gateway>,
    /// Server start time, for uptime.
    pub started: Instant,
    /// Cancelled on shutdown; closes client sockets.
    pub shutdown: CancellationToken,
    /// Max inbound client message size in bytes.
    pub max_message_size: usize,
}

/// Build the router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Handle returned by [`start`].
pub struct ServerHandle {
    addr: SocketAddr,
    task: JoinHandle<()>,
}

impl ServerHandle {
    /// Bound address (useful with port 0).
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Bound port.
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// The serve task, for shutdown coordination.
    pub fn into_task(self) -> JoinHandle<()> {
        self.task
    }
}

/// Bind and serve until `shutdown` is cancelled.
pub async fn start(
    settings: &ServerSettings,
    gateway: Arc<Gateway>,
    shutdown: CancellationToken,
) -> Result<ServerHandle, ServerError> {
    let bind_addr = format!("{}:{}", settings.host, settings.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|source| ServerError::Bind {
            addr: bind_addr.clone(),
            source,
        })?;
    let addr = listener.local_addr()?;

    let router = build_router(AppState {
        gateway,
        started: Instant::now(),
        shutdown: shutdown.clone(),
        max_message_size: settings.max_message_size,
    });

    info!(%addr, "livebridge server listening");
    let task = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await
        {
            error!(error = %e, "server error");
        }
        info!("server stopped");
    });

    Ok(ServerHandle { addr, task })
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.max_message_size(state.max_message_size)
        .on_upgrade(move |socket| handle_socket(socket, state.gateway, state.shutdown))
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    axum::Json(health_check(state.started, state.gateway.active_bridges()))
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    match state.gateway.metrics_snapshot() {
        Ok(snapshot) => axum::Json(snapshot).into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            axum::Json(json!({ "error": e.to_payload() })),
        )
            .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use livebridge_core::{LoggingHooks, RetryPolicy, SetupConfig};
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::bridge::BridgeConfig;
    use crate::testing::{FakeConnector, OnConnect};

    fn state(metrics_enabled: bool) -> AppState {
        let gateway = Gateway::new(
            FakeConnector::new(OnConnect::Pending),
            Arc::new(LoggingHooks),
            BridgeConfig::new(RetryPolicy::default(), &SetupConfig::default(), 10),
            metrics_enabled,
        );
        AppState {
            gateway: Arc::new(gateway),
            started: Instant::now(),
            shutdown: CancellationToken::new(),
            max_message_size: 1024,
        }
    }

    async fn get_json(router: Router, uri: &str) -> (StatusCode, Value) {
        let resp = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn health_endpoint() {
        let (status, body) = get_json(build_router(state(true)), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["activeBridges"], 0);
    }

    #[tokio::test]
    async fn metrics_endpoint() {
        let (status, body) = get_json(build_router(state(true)), "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["activeSessions"], 0);
        assert_eq!(body["messagesProcessed"], 0);
        assert_eq!(body["errors"], 0);
    }

    #[tokio::test]
    async fn metrics_endpoint_disabled() {
        let (status, body) = get_json(build_router(state(false)), "/metrics").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"]["code"], "METRICS_DISABLED");
    }

    #[tokio::test]
    async fn unknown_route_404() {
        let resp = build_router(state(true))
            .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn start_binds_ephemeral_port_and_stops() {
        let settings = ServerSettings {
            host: "127.0.0.1".into(),
            port: 0,
            ..ServerSettings::default()
        };
        let token = CancellationToken::new();
        let handle = start(&settings, state(true).gateway, token.clone())
            .await
            .unwrap();
        assert_ne!(handle.port(), 0);
        token.cancel();
        handle.into_task().await.unwrap();
    }
}
