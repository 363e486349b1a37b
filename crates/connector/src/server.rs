use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::metrics::encode_metrics;
use crate::monitor::ConnectionMonitor;
use crate::observer::ObserverState;

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub source: String,
    pub observer_state: String,
    pub connectivity: String,
    pub pending_acks: usize,
}

/// Shared state for health endpoints
#[derive(Clone)]
pub struct ServerState {
    pub source: String,
    pub monitor: Arc<ConnectionMonitor>,
}

impl ServerState {
    pub fn new(source: impl Into<String>, monitor: Arc<ConnectionMonitor>) -> Self {
        Self {
            source: source.into(),
            monitor,
        }
    }

    fn snapshot(&self, status: &str) -> HealthResponse {
        HealthResponse {
            status: status.to_string(),
            source: self.source.clone(),
            observer_state: self.monitor.observer_state().to_string(),
            connectivity: self.monitor.connectivity().to_string(),
            pending_acks: self.monitor.pending_acks(),
        }
    }
}

/// Health endpoint - always returns 200 if server is running
async fn health(State(state): State<ServerState>) -> Json<HealthResponse> {
    Json(state.snapshot("ok"))
}

/// Ready endpoint - returns 200 only once the platform greeted us
async fn ready(State(state): State<ServerState>) -> (StatusCode, Json<HealthResponse>) {
    if state.monitor.observer_state() == ObserverState::Ready {
        (StatusCode::OK, Json(state.snapshot("ready")))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(state.snapshot("not_ready")),
        )
    }
}

/// Prometheus text exposition
async fn metrics() -> impl IntoResponse {
    match encode_metrics() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [(header::CONTENT_TYPE, "text/plain")],
            e.to_string(),
        ),
    }
}

/// Create the health server router
pub fn create_router(state: ServerState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Run the health server until `shutdown` fires
pub async fn run_server(
    addr: SocketAddr,
    state: ServerState,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let app = create_router(state);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}
