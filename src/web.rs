//! HTTP surface: the `/ws` protocol endpoint plus health, stats and
//! Prometheus metrics.

use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::irc::server::{Gateway, GatewayStats};
use crate::irc::session;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Gateway,
    /// Present once a Prometheus recorder is installed.
    pub prometheus: Option<PrometheusHandle>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/api/stats", get(stats_handler))
        .route("/metrics", get(metrics_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the router until the listener fails.
pub async fn serve(
    addr: &str,
    state: AppState,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("listening on http://{addr} (websocket at /ws)");
    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| session::run_websocket(state.gateway, socket, addr))
}

/// `GET /health`: liveness.
async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

/// `GET /api/stats`: gateway counters and the command registry snapshot.
async fn stats_handler(State(state): State<AppState>) -> Json<GatewayStats> {
    Json(state.gateway.stats().await)
}

/// `GET /metrics`: Prometheus text format.
async fn metrics_handler(State(state): State<AppState>) -> String {
    state
        .prometheus
        .as_ref()
        .map(|h| h.render())
        .unwrap_or_default()
}
