use axum::{Json, extract::State, response::IntoResponse};
use chat_relay::LinkState;
use serde::Serialize;

use crate::AppState;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub status: &'static str,
    pub gateway_connected: bool,
    pub gateway_state: LinkState,
    pub clients: usize,
    /// Seconds since start
    pub uptime: f64,
}

/// Health check endpoint - returns relay status
pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let link = state.relay.link();
    Json(HealthStatus {
        status: "ok",
        gateway_connected: link.is_ready(),
        gateway_state: link.state(),
        clients: state.relay.registry().len().await,
        uptime: state.relay.metrics().uptime_secs(),
    })
}

/// Metrics endpoint - returns detailed relay metrics
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.relay.metrics().snapshot())
}
