//! Health check endpoint. The other device probes it to decide reachability.

use axum::{extract::State, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use repsync_engine::DeviceRole;
use serde::Serialize;

use crate::AppState;

/// Health check response.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub role: DeviceRole,
    /// Transfers still waiting for the peer
    pub outstanding_transfers: usize,
    pub started_at: DateTime<Utc>,
}

/// Create health routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/", get(root))
}

/// Health check handler.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        role: state.config.role,
        outstanding_transfers: state.outbox.len(),
        started_at: state.started_at,
    })
}

/// Root handler.
async fn root() -> &'static str {
    "RepSync Peer"
}
