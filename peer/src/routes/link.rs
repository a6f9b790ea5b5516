//! Inbound side of the peer link.

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use serde_json::Value;

use crate::error::Result;
use crate::link::{MESSAGE_PATH, TRANSFER_PATH};
use crate::AppState;

/// Create link routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route(TRANSFER_PATH, post(receive_transfer))
        .route(MESSAGE_PATH, post(receive_message))
}

/// Best-effort payload. Accepted once it is queued for the engine.
async fn receive_transfer(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> Result<StatusCode> {
    state.coordinator.transfer(payload)?;
    Ok(StatusCode::ACCEPTED)
}

/// Immediate payload. Responds with the engine's reply, or `null`.
async fn receive_message(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> Result<Json<Option<Value>>> {
    let reply = state.coordinator.message(payload).await?;
    Ok(Json(reply))
}
