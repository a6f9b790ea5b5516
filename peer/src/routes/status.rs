//! Sync status endpoint.

use axum::{extract::State, routing::get, Json, Router};
use repsync_engine::SyncStatus;
use serde::Serialize;

use crate::error::Result;
use crate::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkStatus {
    pub paired: bool,
    pub reachable: bool,
    pub outstanding_transfers: usize,
}

#[derive(Serialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    pub sync: SyncStatus,
    pub link: LinkStatus,
}

/// Create status routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/status", get(status))
}

async fn status(State(state): State<AppState>) -> Result<Json<StatusResponse>> {
    let sync = state.coordinator.run(|engine| engine.status()).await?;
    Ok(Json(StatusResponse {
        sync,
        link: LinkStatus {
            paired: state.link.is_paired(),
            reachable: state.link.is_reachable(),
            outstanding_transfers: state.outbox.len(),
        },
    }))
}
