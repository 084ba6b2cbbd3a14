//! State endpoints - snapshot reads and the write path

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use tracing::info;

use super::ApiResponse;
use crate::api::broadcaster::BroadcastStats;
use crate::api::state::SyncHub;
use crate::error::ApiError;
use crate::types::{SharedState, StatePatch};

/// GET /api/state - Current snapshot
///
/// Lets a client perform an explicit fresh read after reconnecting.
pub async fn get_state(State(hub): State<Arc<SyncHub>>) -> impl IntoResponse {
    let snapshot = hub.snapshot();
    let version = snapshot.version;
    Json(ApiResponse::new(snapshot, version))
}

/// Response for PATCH /api/state
#[derive(Debug, Serialize)]
pub struct UpdateResponse {
    pub state: SharedState,
    /// Subscribers the update was queued for
    pub delivered: usize,
    /// Subscribers evicted because their mailbox was full
    pub evicted: usize,
}

/// PATCH /api/state - Merge a partial update and publish the result
pub async fn patch_state(
    State(hub): State<Arc<SyncHub>>,
    payload: Result<Json<StatePatch>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(patch) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let (state, report) = hub.apply(patch)?;
    info!(
        version = state.version,
        view_type = %state.view_type,
        delivered = report.delivered,
        "state updated"
    );

    let version = state.version;
    let response = UpdateResponse {
        state,
        delivered: report.delivered,
        evicted: report.evicted,
    };
    Ok(Json(ApiResponse::new(response, version)))
}

/// POST /api/state/reset - Restore defaults and broadcast them
pub async fn reset_state(State(hub): State<Arc<SyncHub>>) -> Result<impl IntoResponse, ApiError> {
    let state = hub.reset()?;
    info!("state reset to defaults");
    Ok(Json(ApiResponse::new(state, 0)))
}

/// GET /api/stream/stats - Subscriber registry counters
pub async fn get_stream_stats(State(hub): State<Arc<SyncHub>>) -> impl IntoResponse {
    let stats: BroadcastStats = hub.broadcaster().stats();
    Json(ApiResponse::new(stats, hub.store().version()))
}
