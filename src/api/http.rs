//! Router for the stream, state and health endpoints

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::rest::state;
use super::sse::stream_handler;
use super::state::SyncHub;

/// Create the Axum router with all endpoints
pub fn create_router(hub: Arc<SyncHub>) -> Router {
    // Display kiosks may be served from another origin
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // SSE endpoint
        .route("/api/stream", get(stream_handler))
        .route("/api/stream/stats", get(state::get_stream_stats))
        // Health check
        .route("/health", get(health_check))
        // State read / write path
        .route("/api/state", get(state::get_state).patch(state::patch_state))
        .route("/api/state/reset", post(state::reset_state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(hub)
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}
