//! SSE HTTP handler

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, HeaderName},
    response::{sse::Sse, IntoResponse},
};
use tracing::info;

use super::StreamEndpoint;
use crate::api::state::SyncHub;

/// Disables response buffering in nginx-style reverse proxies
static X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");

/// GET /api/stream - SSE stream of state snapshots and updates
pub async fn stream_handler(State(hub): State<Arc<SyncHub>>) -> impl IntoResponse {
    let mut endpoint = StreamEndpoint::new(
        hub.source(),
        Arc::clone(hub.broadcaster()),
        hub.keepalive(),
    );
    info!(
        subscribers = hub.broadcaster().subscriber_count(),
        "stream client connected"
    );

    // Dropping the stream (client gone, write failure, shutdown) drops the
    // endpoint and with it the subscriber registration
    let stream = async_stream::stream! {
        while let Some(frame) = endpoint.next_frame().await {
            yield Ok::<_, Infallible>(frame.into_sse_event());
        }
    };

    (
        [
            (header::CACHE_CONTROL, "no-cache"),
            (X_ACCEL_BUFFERING.clone(), "no"),
        ],
        Sse::new(stream),
    )
}
