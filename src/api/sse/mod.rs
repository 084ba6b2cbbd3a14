//! SSE (Server-Sent Events) streaming of state changes
//!
//! Each connected display gets one [`StreamEndpoint`] that sends a full
//! snapshot first, then forwards every published update, with keepalive
//! comments while idle.
//!
//! ## Endpoints
//! - `GET /api/stream` - SSE stream for server→client state events

pub mod endpoint;
pub mod handler;

use std::sync::Arc;

use axum::response::sse::Event;

use crate::types::StateEvent;

pub use endpoint::{EndpointPhase, StreamEndpoint};
pub use handler::stream_handler;

/// Comment text of the idle keepalive frame
pub const KEEPALIVE_COMMENT: &str = "keepalive";

/// One unit written to a stream client
#[derive(Debug, Clone)]
pub enum Frame {
    /// A snapshot or update, payload forwarded verbatim
    Event(Arc<StateEvent>),
    /// Idle comment that carries no application data
    Keepalive,
}

impl Frame {
    /// Encode as an axum SSE event
    pub fn into_sse_event(self) -> Event {
        match self {
            Frame::Event(event) => Event::default()
                .event(event.kind.as_str())
                .data(&*event.payload),
            Frame::Keepalive => Event::default().comment(KEEPALIVE_COMMENT),
        }
    }
}
