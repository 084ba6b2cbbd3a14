//! API module for HTTP and SSE endpoints
//!
//! This module provides the state broadcaster, the per-connection SSE stream,
//! and the REST endpoints for reading and writing the shared state.

pub mod broadcaster;
pub mod http;
pub mod rest;
pub mod sse;
pub mod state;

// Re-export commonly used items
pub use broadcaster::{Broadcaster, SubscriberHandle, Subscription, DEFAULT_MAILBOX_CAPACITY};
pub use http::create_router;
pub use state::SyncHub;
