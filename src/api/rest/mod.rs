//! REST API module for HTTP endpoints
//!
//! Provides REST endpoints for explicit resynchronization and the write path:
//! - `GET /api/state` - Full state snapshot
//! - `PATCH /api/state` - Merge a partial update and publish it
//! - `POST /api/state/reset` - Restore defaults and publish a snapshot
//! - `GET /api/stream/stats` - Subscriber registry counters

pub mod state;

use serde::Serialize;

/// Standard API response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    /// Response data
    pub data: T,
    /// State version the data was read at
    pub version: u64,
}

impl<T> ApiResponse<T> {
    pub fn new(data: T, version: u64) -> Self {
        Self { data, version }
    }
}
