//! Terminal Sync
//!
//! Real-time state synchronization between a control console and any number
//! of display terminals, over HTTP Server-Sent Events.
//!
//! # Features
//!
//! - **Versioned State**: One in-memory state document, every change bumps its version
//! - **Snapshot on Connect**: Each stream opens with the full current state
//! - **Bounded Fan-out**: Slow subscribers are evicted instead of blocking writers
//! - **Self-healing Clients**: Reconnect with per-role retry policy and resync
//!
//! # Modules
//!
//! - `types`: Shared state document, partial updates, stream events
//! - `state_store`: Versioned, thread-safe state holder
//! - `api`: Broadcaster, SSE endpoint, REST handlers and router
//! - `client`: SSE decoder, transports and the reconnecting subscription
//! - `config`: Environment-driven server configuration
//! - `server`: Listener lifecycle and graceful shutdown
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use terminal_sync::{init_state_store, start_server, SyncConfig, SyncHub};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SyncConfig::from_env()?;
//!     let hub = SyncHub::with_store(init_state_store(), config.mailbox_capacity)
//!         .with_keepalive(config.keepalive);
//!     start_server(&config, Arc::new(hub)).await?;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod server;
pub mod state_store;
pub mod types;

// Re-export commonly used items at crate root
pub use api::{create_router, Broadcaster, Subscription, SyncHub};
pub use client::{ClientSubscription, ConnectionStatus, ReceivedEvent, SubscriptionConfig};
pub use config::SyncConfig;
pub use error::ApiError;
pub use server::{serve, shutdown_signal, start_server, ServerError};
pub use state_store::{get_state_store, init_state_store, StateSource, StateStore};
pub use types::{EventKind, Revision, SharedState, StateEvent, StatePatch};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
