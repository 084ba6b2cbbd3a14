//! Terminal Sync - Binary Entry Point
//!
//! Starts the state synchronization server.

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use terminal_sync::{init_state_store, start_server, SyncConfig, SyncHub};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .init();

    info!(version = terminal_sync::VERSION, "terminal-sync starting");

    let config = SyncConfig::from_env()?;
    info!(
        host = %config.host,
        port = config.port,
        mailbox_capacity = config.mailbox_capacity,
        keepalive_secs = config.keepalive.as_secs(),
        "configuration loaded"
    );

    let store = init_state_store();
    let hub = SyncHub::with_store(store, config.mailbox_capacity).with_keepalive(config.keepalive);

    start_server(&config, Arc::new(hub)).await?;
    Ok(())
}
