//! HTTP server lifecycle
//!
//! Binds the listener, serves the router, and on shutdown releases every
//! stream subscriber before letting in-flight connections drain.

use std::future::Future;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::Notify;
use tracing::info;

use crate::api::{create_router, SyncHub};
use crate::config::{ConfigError, SyncConfig};

/// Errors that can occur when starting or running the server
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Failed to bind to the network address
    #[error("bind error: {0}")]
    Bind(std::io::Error),

    /// Failed to install the Ctrl+C / SIGTERM handler
    #[error("signal handler error: {0}")]
    Signal(#[from] ctrlc::Error),

    /// The server encountered a fatal error while serving
    #[error("serve error: {0}")]
    Serve(std::io::Error),
}

/// Serve on an already bound listener until `shutdown` resolves.
///
/// Open SSE streams never end on their own, so the hub is shut down first;
/// that closes every mailbox and lets graceful shutdown complete.
pub async fn serve<F>(listener: TcpListener, hub: Arc<SyncHub>, shutdown: F) -> Result<(), ServerError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let router = create_router(Arc::clone(&hub));
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "terminal sync server listening");
    }

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown.await;
            info!("shutdown requested, releasing stream subscribers");
            hub.shutdown();
        })
        .await
        .map_err(ServerError::Serve)
}

/// Install the process signal handler and return a future that resolves
/// on the first Ctrl+C, SIGTERM or SIGHUP.
///
/// Can be installed once per process.
pub fn shutdown_signal() -> Result<impl Future<Output = ()> + Send + 'static, ServerError> {
    let signal = Arc::new(Notify::new());
    let handler_signal = Arc::clone(&signal);
    // notify_one keeps a permit, so a signal before the first poll is not lost
    ctrlc::set_handler(move || handler_signal.notify_one())?;

    Ok(async move { signal.notified().await })
}

/// Bind to the configured address and serve until Ctrl+C / SIGTERM
pub async fn start_server(config: &SyncConfig, hub: Arc<SyncHub>) -> Result<(), ServerError> {
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await.map_err(ServerError::Bind)?;

    serve(listener, hub, shutdown_signal()?).await?;
    info!("server stopped");
    Ok(())
}
