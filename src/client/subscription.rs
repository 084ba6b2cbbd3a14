//! Client-side subscription with reconnect and resynchronization
//!
//! `DISCONNECTED → CONNECTING → CONNECTED → RECONNECTING → CONNECTING → …`
//! until the consumer unsubscribes. Every successful connect clears the
//! failure counter and the connection-lost signal; the server's
//! snapshot-on-connect resynchronizes the consumer, and no delta stream is
//! assumed to continue across a reconnect.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use parking_lot::RwLock;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use super::sse::SseMessage;
use super::transport::{EventTransport, HttpTransport, MessageStream, TransportError};
use crate::types::{EventKind, Revision, SharedState};

/// Application callback for each accepted event
pub type EventHandler = Arc<dyn Fn(ReceivedEvent) + Send + Sync>;

/// Callback invoked after every successful (re)connect
pub type ConnectHandler = Arc<dyn Fn() + Send + Sync>;

/// A decoded event handed to the application
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedEvent {
    pub kind: EventKind,
    pub state: SharedState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Observable connection status
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub consecutive_failures: u32,
    /// Raised once failures reach the configured threshold
    pub connection_lost: bool,
    /// Successful connects so far
    pub connects: u64,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            consecutive_failures: 0,
            connection_lost: false,
            connects: 0,
        }
    }
}

/// Reconnect policy, chosen per consumer role
#[derive(Debug, Clone)]
pub struct SubscriptionConfig {
    /// Consecutive failures before `connection_lost` is raised
    pub failure_threshold: u32,
    /// Delay before the first retry
    pub retry_delay: Duration,
    /// Upper bound when backing off
    pub max_retry_delay: Duration,
    /// Double the delay after each consecutive failure
    pub backoff: bool,
    /// Treat a connection as dead after this long without any frame
    pub stall_timeout: Option<Duration>,
}

impl SubscriptionConfig {
    /// Fixed delay, no stall detection
    pub fn new(failure_threshold: u32, retry_delay: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            retry_delay,
            max_retry_delay: retry_delay,
            backoff: false,
            stall_timeout: None,
        }
    }

    /// Latency-tolerant display: ride out brief drops before raising the indicator
    pub fn display() -> Self {
        Self {
            stall_timeout: Some(Duration::from_secs(75)),
            ..Self::new(3, Duration::from_secs(3))
        }
    }

    /// Latency-sensitive control surface: flag the first failure, retry quickly
    pub fn control() -> Self {
        Self {
            max_retry_delay: Duration::from_secs(8),
            backoff: true,
            stall_timeout: Some(Duration::from_secs(75)),
            ..Self::new(1, Duration::from_secs(1))
        }
    }

    pub fn with_backoff(mut self, max_retry_delay: Duration) -> Self {
        self.backoff = true;
        self.max_retry_delay = max_retry_delay.max(self.retry_delay);
        self
    }

    pub fn with_stall_timeout(mut self, timeout: Duration) -> Self {
        self.stall_timeout = Some(timeout);
        self
    }

    /// Delay before the next attempt after `failures` consecutive failures
    pub fn delay_for(&self, failures: u32) -> Duration {
        if !self.backoff || failures <= 1 {
            return self.retry_delay;
        }
        let factor = 1u32.checked_shl(failures - 1).unwrap_or(u32::MAX);
        self.retry_delay
            .saturating_mul(factor)
            .min(self.max_retry_delay)
    }
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self::display()
    }
}

/// A live subscription to the state stream.
///
/// The transport and the event handler are set up once; swapping the
/// handler with [`set_event_handler`](Self::set_event_handler) never
/// reconnects. Must be created inside a Tokio runtime.
pub struct ClientSubscription {
    status: watch::Receiver<ConnectionStatus>,
    handler: Arc<RwLock<EventHandler>>,
    task: Option<JoinHandle<()>>,
}

impl ClientSubscription {
    /// Subscribe to an SSE endpoint over HTTP
    pub fn subscribe(
        url: impl Into<String>,
        on_event: EventHandler,
        on_connect: Option<ConnectHandler>,
        config: SubscriptionConfig,
    ) -> Self {
        Self::with_transport(HttpTransport::new(url), on_event, on_connect, config)
    }

    /// Subscribe through any transport
    pub fn with_transport<T: EventTransport>(
        transport: T,
        on_event: EventHandler,
        on_connect: Option<ConnectHandler>,
        config: SubscriptionConfig,
    ) -> Self {
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::default());
        let handler = Arc::new(RwLock::new(on_event));

        let session = ConnectionSession {
            transport,
            config,
            handler: Arc::clone(&handler),
            on_connect,
            status: status_tx,
            last_revision: None,
        };
        let task = tokio::spawn(session.run());

        Self {
            status: status_rx,
            handler,
            task: Some(task),
        }
    }

    /// True while the degraded-connectivity indicator should be shown
    pub fn connection_lost(&self) -> bool {
        self.status.borrow().connection_lost
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    /// Receiver for binding UI to status changes
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    /// Replace the event handler without touching the connection
    pub fn set_event_handler(&self, handler: EventHandler) {
        *self.handler.write() = handler;
    }

    /// Stop reconnecting and close the transport
    pub async fn unsubscribe(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
        debug!("client subscription closed");
    }
}

impl Drop for ClientSubscription {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Reconnect loop state, owned by the background task
struct ConnectionSession<T> {
    transport: T,
    config: SubscriptionConfig,
    handler: Arc<RwLock<EventHandler>>,
    on_connect: Option<ConnectHandler>,
    status: watch::Sender<ConnectionStatus>,
    /// Revision of the last state delivered on the current connection
    last_revision: Option<Revision>,
}

impl<T: EventTransport> ConnectionSession<T> {
    async fn run(mut self) {
        loop {
            self.set_state(ConnectionState::Connecting);

            let reason = match self.transport.connect().await {
                Ok(stream) => {
                    self.on_connected();
                    self.consume(stream).await
                }
                Err(e) => e,
            };

            let failures = self.record_failure(&reason);
            self.set_state(ConnectionState::Reconnecting);
            tokio::time::sleep(self.config.delay_for(failures)).await;
        }
    }

    fn on_connected(&mut self) {
        // Fresh connection, fresh snapshot: forget what the old one delivered
        self.last_revision = None;

        let mut recovered = false;
        self.status.send_modify(|status| {
            recovered = status.connection_lost;
            status.state = ConnectionState::Connected;
            status.consecutive_failures = 0;
            status.connection_lost = false;
            status.connects += 1;
        });

        if recovered {
            info!("connection restored");
        } else {
            debug!("connected");
        }

        if let Some(on_connect) = &self.on_connect {
            on_connect();
        }
    }

    /// Drive one open stream until it fails; returns why it ended
    async fn consume(&mut self, mut stream: MessageStream) -> TransportError {
        loop {
            let next = match self.config.stall_timeout {
                Some(limit) => match tokio::time::timeout(limit, stream.next()).await {
                    Ok(next) => next,
                    Err(_) => return TransportError::Stalled(limit),
                },
                None => stream.next().await,
            };

            match next {
                Some(Ok(SseMessage::Comment(_))) => trace!("keepalive"),
                Some(Ok(SseMessage::Event { event, data })) => self.dispatch(event.as_deref(), &data),
                Some(Err(e)) => return e,
                None => return TransportError::Ended,
            }
        }
    }

    /// Decode and deliver one event. Bad payloads are dropped, never fatal.
    fn dispatch(&mut self, event: Option<&str>, data: &str) {
        let kind = match event.unwrap_or("update").parse::<EventKind>() {
            Ok(kind) => kind,
            Err(e) => {
                warn!(error = %e, "discarding event with unknown name");
                return;
            }
        };

        let state: SharedState = match serde_json::from_str(data) {
            Ok(state) => state,
            Err(e) => {
                warn!(error = %e, kind = %kind, "discarding malformed state payload");
                return;
            }
        };

        let revision = state.revision();
        if kind == EventKind::Update && self.last_revision.is_some_and(|last| revision <= last) {
            debug!(epoch = revision.epoch, version = revision.version, "discarding stale update");
            return;
        }
        self.last_revision = Some(revision);

        // Clone out so a handler swap is never blocked by a running handler
        let handler = self.handler.read().clone();
        handler(ReceivedEvent { kind, state });
    }

    fn record_failure(&mut self, reason: &TransportError) -> u32 {
        let threshold = self.config.failure_threshold;
        let mut failures = 0;
        let mut raised = false;

        self.status.send_modify(|status| {
            status.consecutive_failures = status.consecutive_failures.saturating_add(1);
            failures = status.consecutive_failures;
            if failures >= threshold && !status.connection_lost {
                status.connection_lost = true;
                raised = true;
            }
        });

        if raised {
            warn!(failures, error = %reason, "connection lost, retrying");
        } else {
            debug!(failures, error = %reason, "connection attempt failed");
        }
        failures
    }

    fn set_state(&self, state: ConnectionState) {
        self.status.send_if_modified(|status| {
            let changed = status.state != state;
            status.state = state;
            changed
        });
    }
}
