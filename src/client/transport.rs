//! Client transports for the state stream.
//!
//! [`EventTransport`] is the seam between the reconnect logic and the
//! network: one `connect` call opens one stream of decoded SSE messages.

use std::collections::VecDeque;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::header::{ACCEPT, CACHE_CONTROL};

use tracing::warn;

use super::sse::{SseDecoder, SseMessage};

/// Upper bound on TCP/TLS connect, so an unreachable host counts as a failure
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Decoded messages of one open connection
pub type MessageStream = BoxStream<'static, Result<SseMessage, TransportError>>;

/// Errors that end a connection attempt or an open stream
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("unexpected status: {0}")]
    Status(reqwest::StatusCode),

    #[error("stream ended by server")]
    Ended,

    #[error("no data or keepalive for {0:?}")]
    Stalled(Duration),

    #[error("disconnected: {0}")]
    Disconnected(String),
}

/// Opens streaming connections to the state endpoint
pub trait EventTransport: Send + Sync + 'static {
    fn connect(&self) -> BoxFuture<'_, Result<MessageStream, TransportError>>;
}

/// SSE over HTTP using a streaming `reqwest` response body
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
}

impl HttpTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_connect_timeout(url, DEFAULT_CONNECT_TIMEOUT)
    }

    /// Client whose connect attempts give up after `timeout`.
    /// The body itself has no deadline; the stream is long-lived.
    pub fn with_connect_timeout(url: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "failed to build HTTP client, using defaults");
                reqwest::Client::default()
            });
        Self::with_client(client, url)
    }

    pub fn with_client(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl EventTransport for HttpTransport {
    fn connect(&self) -> BoxFuture<'_, Result<MessageStream, TransportError>> {
        Box::pin(async move {
            let response = self
                .client
                .get(&self.url)
                .header(ACCEPT, "text/event-stream")
                .header(CACHE_CONTROL, "no-cache")
                .send()
                .await?;

            let status = response.status();
            if !status.is_success() {
                return Err(TransportError::Status(status));
            }

            let body = Box::pin(response.bytes_stream());
            let messages = stream::unfold(
                (body, SseDecoder::new(), VecDeque::new()),
                |(mut body, mut decoder, mut pending)| async move {
                    loop {
                        if let Some(message) = pending.pop_front() {
                            return Some((Ok(message), (body, decoder, pending)));
                        }
                        match body.next().await {
                            Some(Ok(chunk)) => pending.extend(decoder.push(&chunk)),
                            Some(Err(e)) => {
                                return Some((Err(TransportError::Request(e)), (body, decoder, pending)))
                            }
                            None => return None,
                        }
                    }
                },
            );

            Ok(messages.boxed())
        })
    }
}
