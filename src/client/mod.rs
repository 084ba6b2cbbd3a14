//! Display-side client for the state stream
//!
//! - `sse`: incremental SSE frame decoder
//! - `transport`: the connect seam and its HTTP implementation
//! - `subscription`: reconnect loop, connection status and event dispatch

pub mod sse;
pub mod subscription;
pub mod transport;

pub use sse::{SseDecoder, SseMessage};
pub use subscription::{
    ClientSubscription, ConnectHandler, ConnectionState, ConnectionStatus, EventHandler, ReceivedEvent,
    SubscriptionConfig,
};
pub use transport::{EventTransport, HttpTransport, MessageStream, TransportError};
