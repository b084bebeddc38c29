//! Connection-oriented text transport consumed by device sessions.
//!
//! A [`Transport`] opens connections; a [`Connection`] sends frames and
//! yields inbound events in arrival order. Implementations must make
//! [`Connection::next_event`] cancel-safe because sessions race it against
//! their timers.

pub mod memory;
pub mod websocket;

use async_trait::async_trait;

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum OpenFailure {
    #[error("invalid endpoint {url}: {reason}")]
    InvalidEndpoint { url: String, reason: String },
    #[error("connection to {url} failed: {reason}")]
    Refused { url: String, reason: String },
    #[error("connection to {url} timed out")]
    TimedOut { url: String },
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TransportFault {
    #[error("send failed: {0}")]
    Send(String),
    #[error("receive failed: {0}")]
    Receive(String),
    #[error("close failed: {0}")]
    Close(String),
    #[error("connection is closed")]
    AlreadyClosed,
}

/// Something that happened on an open connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A text frame from the peer.
    Message(String),
    /// The peer closed the connection.
    Closed,
    Fault(TransportFault),
}

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    type Connection: Connection;

    /// Open a connection to `url`, offering `subprotocol` during the handshake.
    async fn open(&self, url: &str, subprotocol: &str) -> Result<Self::Connection, OpenFailure>;
}

#[async_trait]
pub trait Connection: Send + 'static {
    async fn send(&mut self, frame: String) -> Result<(), TransportFault>;

    /// Wait for the next inbound event. Pending until something arrives.
    async fn next_event(&mut self) -> ConnectionEvent;

    /// Start a clean close and wait for the peer to confirm.
    async fn close(&mut self) -> Result<(), TransportFault>;
}
