//! Transport abstraction traits for chatwire.
//!
//! A [`Connection`] is an already-upgraded, message-framed, bidirectional
//! link to one client. The core splits it so that the read loop and the
//! delivery task can run concurrently.

use async_trait::async_trait;
use chatwire_protocol::{OutboundFrame, ProtocolError, ServerFrame};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

static CONNECTION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique identifier for a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    /// Create a new connection ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a unique connection ID.
    #[must_use]
    pub fn generate() -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let counter = CONNECTION_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("conn_{:x}_{}", timestamp, counter))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// The peer sent a frame that could not be decoded.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The peer sent a frame that is not valid text.
    #[error("Malformed frame: {0}")]
    Malformed(String),
}

impl TransportError {
    /// Whether the connection is still usable after this error.
    ///
    /// Malformed frames are reported to the peer and reading continues;
    /// everything else ends the read loop.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, TransportError::Protocol(_) | TransportError::Malformed(_))
    }
}

/// Read half of a connection.
#[async_trait]
pub trait FrameReader: Send {
    /// Receive the next frame from the peer.
    ///
    /// Returns `None` if the connection is closed cleanly.
    async fn recv(&mut self) -> Result<Option<OutboundFrame>, TransportError>;
}

/// Write half of a connection.
#[async_trait]
pub trait FrameWriter: Send {
    /// Send a frame to the peer.
    async fn send(&mut self, frame: &ServerFrame) -> Result<(), TransportError>;

    /// Close the connection gracefully.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// An active connection over a transport.
pub trait Connection: Send {
    /// Read half produced by [`Connection::split`].
    type Reader: FrameReader + 'static;
    /// Write half produced by [`Connection::split`].
    type Writer: FrameWriter + 'static;

    /// Get the connection's unique identifier.
    fn id(&self) -> &ConnectionId;

    /// Get the remote address of the connection, if available.
    fn remote_addr(&self) -> Option<String> {
        None
    }

    /// Split into independently owned read and write halves.
    fn split(self) -> (Self::Reader, Self::Writer);
}
