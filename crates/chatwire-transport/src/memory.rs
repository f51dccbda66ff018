//! In-process connections.
//!
//! [`pair`] returns a server-side [`ChannelConnection`] and the client-side
//! [`ChannelPeer`] that drives it. Used to embed the relay without a network
//! socket and throughout the test suites.

use async_trait::async_trait;
use chatwire_protocol::{FrameCodec, OutboundFrame, ServerFrame};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::traits::{Connection, ConnectionId, FrameReader, FrameWriter, TransportError};

/// What the peer pushes towards the server side.
#[derive(Debug)]
enum PeerInput {
    Text(String),
    Fail(String),
}

/// Create a connected in-process pair with room for `capacity` frames per direction.
#[must_use]
pub fn pair(capacity: usize) -> (ChannelConnection, ChannelPeer) {
    let (in_tx, in_rx) = mpsc::channel(capacity);
    let (out_tx, out_rx) = mpsc::channel(capacity);
    (
        ChannelConnection {
            id: ConnectionId::generate(),
            inbound: in_rx,
            outbound: out_tx,
            codec: FrameCodec::default(),
        },
        ChannelPeer {
            input: Some(in_tx),
            output: out_rx,
        },
    )
}

/// Server side of an in-process connection.
pub struct ChannelConnection {
    id: ConnectionId,
    inbound: mpsc::Receiver<PeerInput>,
    outbound: mpsc::Sender<ServerFrame>,
    codec: FrameCodec,
}

impl Connection for ChannelConnection {
    type Reader = ChannelReader;
    type Writer = ChannelWriter;

    fn id(&self) -> &ConnectionId {
        &self.id
    }

    fn remote_addr(&self) -> Option<String> {
        Some("in-process".to_string())
    }

    fn split(self) -> (ChannelReader, ChannelWriter) {
        (
            ChannelReader {
                inbound: self.inbound,
                codec: self.codec,
            },
            ChannelWriter {
                outbound: Some(self.outbound),
            },
        )
    }
}

/// Read half of a [`ChannelConnection`].
pub struct ChannelReader {
    inbound: mpsc::Receiver<PeerInput>,
    codec: FrameCodec,
}

#[async_trait]
impl FrameReader for ChannelReader {
    async fn recv(&mut self) -> Result<Option<OutboundFrame>, TransportError> {
        match self.inbound.recv().await {
            Some(PeerInput::Text(text)) => {
                self.codec.decode_outbound(&text).map(Some).map_err(Into::into)
            }
            Some(PeerInput::Fail(reason)) => Err(TransportError::ReceiveFailed(reason)),
            None => Ok(None),
        }
    }
}

/// Write half of a [`ChannelConnection`].
pub struct ChannelWriter {
    outbound: Option<mpsc::Sender<ServerFrame>>,
}

#[async_trait]
impl FrameWriter for ChannelWriter {
    async fn send(&mut self, frame: &ServerFrame) -> Result<(), TransportError> {
        let outbound = self.outbound.as_ref().ok_or(TransportError::ConnectionClosed)?;
        outbound
            .send(frame.clone())
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.outbound = None;
        Ok(())
    }
}

/// Client side of an in-process connection.
pub struct ChannelPeer {
    input: Option<mpsc::Sender<PeerInput>>,
    output: mpsc::Receiver<ServerFrame>,
}

impl ChannelPeer {
    /// Send a well-formed frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the peer or the server side is closed.
    pub async fn send(&self, frame: &OutboundFrame) -> Result<(), TransportError> {
        let text =
            serde_json::to_string(frame).map_err(|e| TransportError::Malformed(e.to_string()))?;
        self.send_raw(text).await
    }

    /// Send arbitrary text, which need not be a valid frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the peer or the server side is closed.
    pub async fn send_raw(&self, text: impl Into<String>) -> Result<(), TransportError> {
        self.push(PeerInput::Text(text.into())).await
    }

    /// Make the server's next read fail with an I/O error.
    ///
    /// # Errors
    ///
    /// Returns an error if the peer or the server side is closed.
    pub async fn fail(&self, reason: impl Into<String>) -> Result<(), TransportError> {
        self.push(PeerInput::Fail(reason.into())).await
    }

    /// Close the client side; the server reads a clean end of stream.
    pub fn close(&mut self) {
        self.input = None;
    }

    /// Receive the next frame written by the server.
    pub async fn recv(&mut self) -> Option<ServerFrame> {
        self.output.recv().await
    }

    /// Receive the next frame, giving up after `timeout`.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Option<ServerFrame> {
        tokio::time::timeout(timeout, self.output.recv())
            .await
            .ok()
            .flatten()
    }

    async fn push(&self, input: PeerInput) -> Result<(), TransportError> {
        let tx = self.input.as_ref().ok_or(TransportError::ConnectionClosed)?;
        tx.send(input)
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }
}
