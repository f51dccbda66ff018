//! Codec for encoding and decoding chatwire frames.
//!
//! Frames are JSON text. Inbound frames are size-checked before parsing.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::frames::{DeliveredMessage, OutboundFrame, ServerFrame};

/// Default maximum frame size (64 KiB).
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds the configured maximum size.
    #[error("Frame size {size} exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },

    /// JSON encoding or decoding error.
    #[error("Invalid JSON frame: {0}")]
    Json(#[from] serde_json::Error),
}

fn decode<T: DeserializeOwned>(text: &str, max: usize) -> Result<T, ProtocolError> {
    if text.len() > max {
        return Err(ProtocolError::FrameTooLarge {
            size: text.len(),
            max,
        });
    }
    Ok(serde_json::from_str(text)?)
}

fn encode<T: Serialize>(value: &T) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(value)?)
}

/// Decode a client frame.
///
/// # Errors
///
/// Returns an error if the frame is too large or is not a valid outbound frame.
pub fn decode_outbound(text: &str) -> Result<OutboundFrame, ProtocolError> {
    decode(text, MAX_FRAME_SIZE)
}

/// Encode a server frame.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_server(frame: &ServerFrame) -> Result<String, ProtocolError> {
    encode(frame)
}

/// Decode a server frame. Used by clients.
///
/// # Errors
///
/// Returns an error if the text is not a valid server frame.
pub fn decode_server(text: &str) -> Result<ServerFrame, ProtocolError> {
    Ok(serde_json::from_str(text)?)
}

/// Encode a message as a broker payload.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_message(message: &DeliveredMessage) -> Result<String, ProtocolError> {
    encode(message)
}

/// Decode a broker payload into a message.
///
/// # Errors
///
/// Returns an error if the payload is not a delivered message.
pub fn decode_message(payload: &str) -> Result<DeliveredMessage, ProtocolError> {
    Ok(serde_json::from_str(payload)?)
}

/// Frame codec with a configurable inbound size limit.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(MAX_FRAME_SIZE)
    }
}

impl FrameCodec {
    /// Create a codec accepting frames up to `max_frame_size` bytes.
    #[must_use]
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    /// The configured size limit.
    #[must_use]
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Decode a client frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is too large or invalid.
    pub fn decode_outbound(&self, text: &str) -> Result<OutboundFrame, ProtocolError> {
        decode(text, self.max_frame_size)
    }

    /// Encode a server frame.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode_server(&self, frame: &ServerFrame) -> Result<String, ProtocolError> {
        encode_server(frame)
    }
}
