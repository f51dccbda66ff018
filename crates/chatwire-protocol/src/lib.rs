//! # chatwire-protocol
//!
//! Wire shapes for the chatwire realtime chat backend.
//!
//! All frames are JSON objects:
//!
//! - `OutboundFrame` - `{content, chatId}` sent by a client
//! - `DeliveredMessage` - `{type, chatId, content, senderId, status, createdAt}`
//!   persisted, published on the broker and written to recipients
//! - `ErrorFrame` - `{type: "error", content, error?}` written to one connection
//!
//! ## Example
//!
//! ```rust
//! use chatwire_protocol::{codec, OutboundFrame};
//!
//! let frame = codec::decode_outbound(r#"{"content":"hi","chatId":42}"#).unwrap();
//! assert_eq!(frame, OutboundFrame::new(42, "hi"));
//! ```

pub mod codec;
pub mod frames;

pub use codec::{FrameCodec, ProtocolError, MAX_FRAME_SIZE};
pub use frames::{
    ChatId, DeliveredMessage, ErrorFrame, MessageKind, MessageStatus, OutboundFrame,
    SenderProfile, ServerFrame, UserId,
};
