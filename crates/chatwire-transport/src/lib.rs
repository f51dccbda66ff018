//! # chatwire-transport
//!
//! Connection abstraction for the chatwire realtime core.
//!
//! The core is entered with an already-upgraded connection. This crate
//! provides a unified interface over:
//!
//! - **WebSocket** - sockets upgraded by axum
//! - **In-process** - channel pairs for embedding and tests
//!
//! ```rust,ignore
//! use chatwire_transport::{Connection, FrameReader};
//!
//! async fn read_all<C: Connection>(conn: C) {
//!     let (mut reader, _writer) = conn.split();
//!     while let Ok(Some(frame)) = reader.recv().await {
//!         // Process frame
//!     }
//! }
//! ```

pub mod memory;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use traits::{Connection, ConnectionId, FrameReader, FrameWriter, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::WebSocketConnection;
