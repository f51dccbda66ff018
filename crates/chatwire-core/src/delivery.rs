//! Delivery pipeline.
//!
//! Outbound, a client frame is turned into a [`DeliveredMessage`], checked
//! against the chat's block policy, published on the chat channel and then
//! persisted. Inbound, each broker event is decoded, self-echoes are dropped
//! and the message is written to the recipient's connection before the
//! notification fallback runs.

use chatwire_protocol::{codec, DeliveredMessage, ErrorFrame, OutboundFrame, ServerFrame, UserId};
use chatwire_transport::FrameWriter;
use std::fmt::Display;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

use crate::broker::{Broker, BrokerEvent};
use crate::metrics;
use crate::model::{unix_now, Identity};
use crate::notify::Notifier;
use crate::store::{ChatStore, MessageStore};

/// Error Frame content for a frame that could not be read.
pub const READ_ERROR: &str = "error reading message";
/// Error Frame content for a chat that could not be resolved.
pub const CHAT_ERROR: &str = "error resolving chat";
/// Error Frame content for a failed publish.
pub const PUBLISH_ERROR: &str = "error sending message to channel";
/// Error Frame content for a broker event that is not a message.
pub const DECODE_ERROR: &str = "error unmarshaling channel message";

/// Result of submitting an outbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Published on the chat channel.
    Published(DeliveredMessage),
    /// Dropped by block policy. Nothing is reported to the sender.
    Suppressed,
    /// Failed; the frame goes back to the sender.
    Rejected(ErrorFrame),
}

/// Classification of a broker event for one recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Write to the recipient.
    Deliver(DeliveredMessage),
    /// The recipient sent this message.
    SelfEcho,
    /// The payload is not a message.
    Undecodable(ErrorFrame),
}

/// Collaborators and policy shared by every session.
pub struct DeliveryPipeline {
    broker: Arc<dyn Broker>,
    chats: Arc<dyn ChatStore>,
    messages: Arc<dyn MessageStore>,
    notifier: Notifier,
    expose_error_detail: bool,
}

impl DeliveryPipeline {
    /// Create a pipeline.
    #[must_use]
    pub fn new(
        broker: Arc<dyn Broker>,
        chats: Arc<dyn ChatStore>,
        messages: Arc<dyn MessageStore>,
        notifier: Notifier,
    ) -> Self {
        Self {
            broker,
            chats,
            messages,
            notifier,
            expose_error_detail: false,
        }
    }

    /// Include underlying error text in Error Frames.
    #[must_use]
    pub fn with_error_detail(mut self, expose: bool) -> Self {
        self.expose_error_detail = expose;
        self
    }

    /// Build an Error Frame, attaching `detail` when error detail is exposed.
    pub fn error_frame(&self, content: &str, detail: impl Display) -> ErrorFrame {
        let frame = ErrorFrame::new(content);
        if self.expose_error_detail {
            frame.with_detail(detail.to_string())
        } else {
            frame
        }
    }

    /// Validate, publish and persist a frame sent by `sender`.
    pub async fn submit(&self, sender: &Identity, frame: OutboundFrame) -> Outbound {
        let message = DeliveredMessage::text(frame.chat_id, frame.content, sender.id, unix_now())
            .with_sender(sender.username.clone());

        let chat = match self.chats.find_by_id(message.chat_id).await {
            Ok(chat) => chat,
            Err(e) => {
                warn!(user = sender.id, chat = message.chat_id, error = %e, "Chat lookup failed");
                metrics::record_error("chat_lookup");
                return Outbound::Rejected(self.error_frame(CHAT_ERROR, e));
            }
        };

        if chat.blocks_sender(sender.id) {
            debug!(user = sender.id, chat = chat.id, "Sender blocked, dropping message");
            metrics::record_suppressed("blocked");
            return Outbound::Suppressed;
        }

        let payload = match codec::encode_message(&message) {
            Ok(payload) => payload,
            Err(e) => {
                metrics::record_error("encode");
                return Outbound::Rejected(self.error_frame(PUBLISH_ERROR, e));
            }
        };
        let channel = chat.channel();
        match self.broker.publish(&channel, &payload).await {
            Ok(receivers) => {
                trace!(user = sender.id, channel = %channel, receivers, "Message published");
                metrics::record_published();
            }
            Err(e) => {
                warn!(user = sender.id, channel = %channel, error = %e, "Publish failed");
                metrics::record_error("publish");
                return Outbound::Rejected(self.error_frame(PUBLISH_ERROR, e));
            }
        }

        if let Err(e) = self.messages.create(&message).await {
            warn!(user = sender.id, chat = chat.id, error = %e, "Published message not persisted");
            metrics::record_persist_failure();
        }

        Outbound::Published(message)
    }

    /// Decide what `recipient` gets for a broker event.
    pub fn classify(&self, recipient: UserId, event: &BrokerEvent) -> Inbound {
        match codec::decode_message(&event.payload) {
            Ok(message) if message.sender_id == recipient => Inbound::SelfEcho,
            Ok(message) => Inbound::Deliver(message),
            Err(e) => {
                warn!(user = recipient, channel = %event.channel, error = %e, "Undecodable event");
                Inbound::Undecodable(self.error_frame(DECODE_ERROR, e))
            }
        }
    }

    /// Deliver one broker event to `recipient`'s connection.
    ///
    /// Write failures are logged; the notification fallback runs whatever
    /// the write outcome.
    pub async fn deliver<W>(&self, recipient: UserId, event: &BrokerEvent, writer: &Mutex<W>)
    where
        W: FrameWriter + ?Sized,
    {
        let message = match self.classify(recipient, event) {
            Inbound::Deliver(message) => message,
            Inbound::SelfEcho => {
                trace!(user = recipient, channel = %event.channel, "Dropping self-echo");
                metrics::record_suppressed("self_echo");
                return;
            }
            Inbound::Undecodable(frame) => {
                metrics::record_error("decode");
                write_frame(recipient, writer, frame.into()).await;
                return;
            }
        };

        if write_frame(recipient, writer, message.clone().into()).await {
            metrics::record_delivered();
        }
        self.notifier.notify(&message).await;
    }
}

/// Write one frame, logging a failure. Returns whether the write succeeded.
pub(crate) async fn write_frame<W>(user: UserId, writer: &Mutex<W>, frame: ServerFrame) -> bool
where
    W: FrameWriter + ?Sized,
{
    match writer.lock().await.send(&frame).await {
        Ok(()) => true,
        Err(e) => {
            warn!(user, error = %e, "Write failed");
            metrics::record_error("write");
            false
        }
    }
}
