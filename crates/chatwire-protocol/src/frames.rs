//! Frame shapes for the chatwire protocol.
//!
//! Every frame is a JSON object. Clients send [`OutboundFrame`]s; the server
//! answers with [`ServerFrame`]s, which are either a [`DeliveredMessage`] or an
//! [`ErrorFrame`].

use serde::{Deserialize, Serialize};

/// User identifier.
pub type UserId = i64;

/// Chat identifier.
pub type ChatId = i64;

/// A message a client sends over its connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundFrame {
    /// Message text.
    #[serde(default)]
    pub content: String,
    /// Target chat.
    pub chat_id: ChatId,
}

impl OutboundFrame {
    /// Create a new outbound frame.
    #[must_use]
    pub fn new(chat_id: ChatId, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            chat_id,
        }
    }
}

/// Kind tag carried in the `type` field of server frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    System,
    Error,
}

/// Delivery status of a persisted message.
///
/// Only `Sent` is produced by the realtime path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Read,
}

/// Public profile of a message sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderProfile {
    /// Sender id.
    pub id: UserId,
    /// Sender display name.
    pub username: String,
}

/// A chat message as it is persisted, published and delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveredMessage {
    /// Message kind.
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Chat the message belongs to.
    pub chat_id: ChatId,
    /// Message text.
    pub content: String,
    /// Author of the message.
    pub sender_id: UserId,
    /// Author profile, used for notification titles.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<SenderProfile>,
    /// Delivery status.
    pub status: MessageStatus,
    /// Creation time in Unix seconds.
    pub created_at: i64,
}

impl DeliveredMessage {
    /// Create a freshly sent text message.
    #[must_use]
    pub fn text(
        chat_id: ChatId,
        content: impl Into<String>,
        sender_id: UserId,
        created_at: i64,
    ) -> Self {
        Self {
            kind: MessageKind::Text,
            chat_id,
            content: content.into(),
            sender_id,
            sender: None,
            status: MessageStatus::Sent,
            created_at,
        }
    }

    /// Attach the sender profile.
    #[must_use]
    pub fn with_sender(mut self, username: impl Into<String>) -> Self {
        self.sender = Some(SenderProfile {
            id: self.sender_id,
            username: username.into(),
        });
        self
    }

    /// Name to show for the sender, falling back to the numeric id.
    #[must_use]
    pub fn sender_name(&self) -> String {
        match &self.sender {
            Some(profile) => profile.username.clone(),
            None => format!("user {}", self.sender_id),
        }
    }
}

/// An error reported to a single connection. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorFrame {
    #[serde(rename = "type")]
    kind: MessageKind,
    /// Human-readable summary.
    pub content: String,
    /// Underlying error text, only present in development mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ErrorFrame {
    /// Create an error frame without detail.
    #[must_use]
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Error,
            content: content.into(),
            error: None,
        }
    }

    /// Attach the underlying error text.
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.error = Some(detail.into());
        self
    }

    /// The frame kind, always [`MessageKind::Error`].
    #[must_use]
    pub fn kind(&self) -> MessageKind {
        self.kind
    }
}

/// A frame written by the server to a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerFrame {
    Message(DeliveredMessage),
    Error(ErrorFrame),
}

impl From<DeliveredMessage> for ServerFrame {
    fn from(message: DeliveredMessage) -> Self {
        ServerFrame::Message(message)
    }
}

impl From<ErrorFrame> for ServerFrame {
    fn from(frame: ErrorFrame) -> Self {
        ServerFrame::Error(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_delivered_message_shape() {
        let msg = DeliveredMessage::text(42, "hi", 1, 1_700_000_000);
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "text",
                "chatId": 42,
                "content": "hi",
                "senderId": 1,
                "status": "sent",
                "createdAt": 1_700_000_000,
            })
        );
    }

    #[test]
    fn test_error_frame_shape() {
        let frame = ErrorFrame::new("error reading message");
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value, json!({"type": "error", "content": "error reading message"}));

        let detailed = frame.with_detail("eof");
        let value = serde_json::to_value(&detailed).unwrap();
        assert_eq!(value["error"], "eof");
    }

    #[test]
    fn test_server_frame_untagged() {
        let error: ServerFrame =
            serde_json::from_value(json!({"type": "error", "content": "boom"})).unwrap();
        assert!(matches!(error, ServerFrame::Error(ref e) if e.content == "boom"));

        let message: ServerFrame = serde_json::from_value(json!({
            "type": "text", "chatId": 7, "content": "yo", "senderId": 3,
            "status": "sent", "createdAt": 5
        }))
        .unwrap();
        assert!(matches!(message, ServerFrame::Message(ref m) if m.chat_id == 7));
    }

    #[test]
    fn test_sender_name_fallback() {
        let msg = DeliveredMessage::text(1, "x", 9, 0);
        assert_eq!(msg.sender_name(), "user 9");
        assert_eq!(msg.with_sender("alice").sender_name(), "alice");
    }
}
