//! Identity and chat records the core reads from its stores.

use chatwire_protocol::{ChatId, UserId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::broker::ChannelId;

/// Current time in Unix seconds.
#[must_use]
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

/// The broker channel carrying a chat's traffic.
#[must_use]
pub fn channel_for(chat_id: ChatId) -> ChannelId {
    chat_id.to_string()
}

/// A user identity that has already been verified by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AuthenticatedUser {
    /// Verified user id.
    pub id: UserId,
}

impl AuthenticatedUser {
    /// Wrap a verified user id.
    #[must_use]
    pub fn new(id: UserId) -> Self {
        Self { id }
    }
}

/// Device platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Web,
    Android,
    Ios,
}

/// A device registered for push notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Platform.
    #[serde(rename = "type")]
    pub kind: DeviceKind,
    /// Free-form label, e.g. the browser name.
    #[serde(default)]
    pub name: String,
    /// Push token issued by the platform.
    pub token: String,
}

impl Device {
    /// Create a device.
    #[must_use]
    pub fn new(kind: DeviceKind, token: impl Into<String>) -> Self {
        Self {
            kind,
            name: String::new(),
            token: token.into(),
        }
    }
}

/// A user as seen by the realtime core.
///
/// `online` and `last_active` are written by the core; everything else is
/// owned by the identity store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub id: UserId,
    pub username: String,
    #[serde(default)]
    pub online: bool,
    #[serde(default)]
    pub last_active: i64,
    /// Chats this user is a member of.
    #[serde(default)]
    pub chats: Vec<ChatId>,
    /// Users this user has blocked.
    #[serde(default)]
    pub blocked: HashSet<UserId>,
    #[serde(default)]
    pub devices: Vec<Device>,
}

impl Identity {
    /// Create an offline identity with no memberships.
    #[must_use]
    pub fn new(id: UserId, username: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
            online: false,
            last_active: 0,
            chats: Vec::new(),
            blocked: HashSet::new(),
            devices: Vec::new(),
        }
    }

    /// Whether this user has blocked `other`.
    #[must_use]
    pub fn has_blocked(&self, other: UserId) -> bool {
        self.blocked.contains(&other)
    }

    /// Channels for every chat this user belongs to.
    #[must_use]
    pub fn chat_channels(&self) -> Vec<ChannelId> {
        self.chats.iter().map(|id| channel_for(*id)).collect()
    }
}

/// Chat type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    Private,
    Group,
}

/// A chat member with the block list needed for delivery policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMember {
    pub id: UserId,
    pub blocked: HashSet<UserId>,
}

/// A chat as resolved by the chat store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chat {
    pub id: ChatId,
    pub kind: ChatKind,
    pub members: Vec<ChatMember>,
}

impl Chat {
    /// The chat's broker channel.
    #[must_use]
    pub fn channel(&self) -> ChannelId {
        channel_for(self.id)
    }

    /// Whether a message from `sender` must be dropped.
    ///
    /// Only private chats apply block suppression: the message is dropped when
    /// any other member has blocked the sender.
    #[must_use]
    pub fn blocks_sender(&self, sender: UserId) -> bool {
        self.kind == ChatKind::Private
            && self
                .members
                .iter()
                .any(|m| m.id != sender && m.blocked.contains(&sender))
    }

    /// Member ids other than `sender`.
    pub fn recipients(&self, sender: UserId) -> impl Iterator<Item = UserId> + '_ {
        self.members
            .iter()
            .map(|m| m.id)
            .filter(move |id| *id != sender)
    }
}
