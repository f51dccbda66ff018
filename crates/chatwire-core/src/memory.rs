//! In-memory collaborators.
//!
//! [`MemoryStore`] implements every store trait over concurrent maps and
//! [`RecordingPushGateway`] keeps the notifications it was asked to send.
//! Both back the development server and the test suites.

use async_trait::async_trait;
use chatwire_protocol::{ChatId, DeliveredMessage, UserId};
use dashmap::{DashMap, DashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tracing::trace;

use crate::model::{Chat, ChatKind, ChatMember, Identity};
use crate::store::{ChatStore, IdentityStore, MessageStore, PushError, PushGateway, StoreError};

#[derive(Debug, Clone)]
struct ChatRecord {
    kind: ChatKind,
    members: Vec<UserId>,
}

/// Identity, chat and message records held in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    identities: DashMap<UserId, Identity>,
    chats: DashMap<ChatId, ChatRecord>,
    messages: DashMap<ChatId, Vec<DeliveredMessage>>,
    fail_identity_writes: AtomicBool,
    fail_message_writes: AtomicBool,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an identity.
    pub fn insert_identity(&self, identity: Identity) {
        self.identities.insert(identity.id, identity);
    }

    /// Current copy of an identity.
    #[must_use]
    pub fn identity(&self, id: UserId) -> Option<Identity> {
        self.identities.get(&id).map(|i| i.value().clone())
    }

    /// Create a chat and add it to each member's memberships.
    ///
    /// Members without an identity record are kept on the chat but get no
    /// membership entry.
    pub fn create_chat(&self, id: ChatId, kind: ChatKind, members: &[UserId]) {
        self.chats.insert(
            id,
            ChatRecord {
                kind,
                members: members.to_vec(),
            },
        );
        for member in members {
            if let Some(mut identity) = self.identities.get_mut(member) {
                if !identity.chats.contains(&id) {
                    identity.chats.push(id);
                }
            }
        }
    }

    /// Record that `user` has blocked `blocked`.
    pub fn block(&self, user: UserId, blocked: UserId) {
        if let Some(mut identity) = self.identities.get_mut(&user) {
            identity.blocked.insert(blocked);
        }
    }

    /// Make identity updates fail until reset.
    pub fn fail_identity_writes(&self, fail: bool) {
        self.fail_identity_writes.store(fail, Ordering::Relaxed);
    }

    /// Make message writes fail until reset.
    pub fn fail_message_writes(&self, fail: bool) {
        self.fail_message_writes.store(fail, Ordering::Relaxed);
    }

    /// Messages persisted for a chat, oldest first.
    #[must_use]
    pub fn messages_for(&self, chat: ChatId) -> Vec<DeliveredMessage> {
        self.messages
            .get(&chat)
            .map(|m| m.value().clone())
            .unwrap_or_default()
    }

    /// Total number of persisted messages.
    #[must_use]
    pub fn message_count(&self) -> usize {
        self.messages.iter().map(|m| m.len()).sum()
    }
}

#[async_trait]
impl IdentityStore for MemoryStore {
    async fn find_by_id(&self, id: UserId) -> Result<Identity, StoreError> {
        self.identity(id).ok_or(StoreError::UserNotFound(id))
    }

    async fn update(&self, identity: &Identity) -> Result<(), StoreError> {
        if self.fail_identity_writes.load(Ordering::Relaxed) {
            return Err(StoreError::Unavailable("identity writes disabled".into()));
        }
        let mut stored = self
            .identities
            .get_mut(&identity.id)
            .ok_or(StoreError::UserNotFound(identity.id))?;
        stored.online = identity.online;
        stored.last_active = identity.last_active;
        trace!(user = identity.id, online = identity.online, "Identity updated");
        Ok(())
    }
}

#[async_trait]
impl ChatStore for MemoryStore {
    async fn find_by_id(&self, id: ChatId) -> Result<Chat, StoreError> {
        let record = self
            .chats
            .get(&id)
            .map(|c| c.value().clone())
            .ok_or(StoreError::ChatNotFound(id))?;

        let members = record
            .members
            .iter()
            .map(|member| ChatMember {
                id: *member,
                blocked: self
                    .identities
                    .get(member)
                    .map(|i| i.blocked.clone())
                    .unwrap_or_default(),
            })
            .collect();

        Ok(Chat {
            id,
            kind: record.kind,
            members,
        })
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn create(&self, message: &DeliveredMessage) -> Result<(), StoreError> {
        if self.fail_message_writes.load(Ordering::Relaxed) {
            return Err(StoreError::Unavailable("message writes disabled".into()));
        }
        self.messages
            .entry(message.chat_id)
            .or_default()
            .push(message.clone());
        Ok(())
    }
}

/// A notification handed to a [`RecordingPushGateway`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushRecord {
    pub token: String,
    pub title: String,
    pub body: String,
}

/// Push gateway that records notifications instead of sending them.
#[derive(Debug, Default)]
pub struct RecordingPushGateway {
    sent: Mutex<Vec<PushRecord>>,
    rejected: DashSet<String>,
}

impl RecordingPushGateway {
    /// Create an empty gateway.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every notification for `token`.
    pub fn reject(&self, token: impl Into<String>) {
        self.rejected.insert(token.into());
    }

    /// Notifications accepted so far.
    #[must_use]
    pub fn sent(&self) -> Vec<PushRecord> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }
}

#[async_trait]
impl PushGateway for RecordingPushGateway {
    async fn send(&self, token: &str, title: &str, body: &str) -> Result<(), PushError> {
        if self.rejected.contains(token) {
            return Err(PushError::Rejected(token.to_string()));
        }
        let record = PushRecord {
            token: token.to_string(),
            title: title.to_string(),
            body: body.to_string(),
        };
        match self.sent.lock() {
            Ok(mut sent) => sent.push(record),
            Err(poisoned) => poisoned.into_inner().push(record),
        }
        Ok(())
    }
}
