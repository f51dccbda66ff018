//! External collaborators consumed by the core.
//!
//! Persistence and push delivery live outside this crate. Implementations
//! must be safe for concurrent use; the core adds no locking around them.

use async_trait::async_trait;
use chatwire_protocol::{ChatId, DeliveredMessage, UserId};
use thiserror::Error;

use crate::model::{Chat, Identity};

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No identity with this id.
    #[error("User not found: {0}")]
    UserNotFound(UserId),

    /// No chat with this id.
    #[error("Chat not found: {0}")]
    ChatNotFound(ChatId),

    /// The backing store could not be reached or rejected the operation.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Identity records.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Load a complete identity, including memberships, blocks and devices.
    async fn find_by_id(&self, id: UserId) -> Result<Identity, StoreError>;

    /// Persist the identity's `online` and `last_active` fields.
    async fn update(&self, identity: &Identity) -> Result<(), StoreError>;
}

/// Chat records.
#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Load a chat with its members and their block lists.
    async fn find_by_id(&self, id: ChatId) -> Result<Chat, StoreError>;
}

/// Message records.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a delivered message.
    async fn create(&self, message: &DeliveredMessage) -> Result<(), StoreError>;
}

/// Push gateway errors.
#[derive(Debug, Error)]
pub enum PushError {
    /// The gateway rejected the token.
    #[error("Push rejected for token: {0}")]
    Rejected(String),

    /// The gateway could not be reached.
    #[error("Push gateway unavailable: {0}")]
    Unavailable(String),
}

/// Out-of-band notification delivery keyed by device token.
#[async_trait]
pub trait PushGateway: Send + Sync {
    /// Submit one notification to one device.
    async fn send(&self, token: &str, title: &str, body: &str) -> Result<(), PushError>;
}
