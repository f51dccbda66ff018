//! Fixture loading for the in-memory stores.
//!
//! ```toml
//! [[users]]
//! id = 1
//! username = "alice"
//! blocked = [3]
//! devices = [{ type = "android", token = "..." }]
//!
//! [[chats]]
//! id = 42
//! type = "private"
//! members = [1, 2]
//! ```

use anyhow::{Context, Result};
use chatwire_core::model::{ChatKind, Device, Identity};
use chatwire_core::MemoryStore;
use chatwire_protocol::{ChatId, UserId};
use serde::Deserialize;
use std::path::Path;
use tracing::info;

/// Contents of a seed file.
#[derive(Debug, Default, Deserialize)]
pub struct Seed {
    #[serde(default)]
    pub users: Vec<SeedUser>,
    #[serde(default)]
    pub chats: Vec<SeedChat>,
}

#[derive(Debug, Deserialize)]
pub struct SeedUser {
    pub id: UserId,
    pub username: String,
    #[serde(default)]
    pub blocked: Vec<UserId>,
    #[serde(default)]
    pub devices: Vec<Device>,
}

#[derive(Debug, Deserialize)]
pub struct SeedChat {
    pub id: ChatId,
    #[serde(rename = "type")]
    pub kind: ChatKind,
    pub members: Vec<UserId>,
}

impl Seed {
    /// Parse a seed document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not valid seed TOML.
    pub fn parse(contents: &str) -> Result<Self> {
        toml::from_str(contents).context("Failed to parse seed data")
    }

    /// Read a seed file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read seed file: {}", path.display()))?;
        Self::parse(&contents).with_context(|| format!("Invalid seed file: {}", path.display()))
    }

    /// Load users, then chats, into `store`.
    pub fn apply(self, store: &MemoryStore) {
        let (users, chats) = (self.users.len(), self.chats.len());
        for user in self.users {
            let mut identity = Identity::new(user.id, user.username);
            identity.blocked = user.blocked.into_iter().collect();
            identity.devices = user.devices;
            store.insert_identity(identity);
        }
        for chat in self.chats {
            store.create_chat(chat.id, chat.kind, &chat.members);
        }
        info!(users, chats, "Seeded in-memory store");
    }
}
