//! Notification fallback.
//!
//! Pushes a delivered message to every device of every chat member other
//! than the sender. Failures are logged per recipient and per device and
//! never stop the remaining notifications.

use chatwire_protocol::DeliveredMessage;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::metrics;
use crate::store::{ChatStore, IdentityStore, PushGateway};

/// Outcome of one fallback run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NotifyReport {
    /// Notifications the gateway accepted.
    pub sent: usize,
    /// Notifications the gateway refused or could not take.
    pub failed: usize,
}

/// Sends push notifications for delivered messages.
#[derive(Clone)]
pub struct Notifier {
    chats: Arc<dyn ChatStore>,
    identities: Arc<dyn IdentityStore>,
    push: Arc<dyn PushGateway>,
}

impl Notifier {
    /// Create a notifier over the given collaborators.
    #[must_use]
    pub fn new(
        chats: Arc<dyn ChatStore>,
        identities: Arc<dyn IdentityStore>,
        push: Arc<dyn PushGateway>,
    ) -> Self {
        Self {
            chats,
            identities,
            push,
        }
    }

    /// Push `message` to the devices of every recipient in its chat.
    pub async fn notify(&self, message: &DeliveredMessage) -> NotifyReport {
        let mut report = NotifyReport::default();

        let chat = match self.chats.find_by_id(message.chat_id).await {
            Ok(chat) => chat,
            Err(e) => {
                warn!(chat = message.chat_id, error = %e, "Cannot resolve chat for push");
                metrics::record_error("push_lookup");
                return report;
            }
        };

        let title = format!("Message from {}", message.sender_name());
        for recipient in chat.recipients(message.sender_id) {
            let identity = match self.identities.find_by_id(recipient).await {
                Ok(identity) => identity,
                Err(e) => {
                    warn!(user = recipient, error = %e, "Cannot resolve recipient for push");
                    metrics::record_error("push_lookup");
                    continue;
                }
            };

            for device in &identity.devices {
                match self.push.send(&device.token, &title, &message.content).await {
                    Ok(()) => {
                        report.sent += 1;
                        metrics::record_push("sent");
                    }
                    Err(e) => {
                        warn!(user = recipient, device = ?device.kind, error = %e, "Push failed");
                        report.failed += 1;
                        metrics::record_push("failed");
                    }
                }
            }
        }

        debug!(
            chat = message.chat_id,
            sent = report.sent,
            failed = report.failed,
            "Notification fallback done"
        );
        report
    }
}
