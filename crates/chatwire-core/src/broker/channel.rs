//! In-process channel used by the local broker.
//!
//! A channel is a named broadcast topic. It exists while at least one
//! subscription listens to it.

use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, trace};

use super::{BrokerEvent, ChannelId, SubscriptionId};

/// Maximum channel name length.
pub const MAX_CHANNEL_NAME_LENGTH: usize = 256;

/// Default broadcast channel capacity.
const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Validate a channel name.
///
/// # Errors
///
/// Returns an error message if the channel name is invalid.
pub fn validate_channel_name(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("Channel name cannot be empty");
    }
    if name.len() > MAX_CHANNEL_NAME_LENGTH {
        return Err("Channel name too long");
    }
    if !name.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) {
        return Err("Channel name contains invalid characters");
    }
    Ok(())
}

/// A broadcast topic and the subscriptions attached to it.
#[derive(Debug)]
pub struct Channel {
    name: ChannelId,
    sender: broadcast::Sender<Arc<BrokerEvent>>,
    subscribers: HashSet<SubscriptionId>,
    capacity: usize,
}

impl Channel {
    /// Create a new channel.
    #[must_use]
    pub fn new(name: impl Into<ChannelId>) -> Self {
        Self::with_capacity(name, DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a new channel with a specific capacity.
    #[must_use]
    pub fn with_capacity(name: impl Into<ChannelId>, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            name: name.into(),
            sender,
            subscribers: HashSet::new(),
            capacity,
        }
    }

    /// Get the channel name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the number of subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Check if a subscription is attached.
    #[must_use]
    pub fn is_subscribed(&self, subscription: SubscriptionId) -> bool {
        self.subscribers.contains(&subscription)
    }

    /// Attach a subscription and return its receiver.
    pub fn subscribe(
        &mut self,
        subscription: SubscriptionId,
    ) -> broadcast::Receiver<Arc<BrokerEvent>> {
        self.subscribers.insert(subscription);
        debug!(channel = %self.name, subscription, "Subscription attached");
        self.sender.subscribe()
    }

    /// Detach a subscription.
    ///
    /// Returns `true` if the subscription was attached.
    pub fn unsubscribe(&mut self, subscription: SubscriptionId) -> bool {
        let removed = self.subscribers.remove(&subscription);
        if removed {
            debug!(channel = %self.name, subscription, "Subscription detached");
        }
        removed
    }

    /// Publish a payload to every attached subscription.
    ///
    /// Returns the number of receivers that got the event.
    pub fn publish(&self, payload: impl Into<String>) -> usize {
        let event = Arc::new(BrokerEvent::new(self.name.clone(), payload));
        trace!(channel = %self.name, "Publishing event");
        self.sender.send(event).unwrap_or_default()
    }

    /// Check if the channel has no subscriptions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Get the channel capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
