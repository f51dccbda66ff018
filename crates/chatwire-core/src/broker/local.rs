//! Single-process broker.
//!
//! Channels live in a concurrent map. Each subscription gets one forwarding
//! task per channel, moving events from the channel's broadcast receiver into
//! the subscription stream until the subscription is cancelled.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};

use super::channel::{validate_channel_name, Channel};
use super::{Broker, BrokerError, ChannelId, Subscription, SubscriptionFeed, SubscriptionId};

/// Local broker configuration.
#[derive(Debug, Clone)]
pub struct LocalBrokerConfig {
    /// Per-channel broadcast capacity.
    pub channel_capacity: usize,
    /// Buffered events per subscription stream.
    pub subscription_buffer: usize,
    /// Channels every session listens to.
    pub broadcast_channels: Vec<ChannelId>,
}

impl Default for LocalBrokerConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
            subscription_buffer: 256,
            broadcast_channels: Vec::new(),
        }
    }
}

/// Broker statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalBrokerStats {
    /// Channels with at least one subscription.
    pub channel_count: usize,
    /// Channel attachments across all subscriptions.
    pub total_subscriptions: usize,
    /// Publish calls accepted.
    pub published: u64,
}

/// In-process publish/subscribe broker.
pub struct LocalBroker {
    channels: Arc<DashMap<ChannelId, Channel>>,
    config: LocalBrokerConfig,
    published: AtomicU64,
}

impl LocalBroker {
    /// Create a new broker with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(LocalBrokerConfig::default())
    }

    /// Create a new broker with custom configuration.
    #[must_use]
    pub fn with_config(config: LocalBrokerConfig) -> Self {
        info!("Creating local broker with config: {:?}", config);
        Self {
            channels: Arc::new(DashMap::new()),
            config,
            published: AtomicU64::new(0),
        }
    }

    /// Get broker statistics.
    #[must_use]
    pub fn stats(&self) -> LocalBrokerStats {
        LocalBrokerStats {
            channel_count: self.channels.len(),
            total_subscriptions: self.channels.iter().map(|c| c.subscriber_count()).sum(),
            published: self.published.load(Ordering::Relaxed),
        }
    }

    /// Check if a channel currently has subscriptions.
    #[must_use]
    pub fn channel_exists(&self, channel: &str) -> bool {
        self.channels.contains_key(channel)
    }

    /// Get the subscription count for a channel.
    #[must_use]
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .get(channel)
            .map(|c| c.subscriber_count())
            .unwrap_or(0)
    }
}

impl Default for LocalBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for LocalBroker {
    async fn publish(&self, channel: &str, payload: &str) -> Result<usize, BrokerError> {
        validate_channel_name(channel).map_err(BrokerError::InvalidChannel)?;
        self.published.fetch_add(1, Ordering::Relaxed);

        let count = self
            .channels
            .get(channel)
            .map(|c| c.publish(payload))
            .unwrap_or(0);
        trace!(channel = %channel, recipients = count, "Published");
        Ok(count)
    }

    async fn subscribe(&self, channels: &[ChannelId]) -> Result<Subscription, BrokerError> {
        for name in channels {
            validate_channel_name(name).map_err(BrokerError::InvalidChannel)?;
        }

        let mut seen = HashSet::new();
        let unique: Vec<ChannelId> = channels
            .iter()
            .filter(|name| seen.insert(name.as_str()))
            .cloned()
            .collect();

        let (subscription, feed) =
            Subscription::open(unique.clone(), self.config.subscription_buffer);
        let id = feed.id();

        for name in unique {
            let rx = self
                .channels
                .entry(name.clone())
                .or_insert_with(|| {
                    debug!(channel = %name, "Creating new channel");
                    Channel::with_capacity(name.clone(), self.config.channel_capacity)
                })
                .subscribe(id);

            tokio::spawn(forward(
                Arc::clone(&self.channels),
                name,
                rx,
                feed.clone(),
            ));
        }

        debug!(
            subscription = id,
            channels = subscription.handle.channels().len(),
            "Subscribed"
        );
        Ok(subscription)
    }

    async fn broadcast_channels(&self) -> Result<Vec<ChannelId>, BrokerError> {
        Ok(self.config.broadcast_channels.clone())
    }

    fn name(&self) -> &'static str {
        "local"
    }
}

/// Move events from one channel into a subscription until it is cancelled.
async fn forward(
    channels: Arc<DashMap<ChannelId, Channel>>,
    name: ChannelId,
    mut rx: broadcast::Receiver<Arc<super::BrokerEvent>>,
    mut feed: SubscriptionFeed,
) {
    loop {
        let received = tokio::select! {
            biased;
            _ = feed.stopped() => break,
            received = rx.recv() => received,
        };

        match received {
            Ok(event) => {
                if !feed.forward(event).await {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Closed) => break,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(channel = %name, subscription = feed.id(), skipped, "Subscription lagged");
            }
        }
    }

    release(&channels, &name, feed.id());
}

/// Detach a subscription and drop the channel once nobody listens.
fn release(channels: &DashMap<ChannelId, Channel>, name: &str, subscription: SubscriptionId) {
    if let Some(mut channel) = channels.get_mut(name) {
        channel.unsubscribe(subscription);
    }
    if channels.remove_if(name, |_, c| c.is_empty()).is_some() {
        debug!(channel = %name, "Deleted empty channel");
    }
}
