//! Channel broker: the shared publish/subscribe medium.
//!
//! Publishing is fire-and-forget. A subscription yields a stream of
//! [`BrokerEvent`]s and a [`SubscriptionHandle`]; unsubscribing raises a
//! cooperative stop signal for the broker's forwarding tasks and returns
//! immediately, whatever is still buffered in the stream.

mod channel;
mod local;
#[cfg(feature = "redis")]
mod redis;

pub use channel::{validate_channel_name, Channel, MAX_CHANNEL_NAME_LENGTH};
pub use local::{LocalBroker, LocalBrokerConfig, LocalBrokerStats};
#[cfg(feature = "redis")]
pub use self::redis::{RedisBroker, RedisBrokerConfig};

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::signal::{stop_pair, StopSignal, Stopper};

/// A channel identifier.
pub type ChannelId = String;

/// Identifier of one subscription.
pub type SubscriptionId = u64;

static SUBSCRIPTION_COUNTER: AtomicU64 = AtomicU64::new(1);

/// A payload received on a subscribed channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEvent {
    /// Channel the payload was published on.
    pub channel: ChannelId,
    /// Raw payload.
    pub payload: String,
}

impl BrokerEvent {
    /// Create a new event.
    #[must_use]
    pub fn new(channel: impl Into<ChannelId>, payload: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            payload: payload.into(),
        }
    }
}

/// Inbound side of a subscription.
pub type EventStream = mpsc::Receiver<Arc<BrokerEvent>>;

/// Broker errors.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Invalid channel name.
    #[error("Invalid channel name: {0}")]
    InvalidChannel(&'static str),

    /// The broker backend could not be reached.
    #[error("Broker unavailable: {0}")]
    Unavailable(String),
}

/// A publish/subscribe medium shared by every session.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Publish a payload on a channel.
    ///
    /// Returns the number of subscribers reached, as far as the backend knows.
    async fn publish(&self, channel: &str, payload: &str) -> Result<usize, BrokerError>;

    /// Subscribe to a set of channels.
    ///
    /// An empty set is legal and yields a stream that never produces events.
    async fn subscribe(&self, channels: &[ChannelId]) -> Result<Subscription, BrokerError>;

    /// Channels every session listens to regardless of membership.
    async fn broadcast_channels(&self) -> Result<Vec<ChannelId>, BrokerError>;

    /// Backend name (e.g., "local", "redis").
    fn name(&self) -> &'static str;
}

/// An active subscription.
#[derive(Debug)]
pub struct Subscription {
    /// Events published on the subscribed channels.
    pub events: EventStream,
    /// Handle used to cancel the subscription.
    pub handle: SubscriptionHandle,
}

impl Subscription {
    /// Create a subscription and the feed a broker uses to fill it.
    ///
    /// The stream stays open until [`SubscriptionHandle::unsubscribe`] is
    /// called and every feed clone has been dropped.
    #[must_use]
    pub fn open(channels: Vec<ChannelId>, buffer: usize) -> (Self, SubscriptionFeed) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let (stopper, stop) = stop_pair();
        let id = SUBSCRIPTION_COUNTER.fetch_add(1, Ordering::Relaxed);
        let handle = SubscriptionHandle {
            id,
            channels,
            stopper,
            keepalive: Mutex::new(Some(tx.clone())),
        };
        (
            Self { events: rx, handle },
            SubscriptionFeed { id, tx, stop },
        )
    }
}

/// Cancellation handle of a subscription.
///
/// Dropping the handle unsubscribes.
#[derive(Debug)]
pub struct SubscriptionHandle {
    id: SubscriptionId,
    channels: Vec<ChannelId>,
    stopper: Stopper,
    keepalive: Mutex<Option<mpsc::Sender<Arc<BrokerEvent>>>>,
}

impl SubscriptionHandle {
    /// Subscription id.
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Channels covered by this subscription.
    #[must_use]
    pub fn channels(&self) -> &[ChannelId] {
        &self.channels
    }

    /// Whether the subscription is still active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.stopper.is_stopped()
    }

    /// Cancel the subscription. Never blocks.
    ///
    /// Returns `true` for the first call, `false` afterwards.
    pub fn unsubscribe(&self) -> bool {
        let first = self.stopper.stop();
        if let Ok(mut keepalive) = self.keepalive.lock() {
            keepalive.take();
        }
        first
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// Broker-side writer into one subscription's stream.
#[derive(Debug, Clone)]
pub struct SubscriptionFeed {
    id: SubscriptionId,
    tx: mpsc::Sender<Arc<BrokerEvent>>,
    stop: StopSignal,
}

impl SubscriptionFeed {
    /// Id of the subscription being fed.
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Whether the subscription has been cancelled.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stop.is_stopped()
    }

    /// Wait until the subscription is cancelled.
    pub async fn stopped(&mut self) {
        self.stop.stopped().await;
    }

    /// Push an event into the stream.
    ///
    /// Returns `false` when the subscription was cancelled or its stream
    /// dropped; the caller should stop forwarding.
    pub async fn forward(&mut self, event: Arc<BrokerEvent>) -> bool {
        tokio::select! {
            biased;
            _ = self.stop.stopped() => false,
            sent = self.tx.send(event) => sent.is_ok(),
        }
    }
}
