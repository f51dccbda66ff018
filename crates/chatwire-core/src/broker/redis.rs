//! Redis pub/sub broker.
//!
//! Publishing goes through a shared connection manager. Each subscription
//! opens its own pub/sub connection; cancelling it drops that connection,
//! which unsubscribes server-side. Broadcast channels are the members of a
//! Redis set.

use async_trait::async_trait;
use futures_util::StreamExt;
use ::redis::{aio::ConnectionManager, AsyncCommands, Client, RedisError};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{
    validate_channel_name, Broker, BrokerError, BrokerEvent, ChannelId, Subscription,
    SubscriptionFeed,
};

impl From<RedisError> for BrokerError {
    fn from(e: RedisError) -> Self {
        BrokerError::Unavailable(e.to_string())
    }
}

/// Redis broker configuration.
#[derive(Debug, Clone)]
pub struct RedisBrokerConfig {
    /// Redis connection URL (e.g., redis://localhost:6379).
    pub url: String,
    /// Set holding the broadcast channel names.
    pub broadcast_key: String,
    /// Buffered events per subscription stream.
    pub subscription_buffer: usize,
}

impl Default for RedisBrokerConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            broadcast_key: "channels".to_string(),
            subscription_buffer: 256,
        }
    }
}

/// Broker backed by Redis pub/sub.
pub struct RedisBroker {
    client: Client,
    conn: ConnectionManager,
    config: RedisBrokerConfig,
}

impl RedisBroker {
    /// Connect to Redis.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the server is unreachable.
    pub async fn connect(config: RedisBrokerConfig) -> Result<Self, BrokerError> {
        let client = Client::open(config.url.as_str())?;
        let conn = ConnectionManager::new(client.clone()).await?;

        info!(url = %config.url, "Connected to Redis");

        Ok(Self {
            client,
            conn,
            config,
        })
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn publish(&self, channel: &str, payload: &str) -> Result<usize, BrokerError> {
        validate_channel_name(channel).map_err(BrokerError::InvalidChannel)?;
        let mut conn = self.conn.clone();
        let receivers: usize = conn.publish(channel, payload).await?;
        Ok(receivers)
    }

    async fn subscribe(&self, channels: &[ChannelId]) -> Result<Subscription, BrokerError> {
        for name in channels {
            validate_channel_name(name).map_err(BrokerError::InvalidChannel)?;
        }

        let (subscription, feed) =
            Subscription::open(channels.to_vec(), self.config.subscription_buffer);
        if channels.is_empty() {
            return Ok(subscription);
        }

        let mut pubsub = self.client.get_async_pubsub().await?;
        for name in channels {
            pubsub.subscribe(name.as_str()).await?;
        }
        debug!(subscription = feed.id(), channels = channels.len(), "Subscribed");

        let stream = Box::pin(pubsub.into_on_message());
        tokio::spawn(pump(stream, feed));
        Ok(subscription)
    }

    async fn broadcast_channels(&self) -> Result<Vec<ChannelId>, BrokerError> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = conn.smembers(&self.config.broadcast_key).await?;
        Ok(members)
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

/// Forward pub/sub messages until the subscription is cancelled.
async fn pump<S>(mut stream: S, mut feed: SubscriptionFeed)
where
    S: futures_util::Stream<Item = ::redis::Msg> + Unpin + Send,
{
    loop {
        let message = tokio::select! {
            biased;
            _ = feed.stopped() => break,
            message = stream.next() => message,
        };

        let Some(message) = message else {
            warn!(subscription = feed.id(), "Redis pub/sub stream ended");
            break;
        };

        let payload: String = match message.get_payload() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(subscription = feed.id(), error = %e, "Dropping non-text payload");
                continue;
            }
        };
        let event = Arc::new(BrokerEvent::new(message.get_channel_name(), payload));
        if !feed.forward(event).await {
            break;
        }
    }

    debug!(subscription = feed.id(), "Redis subscription closed");
}
