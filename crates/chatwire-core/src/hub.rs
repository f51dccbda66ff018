//! Relay hub: the entry point of the realtime core.
//!
//! The hub is constructed once at server start with its collaborators. A
//! transport hands it an authenticated user and an open connection; the hub
//! runs the session for as long as the connection lives:
//!
//! 1. connect: load the identity, subscribe, register (evicting any previous
//!    session only once the new one is subscribed) and mark the identity online
//! 2. serve: a read loop feeding the outbound pipeline, and an inbound task
//!    draining the session's delivery queue into the connection
//! 3. disconnect: close the session, drop it from the registry and mark the
//!    identity offline
//!
//! Disconnect runs exactly once per session whether the read loop ended on a
//! clean close, a read error, eviction by a newer session, or shutdown.

use chatwire_transport::{Connection, FrameReader, FrameWriter};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::broker::{Broker, BrokerError, ChannelId};
use crate::delivery::{write_frame, DeliveryPipeline, Outbound, READ_ERROR};
use crate::metrics;
use crate::model::{unix_now, AuthenticatedUser};
use crate::notify::Notifier;
use crate::registry::SessionRegistry;
use crate::session::{DeliveryQueue, Session, SessionError, DEFAULT_QUEUE_CAPACITY};
use crate::store::{ChatStore, IdentityStore, MessageStore, PushGateway, StoreError};

/// Errors raised while entering the core.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Identity lookup or presence update failed.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The session could not subscribe.
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Broadcast channels could not be listed.
    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),
}

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Delivery queue capacity per session.
    pub queue_capacity: usize,
    /// Include underlying error text in Error Frames.
    pub expose_error_detail: bool,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            expose_error_detail: false,
        }
    }
}

/// External collaborators of the hub.
#[derive(Clone)]
pub struct Collaborators {
    pub identities: Arc<dyn IdentityStore>,
    pub chats: Arc<dyn ChatStore>,
    pub messages: Arc<dyn MessageStore>,
    pub push: Arc<dyn PushGateway>,
}

/// Owns the session registry and drives connections through the core.
pub struct RelayHub {
    broker: Arc<dyn Broker>,
    identities: Arc<dyn IdentityStore>,
    registry: SessionRegistry,
    pipeline: Arc<DeliveryPipeline>,
    config: HubConfig,
}

impl RelayHub {
    /// Create a hub.
    #[must_use]
    pub fn new(broker: Arc<dyn Broker>, collaborators: Collaborators, config: HubConfig) -> Self {
        let notifier = Notifier::new(
            Arc::clone(&collaborators.chats),
            Arc::clone(&collaborators.identities),
            collaborators.push,
        );
        let pipeline = DeliveryPipeline::new(
            Arc::clone(&broker),
            collaborators.chats,
            collaborators.messages,
            notifier,
        )
        .with_error_detail(config.expose_error_detail);

        info!(broker = broker.name(), "Relay hub created");
        Self {
            broker,
            identities: collaborators.identities,
            registry: SessionRegistry::new(),
            pipeline: Arc::new(pipeline),
            config,
        }
    }

    /// Live session registry.
    #[must_use]
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Number of live sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.registry.len()
    }

    /// Name of the broker backend.
    #[must_use]
    pub fn broker_name(&self) -> &'static str {
        self.broker.name()
    }

    /// Start a session for `user`.
    ///
    /// A live session for the same identity is replaced and closed once the
    /// new session is subscribed; if the identity or the subscription cannot
    /// be had, the previous session keeps running. On success the identity
    /// is online and the returned queue yields broker events for the session.
    ///
    /// # Errors
    ///
    /// Fails when the identity cannot be loaded, the subscription cannot be
    /// made, or the online flag cannot be persisted. In the last case the new
    /// session is torn down through [`RelayHub::disconnect`], which marks the
    /// identity offline.
    pub async fn connect(
        &self,
        user: AuthenticatedUser,
    ) -> Result<(Arc<Session>, DeliveryQueue), RelayError> {
        let mut identity = self.identities.find_by_id(user.id).await?;
        let channels = self.channels_for(&identity.chat_channels()).await?;

        identity.online = true;
        identity.last_active = unix_now();
        let (session, queue) =
            Session::open(identity.clone(), self.broker.as_ref(), &channels, self.config.queue_capacity)
                .await?;

        // The previous session stays registered until its successor is subscribed.
        if let Some(displaced) = self.registry.register(Arc::clone(&session)) {
            debug!(user = user.id, session = displaced.id(), "Evicting previous session");
            displaced.close();
        }

        if let Err(e) = self.identities.update(&identity).await {
            warn!(user = user.id, error = %e, "Cannot mark identity online");
            self.disconnect(&session).await;
            return Err(e.into());
        }

        info!(user = user.id, session = session.id(), channels = channels.len(), "Connected");
        Ok((session, queue))
    }

    /// Tear down a session and mark its identity offline.
    ///
    /// Presence is only updated if `session` was still the registered one;
    /// a session evicted by a reconnect leaves presence to its successor.
    /// Returns whether presence was updated.
    pub async fn disconnect(&self, session: &Session) -> bool {
        session.close();
        if !self.registry.remove_session(session) {
            debug!(user = session.user_id(), session = session.id(), "Session already replaced");
            return false;
        }

        let mut identity = session.identity().clone();
        identity.online = false;
        identity.last_active = unix_now();
        if let Err(e) = self.identities.update(&identity).await {
            warn!(user = identity.id, error = %e, "Cannot mark identity offline");
            metrics::record_error("presence");
        }

        info!(user = identity.id, session = session.id(), "Disconnected");
        true
    }

    /// Run a connection for `user` until it closes.
    ///
    /// # Errors
    ///
    /// Returns the connect error if the session could not be started; the
    /// connection is closed in that case.
    pub async fn serve<C: Connection>(
        &self,
        user: AuthenticatedUser,
        conn: C,
    ) -> Result<(), RelayError> {
        let conn_id = conn.id().clone();
        let (mut reader, mut writer) = conn.split();

        let (session, queue) = match self.connect(user).await {
            Ok(connected) => connected,
            Err(e) => {
                if let Err(close) = writer.close().await {
                    debug!(user = user.id, error = %close, "Close after refused connect failed");
                }
                return Err(e);
            }
        };
        debug!(user = user.id, conn = %conn_id, session = session.id(), "Serving connection");

        let writer = Arc::new(Mutex::new(writer));
        let inbound = tokio::spawn(run_inbound(
            Arc::clone(&self.pipeline),
            Arc::clone(&session),
            queue,
            Arc::clone(&writer),
        ));

        loop {
            let received = tokio::select! {
                biased;
                _ = session.closed() => {
                    debug!(user = user.id, session = session.id(), "Session closed externally");
                    break;
                }
                received = reader.recv() => received,
            };

            match received {
                Ok(Some(frame)) => {
                    if let Outbound::Rejected(error) =
                        self.pipeline.submit(session.identity(), frame).await
                    {
                        write_frame(user.id, &writer, error.into()).await;
                    }
                }
                Ok(None) => {
                    debug!(user = user.id, conn = %conn_id, "Connection closed by peer");
                    break;
                }
                Err(e) if e.is_recoverable() => {
                    debug!(user = user.id, error = %e, "Malformed frame");
                    metrics::record_error("read");
                    let error = self.pipeline.error_frame(READ_ERROR, &e);
                    write_frame(user.id, &writer, error.into()).await;
                }
                Err(e) => {
                    warn!(user = user.id, conn = %conn_id, error = %e, "Read failed");
                    break;
                }
            }
        }

        self.disconnect(&session).await;
        if let Err(e) = inbound.await {
            warn!(user = user.id, error = %e, "Inbound task failed");
        }
        if let Err(e) = writer.lock().await.close().await {
            debug!(user = user.id, error = %e, "Close after disconnect failed");
        }
        Ok(())
    }

    /// Close every live session. Each serving connection then runs its own
    /// disconnect sequence.
    pub fn shutdown(&self) -> usize {
        let closed = self.registry.close_all();
        info!(sessions = closed, "Relay hub shutting down");
        closed
    }

    async fn channels_for(&self, chats: &[ChannelId]) -> Result<Vec<ChannelId>, BrokerError> {
        let mut channels = self.broker.broadcast_channels().await?;
        for channel in chats {
            if !channels.contains(channel) {
                channels.push(channel.clone());
            }
        }
        Ok(channels)
    }
}

/// Drain a session's delivery queue into its connection.
async fn run_inbound<W>(
    pipeline: Arc<DeliveryPipeline>,
    session: Arc<Session>,
    mut queue: DeliveryQueue,
    writer: Arc<Mutex<W>>,
) where
    W: FrameWriter,
{
    let user = session.user_id();
    loop {
        let event = tokio::select! {
            biased;
            _ = session.closed() => break,
            event = queue.recv() => event,
        };
        let Some(event) = event else {
            break;
        };
        pipeline.deliver(user, &event, writer.as_ref()).await;
    }
    debug!(user, session = session.id(), "Inbound task stopped");
}
