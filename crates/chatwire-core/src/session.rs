//! Connection sessions.
//!
//! A session is the live subscription of one connected identity. It moves
//! through `Connecting -> Listening -> Closed`. While listening, a background
//! task pulls broker events and forwards them into a bounded delivery queue
//! consumed by the connection's write path. Closing is idempotent: it
//! cancels the broker subscription and raises a cooperative stop signal; the
//! forwarding task finishes its in-flight hop and drops the queue.

use chatwire_protocol::UserId;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::broker::{
    Broker, BrokerError, BrokerEvent, ChannelId, EventStream, Subscription, SubscriptionHandle,
};
use crate::model::Identity;
use crate::signal::{stop_pair, StopSignal, Stopper};

/// Session identifier, unique within the process.
pub type SessionId = u64;

static SESSION_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Default delivery queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Receiving end of a session's delivery queue.
pub type DeliveryQueue = mpsc::Receiver<Arc<BrokerEvent>>;

/// Session errors.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The broker refused the subscription.
    #[error("Subscribe failed: {0}")]
    Subscribe(#[from] BrokerError),
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Connecting = 0,
    Listening = 1,
    Closed = 2,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Connecting,
            1 => SessionState::Listening,
            _ => SessionState::Closed,
        }
    }
}

/// The live subscription of one connected identity.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    identity: Identity,
    state: AtomicU8,
    subscription: SubscriptionHandle,
    stopper: Stopper,
}

impl Session {
    /// Subscribe `channels` on behalf of `identity` and start listening.
    ///
    /// Returns the session and the receiving end of its delivery queue.
    ///
    /// # Errors
    ///
    /// Returns an error if the broker subscription fails; nothing is left
    /// running in that case.
    pub async fn open(
        identity: Identity,
        broker: &dyn Broker,
        channels: &[ChannelId],
        queue_capacity: usize,
    ) -> Result<(Arc<Session>, DeliveryQueue), SessionError> {
        let id = SESSION_COUNTER.fetch_add(1, Ordering::Relaxed);
        debug!(session = id, user = identity.id, channels = ?channels, "Session connecting");

        let Subscription { events, handle } = broker.subscribe(channels).await?;
        let (queue_tx, queue_rx) = mpsc::channel(queue_capacity.max(1));
        let (stopper, stop) = stop_pair();

        let session = Arc::new(Session {
            id,
            identity,
            state: AtomicU8::new(SessionState::Connecting as u8),
            subscription: handle,
            stopper,
        });

        tokio::spawn(listen(id, session.user_id(), events, queue_tx, stop));
        session.advance(SessionState::Connecting, SessionState::Listening);

        Ok((session, queue_rx))
    }

    /// Session id.
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// The owning user.
    #[must_use]
    pub fn user_id(&self) -> UserId {
        self.identity.id
    }

    /// Identity snapshot taken at connect time.
    #[must_use]
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Channels this session listens to, fixed at connect time.
    #[must_use]
    pub fn channels(&self) -> &[ChannelId] {
        self.subscription.channels()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Whether the session has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state() == SessionState::Closed
    }

    /// Close the session. Never blocks.
    ///
    /// Returns `true` for the call that performed the teardown; closing an
    /// already closed session is a no-op.
    pub fn close(&self) -> bool {
        let previous = self
            .state
            .swap(SessionState::Closed as u8, Ordering::AcqRel);
        if SessionState::from_u8(previous) == SessionState::Closed {
            return false;
        }

        self.subscription.unsubscribe();
        self.stopper.stop();
        debug!(session = self.id, user = self.user_id(), "Session closed");
        true
    }

    /// Wait until the session is closed.
    pub async fn closed(&self) {
        self.stopper.signal().stopped().await;
    }

    fn advance(&self, from: SessionState, to: SessionState) {
        let _ = self.state.compare_exchange(
            from as u8,
            to as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }
}

/// Forward broker events into the delivery queue until stopped.
async fn listen(
    session: SessionId,
    user: UserId,
    mut events: EventStream,
    queue: mpsc::Sender<Arc<BrokerEvent>>,
    mut stop: StopSignal,
) {
    debug!(session, user, "Listener started");

    loop {
        let event = tokio::select! {
            biased;
            _ = stop.stopped() => break,
            event = events.recv() => event,
        };

        let Some(event) = event else {
            debug!(session, user, "Broker stream closed");
            break;
        };
        trace!(session, user, channel = %event.channel, "Queueing event");

        let queued = tokio::select! {
            biased;
            _ = stop.stopped() => false,
            sent = queue.send(event) => sent.is_ok(),
        };
        if !queued {
            break;
        }
    }

    debug!(session, user, "Listener stopped");
}
