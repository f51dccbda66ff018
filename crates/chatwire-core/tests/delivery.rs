//! End-to-end delivery behaviour through the relay hub.
//!
//! Every test drives real sessions over in-process connections with the
//! local broker and in-memory stores.

use async_trait::async_trait;
use chatwire_core::broker::{Broker, BrokerError, ChannelId, Subscription};
use chatwire_core::memory::{MemoryStore, RecordingPushGateway};
use chatwire_core::model::{AuthenticatedUser, ChatKind, Device, DeviceKind, Identity};
use chatwire_core::session::SessionId;
use chatwire_core::{Collaborators, HubConfig, LocalBroker, RelayError, RelayHub};
use chatwire_protocol::{
    ChatId, DeliveredMessage, MessageKind, MessageStatus, OutboundFrame, ServerFrame, UserId,
};
use chatwire_transport::memory::{pair, ChannelPeer};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

const ALICE: UserId = 1;
const BOB: UserId = 2;
const CAROL: UserId = 3;

const PRIVATE: ChatId = 42;
const GROUP: ChatId = 7;
const ALICE_CAROL: ChatId = 43;

const WAIT: Duration = Duration::from_secs(1);
const QUIET: Duration = Duration::from_millis(100);

struct Harness {
    store: Arc<MemoryStore>,
    broker: Arc<LocalBroker>,
    push: Arc<RecordingPushGateway>,
    hub: Arc<RelayHub>,
}

struct Client {
    peer: ChannelPeer,
    task: JoinHandle<Result<(), RelayError>>,
    session: SessionId,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(HubConfig::default())
    }

    fn with_config(config: HubConfig) -> Self {
        Self::build(config, |local| local as Arc<dyn Broker>)
    }

    /// Build a harness whose hub talks to `wrap(local broker)`.
    fn build(config: HubConfig, wrap: impl FnOnce(Arc<LocalBroker>) -> Arc<dyn Broker>) -> Self {
        let store = Arc::new(MemoryStore::new());
        let mut bob = Identity::new(BOB, "bob");
        bob.devices = vec![Device::new(DeviceKind::Android, "bob-phone")];
        store.insert_identity(Identity::new(ALICE, "alice"));
        store.insert_identity(bob);
        store.insert_identity(Identity::new(CAROL, "carol"));
        store.create_chat(PRIVATE, ChatKind::Private, &[ALICE, BOB]);
        store.create_chat(GROUP, ChatKind::Group, &[ALICE, BOB, CAROL]);
        store.create_chat(ALICE_CAROL, ChatKind::Private, &[ALICE, CAROL]);

        let broker = Arc::new(LocalBroker::new());
        let push = Arc::new(RecordingPushGateway::new());
        let collaborators = Collaborators {
            identities: store.clone(),
            chats: store.clone(),
            messages: store.clone(),
            push: push.clone(),
        };
        let hub = Arc::new(RelayHub::new(wrap(broker.clone()), collaborators, config));
        Self {
            store,
            broker,
            push,
            hub,
        }
    }

    /// Serve a new connection for `user` and wait until its session is live.
    async fn connect(&self, user: UserId) -> Client {
        let previous = self.hub.registry().lookup(user).map(|s| s.id());
        let (conn, peer) = pair(32);
        let hub = Arc::clone(&self.hub);
        let task = tokio::spawn(async move { hub.serve(AuthenticatedUser::new(user), conn).await });

        let hub = &self.hub;
        wait_until(|| {
            hub.registry()
                .lookup(user)
                .is_some_and(|s| Some(s.id()) != previous)
        })
        .await;
        let session = hub.registry().lookup(user).unwrap().id();
        Client {
            peer,
            task,
            session,
        }
    }

    fn online(&self, user: UserId) -> bool {
        self.store.identity(user).unwrap().online
    }
}

impl Client {
    async fn send(&self, chat: ChatId, content: &str) {
        self.peer
            .send(&OutboundFrame::new(chat, content))
            .await
            .unwrap();
    }

    async fn expect_message(&mut self) -> DeliveredMessage {
        match self.peer.recv_timeout(WAIT).await {
            Some(ServerFrame::Message(message)) => message,
            other => panic!("expected a message, got {other:?}"),
        }
    }

    async fn expect_error(&mut self) -> String {
        match self.peer.recv_timeout(WAIT).await {
            Some(ServerFrame::Error(error)) => error.content,
            other => panic!("expected an error frame, got {other:?}"),
        }
    }

    async fn expect_nothing(&mut self) {
        if let Some(frame) = self.peer.recv_timeout(QUIET).await {
            panic!("expected no frame, got {frame:?}");
        }
    }

    /// Close the client side and wait for the server to finish.
    async fn hang_up(mut self) {
        self.peer.close();
        finish(self.task).await;
    }
}

async fn finish(task: JoinHandle<Result<(), RelayError>>) {
    tokio::time::timeout(WAIT, task)
        .await
        .expect("serve did not finish")
        .unwrap()
        .unwrap();
}

/// Local broker whose broadcast-channel listing can be made to fail.
struct FlakyListing {
    inner: Arc<LocalBroker>,
    failing: Arc<AtomicBool>,
}

#[async_trait]
impl Broker for FlakyListing {
    async fn publish(&self, channel: &str, payload: &str) -> Result<usize, BrokerError> {
        self.inner.publish(channel, payload).await
    }

    async fn subscribe(&self, channels: &[ChannelId]) -> Result<Subscription, BrokerError> {
        self.inner.subscribe(channels).await
    }

    async fn broadcast_channels(&self) -> Result<Vec<ChannelId>, BrokerError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(BrokerError::Unavailable("channels set unreachable".into()));
        }
        self.inner.broadcast_channels().await
    }

    fn name(&self) -> &'static str {
        "flaky-listing"
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}

#[tokio::test]
async fn private_message_reaches_recipient_only() {
    let h = Harness::new();
    let mut alice = h.connect(ALICE).await;
    let mut bob = h.connect(BOB).await;

    alice.send(PRIVATE, "hi").await;

    let received = bob.expect_message().await;
    assert_eq!(received.kind, MessageKind::Text);
    assert_eq!(received.chat_id, PRIVATE);
    assert_eq!(received.content, "hi");
    assert_eq!(received.sender_id, ALICE);
    assert_eq!(received.status, MessageStatus::Sent);
    alice.expect_nothing().await;

    wait_until(|| h.store.message_count() == 1).await;
    assert_eq!(h.store.messages_for(PRIVATE), vec![received]);
    assert_eq!(h.broker.stats().published, 1);
}

#[tokio::test]
async fn persisted_message_round_trips() {
    let h = Harness::new();
    let alice = h.connect(ALICE).await;

    alice.send(GROUP, "lunch?").await;
    wait_until(|| h.store.message_count() == 1).await;

    let persisted = h.store.messages_for(GROUP);
    let stored = &persisted[0];
    assert_eq!(
        (stored.chat_id, stored.content.as_str(), stored.sender_id, stored.status),
        (GROUP, "lunch?", ALICE, MessageStatus::Sent)
    );
}

#[tokio::test]
async fn blocked_sender_is_silently_dropped() {
    let h = Harness::new();
    h.store.block(BOB, ALICE);
    let mut alice = h.connect(ALICE).await;
    let mut bob = h.connect(BOB).await;

    alice.send(PRIVATE, "hi").await;

    bob.expect_nothing().await;
    alice.expect_nothing().await;
    assert_eq!(h.store.message_count(), 0);
    assert_eq!(h.broker.stats().published, 0);
}

#[tokio::test]
async fn block_does_not_affect_unshared_chats() {
    let h = Harness::new();
    h.store.block(BOB, ALICE);
    let alice = h.connect(ALICE).await;
    let mut carol = h.connect(CAROL).await;

    alice.send(ALICE_CAROL, "hey carol").await;

    let received = carol.expect_message().await;
    assert_eq!(received.content, "hey carol");
    wait_until(|| h.store.messages_for(ALICE_CAROL).len() == 1).await;
}

#[tokio::test]
async fn sender_never_receives_own_message() {
    let h = Harness::new();
    let mut alice = h.connect(ALICE).await;
    let mut bob = h.connect(BOB).await;
    let mut carol = h.connect(CAROL).await;

    alice.send(GROUP, "hello all").await;

    assert_eq!(bob.expect_message().await.content, "hello all");
    assert_eq!(carol.expect_message().await.content, "hello all");
    alice.expect_nothing().await;
}

#[tokio::test]
async fn reconnect_leaves_one_live_session() {
    let h = Harness::new();
    let mut first = h.connect(ALICE).await;
    let mut second = h.connect(ALICE).await;
    let bob = h.connect(BOB).await;

    assert_ne!(first.session, second.session);
    finish(first.task).await;
    assert!(first.peer.recv_timeout(WAIT).await.is_none());

    assert_eq!(h.hub.session_count(), 2);
    assert!(h.online(ALICE));

    bob.send(PRIVATE, "which one?").await;
    assert_eq!(second.expect_message().await.content, "which one?");
    wait_until(|| h.broker.subscriber_count("42") == 2).await;
}

#[tokio::test]
async fn clean_close_marks_offline() {
    let h = Harness::new();
    let alice = h.connect(ALICE).await;
    assert!(h.online(ALICE));

    alice.hang_up().await;

    assert!(!h.online(ALICE));
    assert_eq!(h.hub.session_count(), 0);
    wait_until(|| h.broker.stats().channel_count == 0).await;
}

#[tokio::test]
async fn read_error_still_marks_offline() {
    let h = Harness::new();
    let alice = h.connect(ALICE).await;

    alice.peer.fail("connection reset").await.unwrap();
    finish(alice.task).await;

    assert!(!h.online(ALICE));
    assert!(h.hub.registry().lookup(ALICE).is_none());
    let stored = h.store.identity(ALICE).unwrap();
    assert!(stored.last_active > 0);
}

#[tokio::test]
async fn malformed_frame_keeps_connection_open() {
    let h = Harness::new();
    let mut alice = h.connect(ALICE).await;
    let mut bob = h.connect(BOB).await;

    alice.peer.send_raw("{not json").await.unwrap();
    assert_eq!(alice.expect_error().await, "error reading message");

    alice.send(PRIVATE, "still here").await;
    assert_eq!(bob.expect_message().await.content, "still here");
}

#[tokio::test]
async fn unknown_chat_reports_error() {
    let h = Harness::new();
    let mut alice = h.connect(ALICE).await;

    alice.send(404, "anyone?").await;
    assert_eq!(alice.expect_error().await, "error resolving chat");
    assert_eq!(h.broker.stats().published, 0);
}

#[tokio::test]
async fn error_detail_only_in_dev_mode() {
    let h = Harness::with_config(HubConfig {
        expose_error_detail: true,
        ..Default::default()
    });
    let mut alice = h.connect(ALICE).await;

    alice.send(404, "anyone?").await;
    match alice.peer.recv_timeout(WAIT).await {
        Some(ServerFrame::Error(error)) => {
            assert_eq!(error.error.as_deref(), Some("Chat not found: 404"));
        }
        other => panic!("expected an error frame, got {other:?}"),
    }
}

#[tokio::test]
async fn persist_failure_still_delivers() {
    let h = Harness::new();
    h.store.fail_message_writes(true);
    let alice = h.connect(ALICE).await;
    let mut bob = h.connect(BOB).await;

    alice.send(PRIVATE, "ephemeral").await;

    assert_eq!(bob.expect_message().await.content, "ephemeral");
    assert_eq!(h.store.message_count(), 0);
}

#[tokio::test]
async fn connected_recipient_still_gets_push() {
    let h = Harness::new();
    let alice = h.connect(ALICE).await;
    let mut bob = h.connect(BOB).await;

    alice.send(PRIVATE, "ping").await;
    bob.expect_message().await;

    wait_until(|| !h.push.sent().is_empty()).await;
    let sent = h.push.sent();
    assert_eq!(sent[0].token, "bob-phone");
    assert_eq!(sent[0].title, "Message from alice");
    assert_eq!(sent[0].body, "ping");
}

#[tokio::test]
async fn membership_is_fixed_at_connect() {
    let h = Harness::new();
    let alice = h.connect(ALICE).await;
    let mut carol = h.connect(CAROL).await;

    h.store.create_chat(99, ChatKind::Group, &[ALICE, CAROL]);
    alice.send(99, "new chat").await;

    carol.expect_nothing().await;
    wait_until(|| h.store.messages_for(99).len() == 1).await;
}

#[tokio::test]
async fn shutdown_disconnects_everyone() {
    let h = Harness::new();
    let alice = h.connect(ALICE).await;
    let bob = h.connect(BOB).await;

    assert_eq!(h.hub.shutdown(), 2);
    finish(alice.task).await;
    finish(bob.task).await;

    assert!(!h.online(ALICE));
    assert!(!h.online(BOB));
    assert_eq!(h.hub.session_count(), 0);
}

#[tokio::test]
async fn unknown_user_is_refused() {
    let h = Harness::new();
    let (conn, mut peer) = pair(4);

    let result = h.hub.serve(AuthenticatedUser::new(404), conn).await;
    assert!(matches!(result, Err(RelayError::Store(_))));
    assert!(peer.recv_timeout(QUIET).await.is_none());
}

#[tokio::test]
async fn failed_reconnect_keeps_previous_session() {
    let failing = Arc::new(AtomicBool::new(false));
    let switch = Arc::clone(&failing);
    let h = Harness::build(HubConfig::default(), move |inner| {
        Arc::new(FlakyListing {
            inner,
            failing: switch,
        })
    });
    let mut alice = h.connect(ALICE).await;
    let bob = h.connect(BOB).await;

    failing.store(true, Ordering::SeqCst);
    let (conn, mut refused) = pair(32);
    let result = h.hub.serve(AuthenticatedUser::new(ALICE), conn).await;
    assert!(matches!(result, Err(RelayError::Broker(_))));
    assert!(refused.recv_timeout(WAIT).await.is_none());

    // The first session is still the live one and still receives.
    assert_eq!(h.hub.registry().lookup(ALICE).unwrap().id(), alice.session);
    assert!(h.online(ALICE));
    bob.send(PRIVATE, "still there?").await;
    assert_eq!(alice.expect_message().await.content, "still there?");

    alice.hang_up().await;
    assert!(!h.online(ALICE));
    assert!(h.hub.registry().lookup(ALICE).is_none());
}
