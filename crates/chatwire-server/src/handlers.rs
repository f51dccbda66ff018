//! HTTP and WebSocket handlers for the chatwire server.
//!
//! The WebSocket route binds the trusted identity to the upgraded socket and
//! hands both to the relay hub, which owns the connection from then on.

use crate::config::{BrokerBackend, Config};
use crate::identity::TrustedUser;
use crate::metrics::{self, ConnectionMetricsGuard};
use crate::{push, seed};
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chatwire_core::broker::{Broker, LocalBroker, LocalBrokerConfig};
use chatwire_core::{AuthenticatedUser, Collaborators, HubConfig, MemoryStore, RelayHub};
use chatwire_transport::WebSocketConnection;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// The relay hub.
    pub hub: Arc<RelayHub>,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create app state around an existing hub.
    #[must_use]
    pub fn new(config: Config, hub: Arc<RelayHub>) -> Self {
        Self { hub, config }
    }

    /// Build the broker, stores, push gateway and hub described by `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the broker cannot be reached, the seed file is
    /// invalid, or the push gateway is misconfigured.
    pub async fn from_config(config: Config) -> Result<Self> {
        let broker = connect_broker(&config).await?;

        let store = Arc::new(MemoryStore::new());
        if let Some(path) = &config.store.seed_file {
            seed::Seed::from_file(path)?.apply(&store);
        }

        let collaborators = Collaborators {
            identities: store.clone(),
            chats: store.clone(),
            messages: store,
            push: push::build(&config.push)?,
        };
        let hub_config = HubConfig {
            queue_capacity: config.session.queue_capacity,
            expose_error_detail: config.dev_errors,
        };

        Ok(Self::new(
            config,
            Arc::new(RelayHub::new(broker, collaborators, hub_config)),
        ))
    }
}

async fn connect_broker(config: &Config) -> Result<Arc<dyn Broker>> {
    match config.broker.backend {
        BrokerBackend::Local => Ok(Arc::new(LocalBroker::with_config(LocalBrokerConfig {
            channel_capacity: config.broker.channel_capacity,
            broadcast_channels: config.broker.broadcast_channels.clone(),
            ..Default::default()
        }))),
        #[cfg(feature = "redis")]
        BrokerBackend::Redis => {
            let broker = chatwire_core::RedisBroker::connect(chatwire_core::RedisBrokerConfig {
                url: config.broker.redis_url.clone(),
                broadcast_key: config.broker.broadcast_key.clone(),
                ..Default::default()
            })
            .await
            .context("Failed to connect to Redis")?;
            Ok(Arc::new(broker))
        }
        #[cfg(not(feature = "redis"))]
        BrokerBackend::Redis => {
            anyhow::bail!("this build does not include the redis broker")
        }
    }
}

/// Build the HTTP router.
pub fn router(state: Arc<AppState>) -> Router {
    let ws_path = state.config.transport.websocket_path.clone();
    Router::new()
        .route(&ws_path, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server until interrupted.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::from_config(config.clone()).await?);

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {:#}", e);
        }
    }

    let app = router(Arc::clone(&state));

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!("chatwire listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(Arc::clone(&state.hub)))
    .await?;

    info!("chatwire stopped");
    Ok(())
}

/// Wait for Ctrl-C, then close every session so connections drain.
async fn shutdown_signal(hub: Arc<RelayHub>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
    hub.shutdown();
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": state.hub.session_count(),
    }))
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    TrustedUser(user): TrustedUser,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    debug!(user = user.id, remote = %remote, "WebSocket upgrade");
    ws.max_message_size(state.config.transport.socket_message_limit())
        .on_upgrade(move |socket| handle_websocket(socket, user, remote, state))
}

/// Run one upgraded socket through the hub.
async fn handle_websocket(
    socket: WebSocket,
    user: AuthenticatedUser,
    remote: SocketAddr,
    state: Arc<AppState>,
) {
    let _metrics_guard = ConnectionMetricsGuard::new();
    let conn = WebSocketConnection::new(socket, Some(remote), state.config.transport.max_frame_size);

    if let Err(e) = state.hub.serve(user, conn).await {
        warn!(user = user.id, remote = %remote, error = %e, "Connection refused");
        chatwire_core::metrics::record_error("connect");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatwire_core::model::{ChatKind, Identity};
    use chatwire_core::RecordingPushGateway;
    use chatwire_protocol::{OutboundFrame, ServerFrame};
    use futures_util::{SinkExt, StreamExt};
    use std::time::Duration;
    use tokio_tungstenite::tungstenite::client::IntoClientRequest;
    use tokio_tungstenite::tungstenite::Message;
    use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

    type Client = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

    async fn spawn_server() -> (SocketAddr, Arc<AppState>) {
        let store = Arc::new(MemoryStore::new());
        store.insert_identity(Identity::new(1, "alice"));
        store.insert_identity(Identity::new(2, "bob"));
        store.create_chat(42, ChatKind::Private, &[1, 2]);

        let hub = RelayHub::new(
            Arc::new(LocalBroker::new()),
            Collaborators {
                identities: store.clone(),
                chats: store.clone(),
                messages: store,
                push: Arc::new(RecordingPushGateway::new()),
            },
            HubConfig::default(),
        );
        let state = Arc::new(AppState::new(Config::default(), Arc::new(hub)));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(Arc::clone(&state));
        tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });
        (addr, state)
    }

    async fn connect(addr: SocketAddr, user: &str) -> Client {
        let mut request = format!("ws://{addr}/ws").into_client_request().unwrap();
        request
            .headers_mut()
            .insert("x-user-id", user.parse().unwrap());
        let (client, _) = connect_async(request).await.unwrap();
        client
    }

    async fn wait_for_sessions(state: &AppState, count: usize) {
        for _ in 0..200 {
            if state.hub.session_count() == count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {count} sessions");
    }

    async fn next_frame(client: &mut Client) -> ServerFrame {
        let message = tokio::time::timeout(Duration::from_secs(2), client.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        match message {
            Message::Text(text) => serde_json::from_str(&text).unwrap(),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_websocket_round_trip() {
        let (addr, state) = spawn_server().await;
        let mut alice = connect(addr, "1").await;
        let mut bob = connect(addr, "2").await;
        wait_for_sessions(&state, 2).await;

        let frame = serde_json::to_string(&OutboundFrame::new(42, "hi")).unwrap();
        alice.send(Message::Text(frame)).await.unwrap();

        match next_frame(&mut bob).await {
            ServerFrame::Message(message) => {
                assert_eq!(message.content, "hi");
                assert_eq!(message.sender_id, 1);
                assert_eq!(message.chat_id, 42);
            }
            other => panic!("unexpected frame: {other:?}"),
        }

        alice.send(Message::Text("{broken".into())).await.unwrap();
        match next_frame(&mut alice).await {
            ServerFrame::Error(error) => assert_eq!(error.content, "error reading message"),
            other => panic!("unexpected frame: {other:?}"),
        }

        alice.close(None).await.unwrap();
        wait_for_sessions(&state, 1).await;
    }

    #[tokio::test]
    async fn test_oversized_frame_answered_with_error() {
        let (addr, state) = spawn_server().await;
        let mut alice = connect(addr, "1").await;
        let mut bob = connect(addr, "2").await;
        wait_for_sessions(&state, 2).await;

        let content = "x".repeat(state.config.transport.max_frame_size + 1024);
        let frame = serde_json::to_string(&OutboundFrame::new(42, content)).unwrap();
        alice.send(Message::Text(frame)).await.unwrap();

        match next_frame(&mut alice).await {
            ServerFrame::Error(error) => assert_eq!(error.content, "error reading message"),
            other => panic!("unexpected frame: {other:?}"),
        }
        assert_eq!(state.hub.session_count(), 2);

        let frame = serde_json::to_string(&OutboundFrame::new(42, "after")).unwrap();
        alice.send(Message::Text(frame)).await.unwrap();
        match next_frame(&mut bob).await {
            ServerFrame::Message(message) => assert_eq!(message.content, "after"),
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_upgrade_without_identity_rejected() {
        let (addr, state) = spawn_server().await;
        let result = connect_async(format!("ws://{addr}/ws")).await;
        assert!(result.is_err());
        assert_eq!(state.hub.session_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_user_closed() {
        let (addr, state) = spawn_server().await;
        let mut stranger = connect(addr, "404").await;

        let next = tokio::time::timeout(Duration::from_secs(2), stranger.next())
            .await
            .unwrap();
        assert!(matches!(next, None | Some(Ok(Message::Close(_))) | Some(Err(_))));
        assert_eq!(state.hub.session_count(), 0);
    }

    #[tokio::test]
    async fn test_health() {
        let (addr, state) = spawn_server().await;
        let _alice = connect(addr, "1").await;
        wait_for_sessions(&state, 1).await;

        let body: serde_json::Value = reqwest::get(format!("http://{addr}/health"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["sessions"], 1);
    }
}
