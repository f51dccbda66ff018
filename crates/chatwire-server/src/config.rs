//! Server configuration.
//!
//! Configuration is loaded from the first existing of:
//! - `chatwire.toml`
//! - `/etc/chatwire/chatwire.toml`
//! - `~/.config/chatwire/chatwire.toml`
//!
//! and then overridden by `CHATWIRE__*` environment variables, using `__`
//! between nested keys (e.g. `CHATWIRE__BROKER__BACKEND=redis`).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

const CONFIG_PATHS: [&str; 3] = [
    "chatwire.toml",
    "/etc/chatwire/chatwire.toml",
    "~/.config/chatwire/chatwire.toml",
];

const ENV_PREFIX: &str = "CHATWIRE";

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Session configuration.
    #[serde(default)]
    pub session: SessionConfig,

    /// Broker configuration.
    #[serde(default)]
    pub broker: BrokerConfig,

    /// Push gateway configuration.
    #[serde(default)]
    pub push: PushConfig,

    /// In-memory store configuration.
    #[serde(default)]
    pub store: StoreConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Include underlying error text in Error Frames.
    #[serde(default)]
    pub dev_errors: bool,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path for the WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,

    /// Header carrying the verified user id, set by the authenticating proxy.
    #[serde(default = "default_identity_header")]
    pub identity_header: String,

    /// Maximum frame size in bytes. Larger frames get an Error Frame.
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,

    /// Hard message limit of the WebSocket layer in bytes. Larger messages
    /// close the connection.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

impl TransportConfig {
    /// Limit handed to the WebSocket upgrade.
    ///
    /// Always at least twice `max_frame_size`, so oversized frames still
    /// reach the codec and are answered instead of dropping the socket.
    #[must_use]
    pub fn socket_message_limit(&self) -> usize {
        self.max_message_size.max(self.max_frame_size.saturating_mul(2))
    }
}

/// Session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Delivery queue capacity per session.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

/// Broker backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerBackend {
    Local,
    Redis,
}

/// Broker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Which broker to use.
    #[serde(default = "default_broker_backend")]
    pub backend: BrokerBackend,

    /// Redis connection URL.
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Redis set listing the broadcast channels.
    #[serde(default = "default_broadcast_key")]
    pub broadcast_key: String,

    /// Broadcast channels served by the local broker.
    #[serde(default)]
    pub broadcast_channels: Vec<String>,

    /// Per-channel buffer of the local broker.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

/// Push backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PushBackend {
    Log,
    Fcm,
}

/// Push gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushConfig {
    /// Which gateway to use.
    #[serde(default = "default_push_backend")]
    pub backend: PushBackend,

    /// Base URL of the FCM API.
    #[serde(default = "default_fcm_endpoint")]
    pub endpoint: String,

    /// Firebase project id.
    #[serde(default)]
    pub project_id: String,

    /// Environment variable holding the OAuth access token.
    #[serde(default = "default_token_env")]
    pub access_token_env: String,

    /// Request timeout in milliseconds.
    #[serde(default = "default_push_timeout")]
    pub timeout_ms: u64,
}

/// In-memory store configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// TOML file with users and chats loaded at startup.
    #[serde(default)]
    pub seed_file: Option<String>,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_identity_header() -> String {
    "x-user-id".to_string()
}

fn default_max_frame_size() -> usize {
    chatwire_protocol::MAX_FRAME_SIZE
}

fn default_max_message_size() -> usize {
    1024 * 1024
}

fn default_queue_capacity() -> usize {
    chatwire_core::session::DEFAULT_QUEUE_CAPACITY
}

fn default_broker_backend() -> BrokerBackend {
    BrokerBackend::Local
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_broadcast_key() -> String {
    "channels".to_string()
}

fn default_channel_capacity() -> usize {
    1024
}

fn default_push_backend() -> PushBackend {
    PushBackend::Log
}

fn default_fcm_endpoint() -> String {
    "https://fcm.googleapis.com".to_string()
}

fn default_token_env() -> String {
    "FCM_ACCESS_TOKEN".to_string()
}

fn default_push_timeout() -> u64 {
    10_000
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
            session: SessionConfig::default(),
            broker: BrokerConfig::default(),
            push: PushConfig::default(),
            store: StoreConfig::default(),
            metrics: MetricsConfig::default(),
            dev_errors: false,
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
            identity_header: default_identity_header(),
            max_frame_size: default_max_frame_size(),
            max_message_size: default_max_message_size(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            backend: default_broker_backend(),
            redis_url: default_redis_url(),
            broadcast_key: default_broadcast_key(),
            broadcast_channels: Vec::new(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            backend: default_push_backend(),
            endpoint: default_fcm_endpoint(),
            project_id: String::new(),
            access_token_env: default_token_env(),
            timeout_ms: default_push_timeout(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl PushConfig {
    /// Request timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Config {
    /// Load configuration from the default paths and the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, or an
    /// environment override has the wrong type.
    pub fn load() -> Result<Self> {
        let file = CONFIG_PATHS
            .iter()
            .map(|path| shellexpand::tilde(path).into_owned())
            .find(|path| Path::new(path).exists());

        let mut builder = config::Config::builder();
        if let Some(path) = &file {
            builder = builder
                .add_source(config::File::from(Path::new(path)).format(config::FileFormat::Toml));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("broker.broadcast_channels"),
        );

        let config = builder
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .with_context(|| match &file {
                Some(path) => format!("Invalid configuration in {path}"),
                None => "Invalid configuration in environment".to_string(),
            })?;
        Ok(config)
    }

    /// Load configuration from a specific file, without environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }
}
