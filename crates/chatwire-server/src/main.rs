//! # chatwire
//!
//! Realtime chat delivery server.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings (local broker, logged push)
//! chatwire
//!
//! # Run with a config file in one of the default locations
//! cp chatwire.example.toml chatwire.toml && chatwire
//!
//! # Override settings from the environment
//! CHATWIRE__PORT=9000 CHATWIRE__BROKER__BACKEND=redis chatwire
//! ```
//!
//! Clients connect to the WebSocket endpoint through an authenticating
//! proxy that sets the verified user id header (`x-user-id` by default).

mod config;
mod handlers;
mod identity;
mod metrics;
mod push;
mod seed;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chatwire=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;

    tracing::info!(
        broker = ?config.broker.backend,
        push = ?config.push.backend,
        "Starting chatwire on {}:{}",
        config.host,
        config.port
    );

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
