//! # chatwire-core
//!
//! Realtime delivery core for the chatwire chat backend.
//!
//! The core is entered with an authenticated user and an open connection and
//! owns everything from there:
//!
//! - **Broker** - shared publish/subscribe medium, one channel per chat
//! - **Session** - one identity's live subscription and its lifecycle
//! - **Registry** - at most one live session per identity
//! - **Delivery** - outbound publish/persist and inbound delivery policy
//! - **Notify** - push fallback to registered devices
//! - **Hub** - connect, serve and disconnect sequence tying it together
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Connection │────▶│  RelayHub   │────▶│  Registry   │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        ▲                   │
//!        │                   ▼
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Delivery   │◀────│   Session   │◀────│   Broker    │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        │
//!        ▼
//! ┌─────────────┐
//! │   Notify    │
//! └─────────────┘
//! ```
//!
//! Persistence and push delivery are external; see [`store`].

pub mod broker;
pub mod delivery;
pub mod hub;
pub mod memory;
pub mod metrics;
pub mod model;
pub mod notify;
pub mod registry;
pub mod session;
pub mod signal;
pub mod store;

pub use broker::{
    Broker, BrokerError, BrokerEvent, ChannelId, LocalBroker, LocalBrokerConfig, Subscription,
    SubscriptionHandle,
};
#[cfg(feature = "redis")]
pub use broker::{RedisBroker, RedisBrokerConfig};
pub use delivery::{DeliveryPipeline, Inbound, Outbound};
pub use hub::{Collaborators, HubConfig, RelayError, RelayHub};
pub use memory::{MemoryStore, RecordingPushGateway};
pub use model::{AuthenticatedUser, Chat, ChatKind, Device, DeviceKind, Identity};
pub use notify::{Notifier, NotifyReport};
pub use registry::SessionRegistry;
pub use session::{Session, SessionError, SessionState};
pub use store::{ChatStore, IdentityStore, MessageStore, PushError, PushGateway, StoreError};
