//! # ScoreLink Client
//!
//! Resilient connection manager for the ScoreLink real-time score hub.
//!
//! The [`ConnectionManager`] keeps one hub connection alive on behalf of an
//! application: it connects with a bearer token from a [`TokenProvider`],
//! negotiates the best available transport, reconnects with backoff after
//! unexpected drops, and keeps the server-side group subscriptions in sync
//! with a locally owned [`SubscriptionSet`]. Score changes pushed by the hub
//! arrive as [`UpdateEvent`]s on a broadcast channel and on registered
//! callbacks.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use scorelink_client::{ConnectionManager, Interest, ManagerConfig, StaticTokenProvider};
//!
//! #[tokio::main]
//! async fn main() -> scorelink_client::ClientResult<()> {
//!     let manager = ConnectionManager::new(
//!         ManagerConfig::new("https://grades.example"),
//!         StaticTokenProvider::new("eyJhbGciOi..."),
//!     )?;
//!
//!     let mut updates = manager.subscribe_updates();
//!     manager.add_interest(Interest::Session(42)).await;
//!     manager.connect().await?;
//!
//!     while let Ok(event) = updates.recv().await {
//!         println!("{}: {}", event.kind, event.entity);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! scorelink-client/
//! ├── manager.rs        # ConnectionManager: lifecycle, reconnect, teardown
//! ├── subscriptions.rs  # Interest, SubscriptionSet, subscribe_to_groups
//! ├── monitor.rs        # Heartbeat and health check tasks
//! ├── dispatcher.rs     # UpdateEvent fan-out to channel and callbacks
//! ├── events.rs         # UpdateEvent, UpdateKind
//! ├── token.rs          # TokenProvider and built-in providers
//! ├── config.rs         # ManagerConfig, ReconnectPolicy
//! ├── backoff.rs        # BackoffSchedule
//! ├── state.rs          # ConnectionState
//! ├── stats.rs          # ConnectionStats
//! └── error.rs          # ClientError, TeardownError
//! ```
//!
//! ## Feature Flags
//!
//! - `websocket` (default): the built-in WebSocket transport, used when no
//!   transport factory is supplied to the builder.

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::must_use_candidate
)]

pub mod backoff;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod manager;
mod monitor;
pub mod state;
pub mod stats;
pub mod subscriptions;
pub mod token;

pub use backoff::BackoffSchedule;
pub use config::{ManagerConfig, ReconnectPolicy};
pub use dispatcher::{ErrorCallback, UpdateCallback};
pub use error::{ClientError, ClientResult, TeardownError};
pub use events::{UpdateEvent, UpdateKind};
pub use manager::{ConnectOutcome, ConnectionManager, ConnectionManagerBuilder};
pub use state::ConnectionState;
pub use stats::ConnectionStats;
pub use subscriptions::{Interest, SubscriptionReport, SubscriptionSet, subscribe_to_groups};
pub use token::{Credential, SharedTokenProvider, StaticTokenProvider, TokenProvider};

// Re-export transport types for convenience
pub use scorelink_transport_traits::{
    ConnectRequest, HubInvocation, HubTransport, TimeoutConfig, TransportError,
    TransportEvent, TransportEventEmitter, TransportFactory, TransportHandle, TransportMetrics,
    TransportResult, TransportState, TransportType,
};

#[cfg(feature = "websocket")]
pub use scorelink_websocket::{WebSocketHubConfig, WebSocketTransportFactory};
