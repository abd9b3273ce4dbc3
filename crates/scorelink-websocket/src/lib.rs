//! # ScoreLink WebSocket Transport
//!
//! WebSocket hub transport for the ScoreLink real-time update client. It speaks
//! the JSON hub protocol: a handshake record, then invocation, completion,
//! ping and close records, each terminated by the `0x1E` record separator.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use scorelink_websocket::{WebSocketHubConfig, WebSocketTransportFactory};
//! use scorelink_transport_traits::{ConnectRequest, TransportFactory, TransportType};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let factory = WebSocketTransportFactory::new(WebSocketHubConfig::default());
//! let handle = factory.create(
//!     TransportType::WebSockets,
//!     ConnectRequest::new("https://grades.example/hubs/scores?access_token=..."),
//! )?;
//! handle.transport.start().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! scorelink-websocket/
//! ├── config.rs     # Configuration types and builders
//! ├── protocol.rs   # Hub record framing and message types
//! ├── transport.rs  # HubTransport implementation and reader task
//! └── factory.rs    # TransportFactory for the WebSockets transport type
//! ```

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

pub mod config;
pub mod factory;
pub mod protocol;
pub mod transport;

// Re-export main types for convenience
pub use config::WebSocketHubConfig;
pub use factory::WebSocketTransportFactory;
pub use protocol::{HubMessage, RecordBuffer, RECORD_SEPARATOR};
pub use transport::WebSocketHubTransport;

// Re-export transport traits for convenience
pub use scorelink_transport_traits::{
    ConnectRequest, HubInvocation, HubTransport, TransportError, TransportEvent,
    TransportFactory, TransportHandle, TransportResult, TransportState, TransportType,
};
