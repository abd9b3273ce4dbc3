//! # ScoreLink Transport Traits
//!
//! Core transport traits and types for the ScoreLink real-time update client.
//! This crate provides the foundational abstractions that every hub transport
//! implementation depends on, and that the connection manager consumes.
//!
//! ## Overview
//!
//! This crate defines:
//! - **Traits**: [`HubTransport`], [`TransportFactory`]
//! - **Types**: [`TransportType`], [`TransportState`], [`ConnectRequest`], [`TransportHandle`]
//! - **Messages**: [`HubInvocation`]
//! - **Events**: [`TransportEvent`], [`TransportEventEmitter`]
//! - **Errors**: [`TransportError`], [`TransportResult`]
//! - **Config**: [`TimeoutConfig`]
//! - **Metrics**: [`TransportMetrics`], [`AtomicMetrics`]
//!
//! ## Usage
//!
//! Transport implementations depend on this crate and implement [`HubTransport`]
//! plus a [`TransportFactory`] that the manager uses to negotiate a transport:
//!
//! ```rust,ignore
//! use scorelink_transport_traits::{HubTransport, TransportResult, HubInvocation};
//!
//! #[derive(Debug)]
//! struct MyTransport { /* ... */ }
//!
//! impl HubTransport for MyTransport {
//!     fn transport_type(&self) -> TransportType { /* ... */ }
//!     // ... other trait methods
//! }
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

mod config;
mod error;
mod events;
mod message;
mod metrics;
mod traits;
mod types;

// Re-export all public items
pub use config::TimeoutConfig;
pub use error::{TransportError, TransportResult};
pub use events::{TransportEvent, TransportEventEmitter, TransportEventReceiver};
pub use message::HubInvocation;
pub use metrics::{AtomicMetrics, TransportMetrics};
pub use traits::{HubTransport, TransportFactory};
pub use types::{ConnectRequest, TransportHandle, TransportState, TransportType};
