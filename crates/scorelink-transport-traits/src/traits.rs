//! Core transport traits.

use std::future::Future;
use std::pin::Pin;

use crate::error::TransportResult;
use crate::message::HubInvocation;
use crate::metrics::TransportMetrics;
use crate::types::{ConnectRequest, TransportHandle, TransportState, TransportType};

/// The core trait for hub transport implementations.
///
/// A hub transport is a persistent, bidirectional channel: the client invokes
/// named hub methods, and the hub pushes named events back. Inbound events and
/// close notifications are delivered through the [`TransportHandle`] receiver
/// produced by the [`TransportFactory`], never through this trait.
pub trait HubTransport: Send + Sync + std::fmt::Debug {
    /// Returns the type of this transport.
    fn transport_type(&self) -> TransportType;

    /// Returns the current state of the transport.
    fn state(&self) -> TransportState;

    /// Opens the connection and performs the hub handshake.
    ///
    /// Callers bound this with their own timeout.
    fn start(&self) -> Pin<Box<dyn Future<Output = TransportResult<()>> + Send + '_>>;

    /// Invokes a hub method and waits for its completion.
    fn invoke(
        &self,
        invocation: HubInvocation,
    ) -> Pin<Box<dyn Future<Output = TransportResult<()>> + Send + '_>>;

    /// Sends a liveness ping.
    fn ping(&self) -> Pin<Box<dyn Future<Output = TransportResult<()>> + Send + '_>>;

    /// Closes the connection. A requested stop emits `Closed { error: None }`.
    fn stop(&self) -> Pin<Box<dyn Future<Output = TransportResult<()>> + Send + '_>>;

    /// Returns a snapshot of the transport's counters.
    fn metrics(&self) -> TransportMetrics;

    /// Returns `true` if the transport is currently in the `Connected` state.
    fn is_connected(&self) -> bool {
        matches!(self.state(), TransportState::Connected)
    }

    /// Returns the endpoint address for this transport, with credentials redacted.
    fn endpoint(&self) -> Option<String> {
        None
    }
}

/// A factory for creating hub transports of one or more types.
///
/// The connection manager walks [`TransportType::FALLBACK_ORDER`] (or its
/// configured list) and asks the factory for the first type it supports.
pub trait TransportFactory: Send + Sync + std::fmt::Debug {
    /// Returns `true` if this factory can create the given transport type.
    fn supports(&self, transport_type: TransportType) -> bool;

    /// Creates a new, not yet started transport for `request`.
    fn create(
        &self,
        transport_type: TransportType,
        request: ConnectRequest,
    ) -> TransportResult<TransportHandle>;
}
