//! Core transport types.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::events::TransportEventReceiver;
use crate::traits::HubTransport;

/// Enumerates the hub transports, in the order they are preferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportType {
    /// WebSocket for full-duplex streaming.
    WebSockets,
    /// Server-Sent Events for server push, with HTTP POST for invocations.
    ServerSentEvents,
    /// HTTP long polling.
    LongPolling,
}

impl TransportType {
    /// All transports in fallback order: full-duplex streaming, then server
    /// push, then polling.
    pub const FALLBACK_ORDER: [Self; 3] = [Self::WebSockets, Self::ServerSentEvents, Self::LongPolling];

    /// Returns `true` if the transport can carry client invocations and server
    /// events over the same connection.
    pub const fn is_full_duplex(self) -> bool {
        matches!(self, Self::WebSockets)
    }
}

impl fmt::Display for TransportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WebSockets => write!(f, "websockets"),
            Self::ServerSentEvents => write!(f, "serversentevents"),
            Self::LongPolling => write!(f, "longpolling"),
        }
    }
}

/// Represents the current state of a transport connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportState {
    /// The transport is not connected.
    Disconnected,
    /// The transport is performing its handshake.
    Connecting,
    /// The transport is connected and ready to invoke and receive.
    Connected,
    /// The transport is closing.
    Disconnecting,
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Disconnecting => write!(f, "disconnecting"),
        }
    }
}

/// Parameters for creating one hub connection.
///
/// The credential travels inside `url` as the `access_token` query
/// parameter; it is attached once per connection, never per message.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    /// Full hub URL, including the `access_token` query parameter.
    pub url: String,
}

impl ConnectRequest {
    /// Creates a request for the given hub URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    /// Returns the URL with any `access_token` value replaced, for logging.
    pub fn redacted_url(&self) -> String {
        match self.url.split_once("access_token=") {
            Some((head, tail)) => {
                let rest = tail.find('&').map_or("", |idx| &tail[idx..]);
                format!("{head}access_token=***{rest}")
            }
            None => self.url.clone(),
        }
    }
}

impl fmt::Debug for ConnectRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectRequest")
            .field("url", &self.redacted_url())
            .finish()
    }
}

/// A freshly created transport together with its event stream.
///
/// The receiver is handed out at creation time so that close and message
/// handling is registered before the transport is started.
#[derive(Debug)]
pub struct TransportHandle {
    /// The transport, shared between the manager and its background tasks.
    pub transport: Arc<dyn HubTransport>,
    /// Inbound events produced by the transport.
    pub events: TransportEventReceiver,
}
