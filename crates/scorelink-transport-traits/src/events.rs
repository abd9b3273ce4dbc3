//! Transport event types.

use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::message::HubInvocation;
use crate::types::TransportType;

/// Receiving half of a transport's event stream.
pub type TransportEventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

/// Represents events that occur within a transport's lifecycle.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The handshake completed and the transport is connected.
    Connected {
        /// The type of the transport that connected.
        transport_type: TransportType,
        /// The endpoint of the connection (token redacted).
        endpoint: String,
    },

    /// The hub invoked a client method (a named server push event).
    Invocation(HubInvocation),

    /// The connection closed. `error` is `None` only for a requested stop.
    Closed {
        /// The reason the connection dropped, if it was not requested.
        error: Option<TransportError>,
    },
}

impl TransportEvent {
    /// Returns `true` if this event reports a connection drop that was not
    /// requested by the client.
    pub const fn is_unexpected_close(&self) -> bool {
        matches!(self, Self::Closed { error: Some(_) })
    }
}

/// An emitter for delivering `TransportEvent`s to the connection owner.
///
/// The channel is unbounded so that a close notification is never lost
/// behind a burst of push events.
#[derive(Debug, Clone)]
pub struct TransportEventEmitter {
    sender: mpsc::UnboundedSender<TransportEvent>,
}

impl TransportEventEmitter {
    /// Creates a new event emitter and a corresponding receiver.
    #[must_use]
    pub fn new() -> (Self, TransportEventReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    /// Emits an event. Returns `false` if the receiver was dropped.
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.sender.send(event).is_ok()
    }

    /// Emits a `Connected` event.
    pub fn emit_connected(&self, transport_type: TransportType, endpoint: String) {
        self.emit(TransportEvent::Connected {
            transport_type,
            endpoint,
        });
    }

    /// Emits an `Invocation` event.
    pub fn emit_invocation(&self, invocation: HubInvocation) {
        self.emit(TransportEvent::Invocation(invocation));
    }

    /// Emits a `Closed` event.
    pub fn emit_closed(&self, error: Option<TransportError>) {
        self.emit(TransportEvent::Closed { error });
    }

    /// Returns `true` if the receiving side has been dropped.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}
