//! Connection state and its watch channel.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::info;

/// Lifecycle state of the managed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No connection and no attempt in flight
    Disconnected,
    /// A caller-initiated connect is negotiating
    Connecting,
    /// Handshake complete; invocations allowed
    Connected,
    /// The connection dropped and the backoff loop is running
    Reconnecting,
    /// An explicit disconnect is tearing the connection down
    Disconnecting,
}

impl ConnectionState {
    /// `true` only for `Connected`
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Reconnecting => write!(f, "reconnecting"),
            Self::Disconnecting => write!(f, "disconnecting"),
        }
    }
}

/// Current state, published to any number of watchers.
#[derive(Debug)]
pub(crate) struct StateCell {
    tx: watch::Sender<ConnectionState>,
}

impl StateCell {
    pub(crate) fn new() -> Self {
        Self {
            tx: watch::Sender::new(ConnectionState::Disconnected),
        }
    }

    pub(crate) fn get(&self) -> ConnectionState {
        *self.tx.borrow()
    }

    /// Moves to `next`, returning the previous state.
    pub(crate) fn set(&self, next: ConnectionState) -> ConnectionState {
        let previous = self.tx.send_replace(next);
        if previous != next {
            info!(from = %previous, to = %next, "Connection state changed");
        }
        previous
    }

    /// Moves to `to` only if the current state is `from`.
    pub(crate) fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        let changed = self.tx.send_if_modified(|state| {
            if *state == from && from != to {
                *state = to;
                true
            } else {
                false
            }
        });
        if changed {
            info!(from = %from, to = %to, "Connection state changed");
        }
        changed
    }

    pub(crate) fn watch(&self) -> watch::Receiver<ConnectionState> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_watchers_see_transitions() {
        let cell = StateCell::new();
        let mut rx = cell.watch();
        assert_eq!(*rx.borrow(), ConnectionState::Disconnected);

        assert_eq!(cell.set(ConnectionState::Connecting), ConnectionState::Disconnected);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), ConnectionState::Connecting);

        cell.set(ConnectionState::Connected);
        assert!(cell.get().is_connected());
        assert_eq!(ConnectionState::Reconnecting.to_string(), "reconnecting");
    }

    #[test]
    fn test_transition_is_conditional() {
        let cell = StateCell::new();
        assert!(!cell.transition(ConnectionState::Connecting, ConnectionState::Connected));
        assert_eq!(cell.get(), ConnectionState::Disconnected);

        assert!(cell.transition(ConnectionState::Disconnected, ConnectionState::Connecting));
        assert_eq!(cell.get(), ConnectionState::Connecting);
    }
}
