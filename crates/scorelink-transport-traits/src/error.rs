//! Transport error types.

use std::time::Duration;
use thiserror::Error;

/// A specialized `Result` type for transport operations.
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Represents errors that can occur during transport operations.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum TransportError {
    /// Failed to establish a connection.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// An established connection was lost.
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// The operation requires a connected transport.
    #[error("Transport is not connected")]
    NotConnected,

    /// Failed to send a message.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to serialize or deserialize a message.
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    /// A hub protocol error occurred (bad handshake, malformed record).
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// The hub completed an invocation with an error.
    #[error("Invocation '{target}' failed: {message}")]
    InvocationFailed {
        /// The hub method that was invoked
        target: String,
        /// The error message reported by the hub
        message: String,
    },

    /// Connection establishment timed out.
    #[error(
        "Connection timed out after {timeout:?} for operation: {operation}. \
         If the hub is slow to accept connections, raise \
         `connect_timeout_ms` in `ManagerConfig` (e.g. to {}).",
        timeout.as_millis() * 2
    )]
    ConnectionTimeout {
        /// The operation that timed out
        operation: String,
        /// The timeout duration that was exceeded
        timeout: Duration,
    },

    /// A single hub invocation timed out.
    #[error(
        "Invocation timed out after {timeout:?} for operation: {operation}. \
         If the hub is slow to answer, raise \
         `invoke_timeout_ms` in `ManagerConfig` (e.g. to {}).",
        timeout.as_millis() * 2
    )]
    RequestTimeout {
        /// The operation that timed out
        operation: String,
        /// The timeout duration that was exceeded
        timeout: Duration,
    },

    /// The transport was configured with invalid parameters.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// The hub rejected the credential attached to the connection.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The requested transport is not available.
    #[error("Transport not available: {0}")]
    NotAvailable(String),
}

impl TransportError {
    /// Returns `true` if the hub rejected the connection credential.
    pub const fn is_authentication(&self) -> bool {
        matches!(self, Self::AuthenticationFailed(_))
    }

    /// Returns `true` for conditions a reconnect attempt can reasonably fix.
    ///
    /// Configuration errors and unavailable transports are not retryable;
    /// everything network- or timing-related is.
    pub const fn is_retryable(&self) -> bool {
        !matches!(self, Self::ConfigurationError(_) | Self::NotAvailable(_))
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationFailed(err.to_string())
    }
}
