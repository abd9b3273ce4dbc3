//! Error types for the connection manager.
//!
//! Most failures are recoverable and only surface through
//! [`ConnectionManager::last_error`](crate::ConnectionManager::last_error).
//! [`ClientError`] values that cannot be recovered by retrying are also
//! delivered to the registered error callbacks.

use std::time::Duration;

use thiserror::Error;

use scorelink_transport_traits::{TransportError, TransportType};

/// A specialized `Result` type for connection manager operations.
pub type ClientResult<T> = std::result::Result<T, ClientError>;

/// Errors produced by the connection manager.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum ClientError {
    /// The underlying transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The hub kept rejecting freshly read credentials.
    #[error("Authentication failed after {attempts} attempts: {message}")]
    Authentication {
        /// Consecutive rejected attempts
        attempts: u32,
        /// Last rejection reported by the hub
        message: String,
    },

    /// The token provider itself failed (as opposed to having no token yet).
    #[error("Token provider failed: {0}")]
    TokenProvider(String),

    /// The manager configuration is invalid.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The transport factory supports none of the configured transports.
    #[error("No supported transport among {0:?}")]
    NoTransport(Vec<TransportType>),

    /// Reconnection stopped after the configured number of attempts.
    #[error("Reconnect gave up after {attempts} attempts")]
    ReconnectExhausted {
        /// Attempts made before giving up
        attempts: u32,
    },

    /// The connection attempt was superseded by an explicit disconnect.
    #[error("Connection attempt cancelled by disconnect")]
    Cancelled,

    /// An update callback panicked. The event was still delivered to the
    /// other callbacks and the channel, and the connection is unaffected.
    #[error("Update callback panicked: {0}")]
    CallbackPanicked(String),
}

impl ClientError {
    /// Returns `true` if a later connect or reconnect attempt may succeed.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_retryable(),
            Self::TokenProvider(_) | Self::Cancelled | Self::CallbackPanicked(_) => true,
            Self::Authentication { .. }
            | Self::Configuration(_)
            | Self::NoTransport(_)
            | Self::ReconnectExhausted { .. } => false,
        }
    }

    /// Returns `true` if the hub rejected the connection credential.
    pub fn is_authentication(&self) -> bool {
        match self {
            Self::Authentication { .. } => true,
            Self::Transport(e) => e.is_authentication(),
            _ => false,
        }
    }
}

/// Outcome of a best-effort teardown call. Logged and discarded, never returned
/// to the caller of `disconnect`.
#[derive(Error, Debug)]
pub enum TeardownError {
    /// The call did not finish within the teardown timeout.
    #[error("{operation} abandoned after {timeout:?}")]
    TimedOut {
        /// What was being torn down
        operation: String,
        /// The timeout that expired
        timeout: Duration,
    },

    /// The call failed.
    #[error("{operation} failed: {source}")]
    Failed {
        /// What was being torn down
        operation: String,
        /// The transport error
        #[source]
        source: TransportError,
    },
}

impl TeardownError {
    /// Runs `future` with `timeout`, mapping both failure modes into a `TeardownError`.
    pub(crate) async fn bounded<F>(
        operation: impl Into<String>,
        timeout: Duration,
        future: F,
    ) -> Result<(), Self>
    where
        F: Future<Output = Result<(), TransportError>>,
    {
        let operation = operation.into();
        match tokio::time::timeout(timeout, future).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(Self::Failed { operation, source }),
            Err(_) => Err(Self::TimedOut { operation, timeout }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let lost: ClientError = TransportError::ConnectionLost("reset".into()).into();
        assert!(lost.is_recoverable());
        assert!(!lost.is_authentication());

        let rejected: ClientError = TransportError::AuthenticationFailed("401".into()).into();
        assert!(rejected.is_authentication());

        let escalated = ClientError::Authentication {
            attempts: 4,
            message: "401".into(),
        };
        assert!(escalated.is_authentication());
        assert!(!escalated.is_recoverable());

        assert!(!ClientError::Configuration("empty base url".into()).is_recoverable());
        assert!(!ClientError::NoTransport(vec![TransportType::LongPolling]).is_recoverable());
        assert!(ClientError::TokenProvider("keychain locked".into()).is_recoverable());
    }

    #[test]
    fn test_transport_error_is_transparent() {
        let err: ClientError = TransportError::NotConnected.into();
        assert_eq!(err.to_string(), TransportError::NotConnected.to_string());
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_teardown() {
        let ok = TeardownError::bounded("stop", Duration::from_millis(500), async { Ok(()) }).await;
        assert!(ok.is_ok());

        let failed = TeardownError::bounded("stop", Duration::from_millis(500), async {
            Err(TransportError::SendFailed("broken pipe".into()))
        })
        .await;
        assert!(matches!(failed, Err(TeardownError::Failed { .. })));

        let hung = TeardownError::bounded(
            "UnsubscribeFromSession",
            Duration::from_millis(500),
            futures::future::pending(),
        )
        .await;
        match hung {
            Err(TeardownError::TimedOut { operation, timeout }) => {
                assert_eq!(operation, "UnsubscribeFromSession");
                assert_eq!(timeout, Duration::from_millis(500));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }
}
