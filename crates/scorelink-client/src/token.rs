//! Access token providers.
//!
//! The manager asks its [`TokenProvider`] for a credential on every connect
//! and on every reconnect attempt, so rotated or refreshed tokens are picked
//! up without restarting the manager. A provider returning `Ok(None)` means
//! "no token yet" (the user has not signed in); that is not an error.
//!
//! ```rust,no_run
//! use scorelink_client::{ClientResult, Credential, TokenProvider};
//!
//! struct Keychain;
//!
//! #[async_trait::async_trait]
//! impl TokenProvider for Keychain {
//!     async fn token(&self) -> ClientResult<Option<Credential>> {
//!         // read or refresh the token here
//!         Ok(Some(Credential::new("fresh-token")))
//!     }
//! }
//! ```

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::ClientResult;

/// An opaque bearer token. Its value never appears in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Wrap a token value
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token, for attaching to the connection URL
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

impl From<String> for Credential {
    fn from(token: String) -> Self {
        Self(token)
    }
}

impl From<&str> for Credential {
    fn from(token: &str) -> Self {
        Self(token.to_string())
    }
}

/// Supplies the current access token.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Returns the current token, or `None` if none is available yet.
    async fn token(&self) -> ClientResult<Option<Credential>>;
}

#[async_trait]
impl<T: TokenProvider + ?Sized> TokenProvider for Arc<T> {
    async fn token(&self) -> ClientResult<Option<Credential>> {
        (**self).token().await
    }
}

/// A provider that always returns the same token.
#[derive(Debug, Clone)]
pub struct StaticTokenProvider {
    credential: Option<Credential>,
}

impl StaticTokenProvider {
    /// Always return `token`
    pub fn new(token: impl Into<Credential>) -> Self {
        Self {
            credential: Some(token.into()),
        }
    }

    /// Never return a token
    pub fn empty() -> Self {
        Self { credential: None }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn token(&self) -> ClientResult<Option<Credential>> {
        Ok(self.credential.clone())
    }
}

/// A token slot the application updates as the user signs in, refreshes or signs out.
///
/// Clones share the same slot.
#[derive(Debug, Clone, Default)]
pub struct SharedTokenProvider {
    slot: Arc<RwLock<Option<Credential>>>,
}

impl SharedTokenProvider {
    /// Create an empty slot
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a new token; the next connect or reconnect attempt uses it
    pub fn set(&self, token: impl Into<Credential>) {
        *self.slot.write() = Some(token.into());
    }

    /// Remove the token
    pub fn clear(&self) {
        *self.slot.write() = None;
    }

    /// `true` if a token is currently stored
    pub fn is_set(&self) -> bool {
        self.slot.read().is_some()
    }
}

#[async_trait]
impl TokenProvider for SharedTokenProvider {
    async fn token(&self) -> ClientResult<Option<Credential>> {
        Ok(self.slot.read().clone())
    }
}
