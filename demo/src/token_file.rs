use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use scorelink_client::{ClientError, ClientResult, Credential, TokenProvider};

/// Reads the access token from a file on every call, so an external
/// process can rotate it without restarting the watcher.
///
/// A missing or empty file means "no token yet".
#[derive(Debug, Clone)]
pub struct FileTokenProvider {
    path: PathBuf,
}

impl FileTokenProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl TokenProvider for FileTokenProvider {
    async fn token(&self) -> ClientResult<Option<Credential>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => {
                let token = contents.trim();
                Ok((!token.is_empty()).then(|| Credential::new(token)))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ClientError::TokenProvider(format!(
                "{}: {e}",
                self.path.display()
            ))),
        }
    }
}
