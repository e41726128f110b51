//! Session capability handed to remote clients

use crate::remote::{RemoteError, RemoteResult};
use async_trait::async_trait;
use log::debug;
use std::path::PathBuf;

/// Environment variable checked for an access token when no file is configured
pub const TOKEN_ENV_VAR: &str = "CLOUDDRIVE_ACCESS_TOKEN";

/// An authenticated session handle
#[derive(Clone)]
pub struct Session {
    access_token: String,
}

impl Session {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
        }
    }

    pub fn authorization_header(&self) -> String {
        format!("Bearer {}", self.access_token)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").field("access_token", &"<redacted>").finish()
    }
}

/// Supplies a valid session on demand.
///
/// Fails with `RemoteError::AuthRequired` when an interactive step is needed.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn session(&self) -> RemoteResult<Session>;
}

/// Reads a bearer token from a file, or from `CLOUDDRIVE_ACCESS_TOKEN`.
///
/// The token is re-read on every call so an external helper can rotate it
/// without remounting.
pub struct TokenSessionProvider {
    token_file: Option<PathBuf>,
}

impl TokenSessionProvider {
    pub fn new(token_file: Option<PathBuf>) -> Self {
        Self { token_file }
    }
}

#[async_trait]
impl SessionProvider for TokenSessionProvider {
    async fn session(&self) -> RemoteResult<Session> {
        if let Some(path) = &self.token_file {
            let token = tokio::fs::read_to_string(path).await.map_err(|e| {
                RemoteError::AuthRequired(format!("cannot read token file {}: {}", path.display(), e))
            })?;
            let token = token.trim();
            if token.is_empty() {
                return Err(RemoteError::AuthRequired(format!(
                    "token file {} is empty",
                    path.display()
                )));
            }
            debug!("Loaded access token from {}", path.display());
            return Ok(Session::new(token));
        }

        match std::env::var(TOKEN_ENV_VAR) {
            Ok(token) if !token.trim().is_empty() => Ok(Session::new(token.trim())),
            _ => Err(RemoteError::AuthRequired(format!(
                "no token file configured and {} is not set",
                TOKEN_ENV_VAR
            ))),
        }
    }
}
