//! Remote drive capability consumed by the filesystem bridge
//!
//! The bridge only ever talks to a `RemoteDriveClient`. Concrete clients
//! live in the submodules: a Microsoft Graph client for real accounts and an
//! in-memory drive for tests and credential-less mounts.

pub mod graph_client;
pub mod http_client;
pub mod memory;
pub mod models;
pub mod session;

use async_trait::async_trait;
use std::fmt;
use std::time::SystemTime;
use thiserror::Error;

/// Opaque handle the remote drive assigns to a directory entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RemoteIdentity(String);

impl RemoteIdentity {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RemoteIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RemoteIdentity {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Kind of a directory entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    File,
    Directory,
}

impl EntryKind {
    pub fn is_dir(self) -> bool {
        matches!(self, EntryKind::Directory)
    }
}

/// One child as reported by `list_children`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub name: String,
    pub identity: RemoteIdentity,
    pub kind: EntryKind,
}

/// Metadata for a single remote entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteMetadata {
    pub size: u64,
    pub modified: SystemTime,
    pub kind: EntryKind,
}

/// Storage usage of the account, in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    pub total: u64,
    pub remaining: u64,
}

/// Failure kinds a remote call can report.
///
/// Every client maps its transport-level failures onto these variants so the
/// bridge never inspects untyped responses.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    #[error("remote entry not found: {0}")]
    NotFound(String),
    #[error("remote entry already exists: {0}")]
    AlreadyExists(String),
    #[error("session expired")]
    AuthExpired,
    #[error("authentication required: {0}")]
    AuthRequired(String),
    #[error("access denied: {0}")]
    PermissionDenied(String),
    #[error("rate limited by remote service")]
    RateLimited,
    #[error("network error: {0}")]
    Network(String),
    #[error("unexpected response from remote service: {0}")]
    Protocol(String),
}

impl RemoteError {
    /// Errors a caller may retry later without changing anything locally
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RemoteError::AuthExpired | RemoteError::RateLimited | RemoteError::Network(_)
        )
    }
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// Interface for remote drive operations.
///
/// Implementations own their retry/backoff and session refresh policy; the
/// bridge calls each operation once and maps the outcome.
#[async_trait]
pub trait RemoteDriveClient: Send + Sync {
    /// Identity of the drive root
    fn root(&self) -> RemoteIdentity;

    async fn list_children(&self, id: &RemoteIdentity) -> RemoteResult<Vec<RemoteEntry>>;

    async fn get_metadata(&self, id: &RemoteIdentity) -> RemoteResult<RemoteMetadata>;

    /// Read up to `length` bytes at `offset`. Returns fewer bytes only at end-of-file.
    async fn read_range(&self, id: &RemoteIdentity, offset: u64, length: u64) -> RemoteResult<Vec<u8>>;

    /// Replace the whole content of a file
    async fn write_whole(&self, id: &RemoteIdentity, data: &[u8]) -> RemoteResult<()>;

    async fn create(&self, parent: &RemoteIdentity, name: &str, kind: EntryKind) -> RemoteResult<RemoteIdentity>;

    async fn delete(&self, id: &RemoteIdentity) -> RemoteResult<()>;

    async fn move_entry(&self, id: &RemoteIdentity, new_parent: &RemoteIdentity, new_name: &str) -> RemoteResult<()>;

    async fn quota(&self) -> RemoteResult<Quota>;
}
