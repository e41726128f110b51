//! Filesystem-level error taxonomy and its mapping to POSIX error codes

use crate::remote::RemoteError;
use libc::c_int;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FsError {
    #[error("no such file or directory: {0}")]
    NotFound(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("resource busy: {0}")]
    Busy(String),
    #[error("remote unavailable: {0}")]
    RemoteUnavailable(String),
    /// Cache state contradicts its own invariants
    #[error("internal inconsistency: {0}")]
    Corrupt(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("not a directory: {0}")]
    NotADirectory(String),
    #[error("is a directory: {0}")]
    IsADirectory(String),
    #[error("directory not empty: {0}")]
    NotEmpty(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("bad file handle: {0}")]
    BadHandle(u64),
    #[error("file too large: {0}")]
    FileTooLarge(String),
}

pub type FsResult<T> = Result<T, FsError>;

impl FsError {
    pub fn to_errno(&self) -> c_int {
        match self {
            FsError::NotFound(_) => libc::ENOENT,
            FsError::PermissionDenied(_) => libc::EACCES,
            FsError::Busy(_) => libc::EBUSY,
            FsError::RemoteUnavailable(_) => libc::EIO,
            FsError::Corrupt(_) => libc::EIO,
            FsError::AlreadyExists(_) => libc::EEXIST,
            FsError::NotADirectory(_) => libc::ENOTDIR,
            FsError::IsADirectory(_) => libc::EISDIR,
            FsError::NotEmpty(_) => libc::ENOTEMPTY,
            FsError::InvalidArgument(_) => libc::EINVAL,
            FsError::BadHandle(_) => libc::EBADF,
            FsError::FileTooLarge(_) => libc::EFBIG,
        }
    }

    pub fn read_only() -> Self {
        FsError::PermissionDenied("filesystem is mounted read-only".to_string())
    }
}

impl From<RemoteError> for FsError {
    fn from(error: RemoteError) -> Self {
        match error {
            RemoteError::NotFound(what) => FsError::NotFound(what),
            RemoteError::AlreadyExists(what) => FsError::AlreadyExists(what),
            RemoteError::AuthRequired(why) => FsError::PermissionDenied(why),
            RemoteError::PermissionDenied(why) => FsError::PermissionDenied(why),
            RemoteError::AuthExpired | RemoteError::RateLimited | RemoteError::Network(_) => {
                FsError::RemoteUnavailable(error.to_string())
            }
            RemoteError::Protocol(why) => FsError::RemoteUnavailable(why),
        }
    }
}
