//! Utility functions for FUSE filesystem implementation

use crate::fuse::file_handles::AccessMode;
use libc::{c_int, O_RDONLY, O_RDWR, O_TRUNC, O_WRONLY};
use tokio::runtime::Handle;

/// Synchronously await a future in the current async context
/// This is used to bridge async and sync code in FUSE operations
pub fn sync_await<F, T>(future: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::task::block_in_place(|| Handle::current().block_on(future))
}

/// Parsed open(2) flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenFlags {
    pub access: AccessMode,
    pub truncate: bool,
}

impl OpenFlags {
    pub fn from_i32(flags: i32) -> Result<Self, c_int> {
        let access = match flags & libc::O_ACCMODE {
            O_RDONLY => AccessMode::ReadOnly,
            O_WRONLY => AccessMode::WriteOnly,
            O_RDWR => AccessMode::ReadWrite,
            _ => return Err(libc::EINVAL),
        };

        Ok(Self {
            access,
            truncate: (flags & O_TRUNC) != 0,
        })
    }
}
