//! Main FUSE filesystem implementation

use crate::error::FsError;
use crate::fuse::bridge::DriveBridge;
use crate::fuse::inodes::InodeTable;
use crate::fuse::path_utils;
use libc::c_int;
use log::{debug, warn};
use std::ffi::OsStr;
use std::sync::Arc;

/// Cloud drive FUSE filesystem, a thin inode layer over the drive bridge
pub struct CloudDriveFuse {
    bridge: Arc<DriveBridge>,
    inodes: InodeTable,
    uid: u32,
    gid: u32,
}

impl CloudDriveFuse {
    pub fn new(bridge: Arc<DriveBridge>, uid: u32, gid: u32) -> Self {
        Self {
            bridge,
            inodes: InodeTable::new(),
            uid,
            gid,
        }
    }

    pub fn bridge(&self) -> &Arc<DriveBridge> {
        &self.bridge
    }

    pub fn inodes(&self) -> &InodeTable {
        &self.inodes
    }

    pub fn inodes_mut(&mut self) -> &mut InodeTable {
        &mut self.inodes
    }

    pub fn owner(&self) -> (u32, u32) {
        (self.uid, self.gid)
    }

    /// Path of an inode known to the kernel
    pub fn path_of(&self, ino: u64) -> Result<String, c_int> {
        self.inodes
            .path(ino)
            .map(str::to_string)
            .ok_or(libc::ENOENT)
    }

    /// Path of `name` inside the directory `parent`
    pub fn child_path(&self, parent: u64, name: &OsStr) -> Result<String, c_int> {
        let name = name.to_str().ok_or(libc::EINVAL)?;
        if name.is_empty() || name.contains('/') || name == "." || name == ".." {
            return Err(libc::EINVAL);
        }
        Ok(path_utils::join(&self.path_of(parent)?, name))
    }

    /// Log a failed call and turn it into an errno
    pub fn errno(op: &str, path: &str, error: FsError) -> c_int {
        match &error {
            FsError::NotFound(_) => debug!("{} {}: {}", op, path, error),
            _ => warn!("{} {} failed: {}", op, path, error),
        }
        error.to_errno()
    }
}
