//! File attribute conversion for FUSE filesystem

use crate::fuse::bridge::EntryAttributes;
use crate::remote::EntryKind;
use fuser::{FileAttr, FileType};
use std::time::SystemTime;

pub const BLOCK_SIZE: u32 = 512;

/// Attribute manager for the FUSE filesystem
pub struct AttributeManager;

impl AttributeManager {
    /// Convert bridge attributes to a FUSE FileAttr
    pub fn to_file_attr(ino: u64, attributes: &EntryAttributes, uid: u32, gid: u32) -> FileAttr {
        let now = SystemTime::now();
        let is_dir = attributes.kind == EntryKind::Directory;

        FileAttr {
            ino,
            size: attributes.size,
            blocks: attributes.size.div_ceil(BLOCK_SIZE as u64),
            atime: now,
            mtime: attributes.modified,
            ctime: attributes.modified,
            crtime: attributes.modified,
            kind: Self::file_type(attributes.kind),
            perm: if is_dir { 0o755 } else { 0o644 },
            nlink: if is_dir { 2 } else { 1 },
            uid,
            gid,
            rdev: 0,
            flags: 0,
            blksize: BLOCK_SIZE,
        }
    }

    pub fn file_type(kind: EntryKind) -> FileType {
        match kind {
            EntryKind::Directory => FileType::Directory,
            EntryKind::File => FileType::RegularFile,
        }
    }
}
