//! Inode number allocation
//!
//! The kernel addresses entries by inode number while the bridge works on
//! paths. A number is handed out when an entry reply reaches the kernel and
//! dropped once the kernel forgets every reference to it. Numbers are never
//! reused.

use crate::fuse::path_utils::{self, ROOT_PATH};
use log::trace;
use std::collections::HashMap;

pub const ROOT_INO: u64 = 1;

/// Reported in readdir for children the kernel holds no reference to, as
/// libfuse does when it does not track inode numbers
pub const UNKNOWN_INO: u64 = 0xffff_ffff;

struct InodeEntry {
    /// None once the entry was unlinked while the kernel still held it
    path: Option<String>,
    /// Entry replies the kernel has not forgotten yet
    lookups: u64,
}

pub struct InodeTable {
    entries: HashMap<u64, InodeEntry>,
    inodes: HashMap<String, u64>,
    next_ino: u64,
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl InodeTable {
    pub fn new() -> Self {
        let mut table = Self {
            entries: HashMap::new(),
            inodes: HashMap::new(),
            next_ino: ROOT_INO + 1,
        };
        table.entries.insert(
            ROOT_INO,
            InodeEntry {
                path: Some(ROOT_PATH.to_string()),
                lookups: 1,
            },
        );
        table.inodes.insert(ROOT_PATH.to_string(), ROOT_INO);
        table
    }

    pub fn path(&self, ino: u64) -> Option<&str> {
        self.entries.get(&ino)?.path.as_deref()
    }

    /// Inode of a path the kernel already knows, without taking a reference
    pub fn ino_of(&self, path: &str) -> Option<u64> {
        self.inodes.get(path).copied()
    }

    /// Inode for a path about to be sent to the kernel in an entry reply.
    /// Each call counts as one kernel reference.
    pub fn remember(&mut self, path: &str) -> u64 {
        if let Some(&ino) = self.inodes.get(path) {
            if let Some(entry) = self.entries.get_mut(&ino) {
                entry.lookups += 1;
            }
            return ino;
        }
        let ino = self.next_ino;
        self.next_ino += 1;
        self.entries.insert(
            ino,
            InodeEntry {
                path: Some(path.to_string()),
                lookups: 1,
            },
        );
        self.inodes.insert(path.to_string(), ino);
        ino
    }

    /// Drop `nlookup` kernel references; the inode goes away at zero
    pub fn forget(&mut self, ino: u64, nlookup: u64) {
        if ino == ROOT_INO {
            return;
        }
        let Some(entry) = self.entries.get_mut(&ino) else {
            return;
        };
        entry.lookups = entry.lookups.saturating_sub(nlookup);
        if entry.lookups == 0 {
            if let Some(entry) = self.entries.remove(&ino) {
                trace!("Forgot inode {} ({:?})", ino, entry.path);
                if let Some(path) = entry.path {
                    if self.inodes.get(&path) == Some(&ino) {
                        self.inodes.remove(&path);
                    }
                }
            }
        }
    }

    /// Inode of the directory containing `path`
    pub fn parent_of(&self, path: &str) -> u64 {
        match path_utils::parent_and_name(path) {
            Ok((parent, _)) => self.ino_of(&parent).unwrap_or(UNKNOWN_INO),
            Err(_) => ROOT_INO,
        }
    }

    /// Move `old` and everything below it to `new`, keeping inode numbers
    pub fn rename(&mut self, old: &str, new: &str) {
        self.unlink(new);
        let moved: Vec<(String, u64)> = self
            .inodes
            .iter()
            .filter(|(path, _)| path.as_str() == old || path_utils::is_descendant(path, old))
            .map(|(path, ino)| (path.clone(), *ino))
            .collect();
        for (path, ino) in moved {
            let renamed = format!("{}{}", new, &path[old.len()..]);
            self.inodes.remove(&path);
            self.inodes.insert(renamed.clone(), ino);
            if let Some(entry) = self.entries.get_mut(&ino) {
                entry.path = Some(renamed);
            }
        }
    }

    /// Detach `path` and everything below it from the namespace.
    ///
    /// The inode numbers stay valid until the kernel forgets them, but they no
    /// longer resolve to a path.
    pub fn unlink(&mut self, path: &str) {
        let removed: Vec<String> = self
            .inodes
            .keys()
            .filter(|p| p.as_str() == path || path_utils::is_descendant(p, path))
            .filter(|p| p.as_str() != ROOT_PATH)
            .cloned()
            .collect();
        for path in removed {
            if let Some(ino) = self.inodes.remove(&path) {
                // Kept only for the pending forget
                if let Some(entry) = self.entries.get_mut(&ino) {
                    entry.path = None;
                }
            }
        }
    }

    /// Number of inodes the kernel still references, root included
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
