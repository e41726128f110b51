//! FUSE filesystem operations implementation

use crate::fuse::attributes::AttributeManager;
use crate::fuse::bridge::EntryAttributes;
use crate::fuse::file_handles::AccessMode;
use crate::fuse::filesystem::CloudDriveFuse;
use crate::fuse::inodes::UNKNOWN_INO;
use crate::fuse::path_utils;
use crate::fuse::utils::{sync_await, OpenFlags};
use fuser::{
    FileAttr, FileType, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen,
    ReplyStatfs, ReplyWrite, Request, TimeOrNow,
};
use log::{debug, info};
use std::ffi::OsStr;
use std::time::{Duration, SystemTime};

/// How long the kernel may cache entries and attributes
const REPLY_TTL: Duration = Duration::from_secs(1);

const STATFS_BLOCK_SIZE: u64 = 4096;
const MAX_NAME_LEN: u32 = 255;

impl CloudDriveFuse {
    fn file_attr(&self, ino: u64, attributes: &EntryAttributes) -> FileAttr {
        let (uid, gid) = self.owner();
        AttributeManager::to_file_attr(ino, attributes, uid, gid)
    }

    /// Attributes for an entry reply, which hands the kernel one reference
    fn entry_attr(&mut self, path: &str, attributes: &EntryAttributes) -> FileAttr {
        let ino = self.inodes_mut().remember(path);
        self.file_attr(ino, attributes)
    }
}

impl fuser::Filesystem for CloudDriveFuse {
    fn destroy(&mut self) {
        info!("Filesystem unmounted, {} handles still open", self.bridge().open_files().open_count());
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        debug!("LOOKUP: parent={}, name={:?}", parent, name);
        let path = match self.child_path(parent, name) {
            Ok(path) => path,
            Err(e) => return reply.error(e),
        };
        match sync_await(self.bridge().getattr(&path)) {
            Ok(attributes) => {
                let attr = self.entry_attr(&path, &attributes);
                reply.entry(&REPLY_TTL, &attr, 0);
            }
            Err(e) => reply.error(Self::errno("lookup", &path, e)),
        }
    }

    fn forget(&mut self, _req: &Request<'_>, ino: u64, nlookup: u64) {
        debug!("FORGET: ino={}, nlookup={}", ino, nlookup);
        self.inodes_mut().forget(ino, nlookup);
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        debug!("GETATTR: ino={}", ino);
        let path = match self.path_of(ino) {
            Ok(path) => path,
            Err(e) => return reply.error(e),
        };
        match sync_await(self.bridge().getattr(&path)) {
            Ok(attributes) => {
                let attr = self.file_attr(ino, &attributes);
                reply.attr(&REPLY_TTL, &attr);
            }
            Err(e) => reply.error(Self::errno("getattr", &path, e)),
        }
    }

    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        debug!("SETATTR: ino={}, size={:?}, fh={:?}", ino, size, fh);
        let path = match self.path_of(ino) {
            Ok(path) => path,
            Err(e) => return reply.error(e),
        };
        // Only the size is stored remotely; mode, owner and times are fixed
        let result = match size {
            Some(size) => sync_await(self.bridge().truncate(&path, fh, size)),
            None => sync_await(self.bridge().getattr(&path)),
        };
        match result {
            Ok(attributes) => {
                let attr = self.file_attr(ino, &attributes);
                reply.attr(&REPLY_TTL, &attr);
            }
            Err(e) => reply.error(Self::errno("setattr", &path, e)),
        }
    }

    fn readdir(&mut self, _req: &Request<'_>, ino: u64, _fh: u64, offset: i64, mut reply: ReplyDirectory) {
        debug!("READDIR: ino={}, offset={}", ino, offset);
        let path = match self.path_of(ino) {
            Ok(path) => path,
            Err(e) => return reply.error(e),
        };
        let children = match sync_await(self.bridge().readdir(&path)) {
            Ok(children) => children,
            Err(e) => return reply.error(Self::errno("readdir", &path, e)),
        };

        // Listing takes no kernel reference, so unseen children get no inode
        let inodes = self.inodes();
        let mut entries = vec![
            (ino, FileType::Directory, ".".to_string()),
            (inodes.parent_of(&path), FileType::Directory, "..".to_string()),
        ];
        for child in children {
            let child_ino = inodes
                .ino_of(&path_utils::join(&path, &child.name))
                .unwrap_or(UNKNOWN_INO);
            entries.push((child_ino, AttributeManager::file_type(child.kind), child.name));
        }

        let skip = usize::try_from(offset).unwrap_or(0);
        for (i, (entry_ino, kind, name)) in entries.into_iter().enumerate().skip(skip) {
            // The offset handed back is the position of the next entry
            if reply.add(entry_ino, (i + 1) as i64, kind, name) {
                break;
            }
        }
        reply.ok();
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        debug!("OPEN: ino={}, flags={:#o}", ino, flags);
        let open_flags = match OpenFlags::from_i32(flags) {
            Ok(open_flags) => open_flags,
            Err(e) => return reply.error(e),
        };
        let path = match self.path_of(ino) {
            Ok(path) => path,
            Err(e) => return reply.error(e),
        };
        match sync_await(self.bridge().open(&path, open_flags.access, open_flags.truncate)) {
            Ok(fh) => {
                debug!("OPENED: fh={}", fh);
                reply.opened(fh, 0);
            }
            Err(e) => reply.error(Self::errno("open", &path, e)),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        debug!("READ: ino={}, fh={}, offset={}, size={}", ino, fh, offset, size);
        let Ok(offset) = u64::try_from(offset) else {
            return reply.error(libc::EINVAL);
        };
        match sync_await(self.bridge().read(fh, offset, size)) {
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(Self::errno("read", &format!("fh {}", fh), e)),
        }
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        debug!("WRITE: ino={}, fh={}, offset={}, size={}", ino, fh, offset, data.len());
        let Ok(offset) = u64::try_from(offset) else {
            return reply.error(libc::EINVAL);
        };
        match sync_await(self.bridge().write(fh, offset, data)) {
            Ok(written) => reply.written(written as u32),
            Err(e) => reply.error(Self::errno("write", &format!("fh {}", fh), e)),
        }
    }

    fn flush(&mut self, _req: &Request<'_>, ino: u64, fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        debug!("FLUSH: ino={}, fh={}", ino, fh);
        match sync_await(self.bridge().flush(fh)) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(Self::errno("flush", &format!("fh {}", fh), e)),
        }
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        debug!("RELEASE: ino={}, fh={}", ino, fh);
        match sync_await(self.bridge().release(fh)) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(Self::errno("release", &format!("fh {}", fh), e)),
        }
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        flags: i32,
        reply: ReplyCreate,
    ) {
        debug!("CREATE: parent={}, name={:?}", parent, name);
        let open_flags = match OpenFlags::from_i32(flags) {
            Ok(open_flags) => open_flags,
            Err(e) => return reply.error(e),
        };
        let path = match self.child_path(parent, name) {
            Ok(path) => path,
            Err(e) => return reply.error(e),
        };
        // A new file is always writable through the handle that created it
        let access = match open_flags.access {
            AccessMode::ReadOnly => AccessMode::ReadWrite,
            access => access,
        };
        match sync_await(self.bridge().create(&path, access)) {
            Ok((fh, attributes)) => {
                let attr = self.entry_attr(&path, &attributes);
                reply.created(&REPLY_TTL, &attr, 0, fh, 0);
            }
            Err(e) => reply.error(Self::errno("create", &path, e)),
        }
    }

    fn mkdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, _mode: u32, _umask: u32, reply: ReplyEntry) {
        debug!("MKDIR: parent={}, name={:?}", parent, name);
        let path = match self.child_path(parent, name) {
            Ok(path) => path,
            Err(e) => return reply.error(e),
        };
        match sync_await(self.bridge().mkdir(&path)) {
            Ok(attributes) => {
                let attr = self.entry_attr(&path, &attributes);
                reply.entry(&REPLY_TTL, &attr, 0);
            }
            Err(e) => reply.error(Self::errno("mkdir", &path, e)),
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        debug!("UNLINK: parent={}, name={:?}", parent, name);
        let path = match self.child_path(parent, name) {
            Ok(path) => path,
            Err(e) => return reply.error(e),
        };
        match sync_await(self.bridge().unlink(&path)) {
            Ok(()) => {
                self.inodes_mut().unlink(&path);
                reply.ok();
            }
            Err(e) => reply.error(Self::errno("unlink", &path, e)),
        }
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        debug!("RMDIR: parent={}, name={:?}", parent, name);
        let path = match self.child_path(parent, name) {
            Ok(path) => path,
            Err(e) => return reply.error(e),
        };
        match sync_await(self.bridge().rmdir(&path)) {
            Ok(()) => {
                self.inodes_mut().unlink(&path);
                reply.ok();
            }
            Err(e) => reply.error(Self::errno("rmdir", &path, e)),
        }
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        flags: u32,
        reply: ReplyEmpty,
    ) {
        debug!(
            "RENAME: parent={}, name={:?} -> newparent={}, newname={:?}",
            parent, name, newparent, newname
        );
        // RENAME_NOREPLACE and RENAME_EXCHANGE have no remote equivalent
        if flags != 0 {
            return reply.error(libc::EINVAL);
        }
        let (old_path, new_path) = match (self.child_path(parent, name), self.child_path(newparent, newname)) {
            (Ok(old_path), Ok(new_path)) => (old_path, new_path),
            (Err(e), _) | (_, Err(e)) => return reply.error(e),
        };
        match sync_await(self.bridge().rename(&old_path, &new_path)) {
            Ok(()) => {
                self.inodes_mut().rename(&old_path, &new_path);
                reply.ok();
            }
            Err(e) => reply.error(Self::errno("rename", &old_path, e)),
        }
    }

    fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: ReplyStatfs) {
        debug!("STATFS");
        match sync_await(self.bridge().statfs()) {
            Ok(quota) => {
                let blocks = quota.total / STATFS_BLOCK_SIZE;
                let free = quota.remaining / STATFS_BLOCK_SIZE;
                reply.statfs(
                    blocks,
                    free,
                    free,
                    0,
                    0,
                    STATFS_BLOCK_SIZE as u32,
                    MAX_NAME_LEN,
                    STATFS_BLOCK_SIZE as u32,
                );
            }
            Err(e) => reply.error(Self::errno("statfs", "/", e)),
        }
    }
}
