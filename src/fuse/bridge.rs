//! Filesystem call bridge
//!
//! Translates path-based filesystem calls into cache lookups and remote drive
//! operations. Every call is independent; the caches are shared between all
//! of them, so the bridge is used behind an `Arc` from many threads.

use crate::error::{FsError, FsResult};
use crate::fuse::attr_cache::AttributeCache;
use crate::fuse::file_handles::{AccessMode, OpenFileTable};
use crate::fuse::path_cache::{PathCache, ResolvedEntry};
use crate::fuse::path_utils::{self, ROOT_PATH};
use crate::remote::{EntryKind, Quota, RemoteDriveClient, RemoteIdentity, RemoteMetadata};
use log::{debug, info};
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant, SystemTime};

/// How long a storage quota answer is reused for statfs
pub const QUOTA_CACHE_TTL: Duration = Duration::from_secs(600);

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub cache_ttl: Duration,
    pub read_only: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(30),
            read_only: false,
        }
    }
}

/// Attributes reported for one path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryAttributes {
    pub identity: RemoteIdentity,
    pub kind: EntryKind,
    pub size: u64,
    pub modified: SystemTime,
}

/// One directory entry as returned by readdir
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub kind: EntryKind,
}

pub struct DriveBridge {
    client: Arc<dyn RemoteDriveClient>,
    paths: PathCache,
    attributes: Arc<AttributeCache>,
    files: OpenFileTable,
    config: BridgeConfig,
    quota: Mutex<Option<(Quota, Instant)>>,
}

impl DriveBridge {
    pub fn new(client: Arc<dyn RemoteDriveClient>, config: BridgeConfig) -> Self {
        let attributes = Arc::new(AttributeCache::new(client.clone(), config.cache_ttl));
        Self {
            paths: PathCache::new(client.clone(), config.cache_ttl),
            files: OpenFileTable::new(client.clone(), attributes.clone()),
            attributes,
            client,
            config,
            quota: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn path_cache(&self) -> &PathCache {
        &self.paths
    }

    pub fn open_files(&self) -> &OpenFileTable {
        &self.files
    }

    fn check_writable(&self) -> FsResult<()> {
        if self.config.read_only {
            Err(FsError::read_only())
        } else {
            Ok(())
        }
    }

    /// Resolve `path` and run `op` on it. If the remote reports the cached
    /// identity as gone, the path is dropped from the cache, resolved once
    /// more and `op` runs again.
    ///
    /// A `NotFound` from resolution itself is final: the path cache only
    /// reports it after a listing confirmed the name is absent.
    async fn with_resolved<T, F, Fut>(&self, path: &str, mut op: F) -> FsResult<T>
    where
        F: FnMut(ResolvedEntry) -> Fut,
        Fut: Future<Output = FsResult<T>>,
    {
        let entry = self.paths.lookup(path).await?;
        match op(entry).await {
            Err(FsError::NotFound(missing)) => {
                debug!("{} not found remotely ({}), re-resolving", path, missing);
                self.paths.invalidate(path, true);
                let entry = self.paths.lookup(path).await?;
                op(entry).await
            }
            result => result,
        }
    }

    async fn attributes_of(&self, entry: &ResolvedEntry) -> FsResult<EntryAttributes> {
        let snapshot = self.attributes.get(&entry.identity).await?;
        let size = self
            .files
            .writer_len(&entry.identity)
            .unwrap_or(snapshot.size);
        Ok(EntryAttributes {
            identity: entry.identity.clone(),
            kind: snapshot.kind,
            size,
            modified: snapshot.modified,
        })
    }

    pub async fn getattr(&self, path: &str) -> FsResult<EntryAttributes> {
        debug!("getattr {}", path);
        self.with_resolved(path, |entry| async move { self.attributes_of(&entry).await })
            .await
    }

    pub async fn lookup(&self, parent: &str, name: &str) -> FsResult<EntryAttributes> {
        self.getattr(&path_utils::join(parent, name)).await
    }

    pub async fn readdir(&self, path: &str) -> FsResult<Vec<DirEntry>> {
        debug!("readdir {}", path);
        let entries = self
            .with_resolved(path, |entry| async move { self.paths.children(path, &entry).await })
            .await?;
        Ok(entries
            .into_iter()
            .map(|e| DirEntry {
                name: e.name,
                kind: e.kind,
            })
            .collect())
    }

    pub async fn open(&self, path: &str, mode: AccessMode, truncate: bool) -> FsResult<u64> {
        debug!("open {} {:?} truncate={}", path, mode, truncate);
        if mode.can_write() || truncate {
            self.check_writable()?;
        }
        let entry = self
            .with_resolved(path, |entry| async move {
                // Confirms the identity still exists before any handle is handed out
                self.attributes.get(&entry.identity).await?;
                Ok(entry)
            })
            .await?;
        if entry.kind.is_dir() {
            return Err(FsError::IsADirectory(path.to_string()));
        }
        let truncate = truncate && mode.can_write();
        let fh = self.files.open(&entry.identity, mode, truncate)?;
        if truncate {
            self.attributes.invalidate(&entry.identity);
        }
        Ok(fh)
    }

    pub async fn read(&self, fh: u64, offset: u64, size: u32) -> FsResult<Vec<u8>> {
        self.files.read(fh, offset, size).await
    }

    pub async fn write(&self, fh: u64, offset: u64, data: &[u8]) -> FsResult<usize> {
        self.check_writable()?;
        self.files.write(fh, offset, data).await
    }

    pub async fn flush(&self, fh: u64) -> FsResult<()> {
        self.files.flush(fh).await
    }

    pub async fn release(&self, fh: u64) -> FsResult<()> {
        self.files.release(fh).await
    }

    async fn parent_directory(&self, path: &str) -> FsResult<(String, String, ResolvedEntry)> {
        let (parent_path, name) = path_utils::parent_and_name(path)?;
        let parent = self.paths.lookup(&parent_path).await?;
        if !parent.kind.is_dir() {
            return Err(FsError::NotADirectory(parent_path));
        }
        Ok((parent_path, name, parent))
    }

    async fn create_entry(&self, path: &str, kind: EntryKind) -> FsResult<EntryAttributes> {
        self.check_writable()?;
        let (parent_path, name) = path_utils::parent_and_name(path)?;
        let parent_path = parent_path.as_str();
        let name = name.as_str();
        let identity = self
            .with_resolved(parent_path, |parent| async move {
                if !parent.kind.is_dir() {
                    return Err(FsError::NotADirectory(parent_path.to_string()));
                }
                Ok(self.client.create(&parent.identity, name, kind).await?)
            })
            .await?;
        self.paths.register(parent_path, name, identity.clone(), kind)?;

        let modified = SystemTime::now();
        self.attributes.insert(
            &identity,
            RemoteMetadata {
                size: 0,
                modified,
                kind,
            },
        );
        info!("Created {:?} {}", kind, path);
        Ok(EntryAttributes {
            identity,
            kind,
            size: 0,
            modified,
        })
    }

    /// Create an empty file and open a handle on it
    pub async fn create(&self, path: &str, mode: AccessMode) -> FsResult<(u64, EntryAttributes)> {
        debug!("create {}", path);
        let attributes = self.create_entry(path, EntryKind::File).await?;
        let fh = self.files.open_created(&attributes.identity, mode)?;
        Ok((fh, attributes))
    }

    pub async fn mkdir(&self, path: &str) -> FsResult<EntryAttributes> {
        debug!("mkdir {}", path);
        self.create_entry(path, EntryKind::Directory).await
    }

    async fn delete_entry(&self, path: &str, entry: &ResolvedEntry) -> FsResult<()> {
        self.client.delete(&entry.identity).await?;
        self.files.detach(&entry.identity);
        self.attributes.forget(&entry.identity);
        self.paths.remove(path);
        info!("Deleted {}", path);
        Ok(())
    }

    pub async fn unlink(&self, path: &str) -> FsResult<()> {
        debug!("unlink {}", path);
        self.check_writable()?;
        self.with_resolved(path, |entry| async move {
            if entry.kind.is_dir() {
                return Err(FsError::IsADirectory(path.to_string()));
            }
            self.delete_entry(path, &entry).await
        })
        .await
    }

    pub async fn rmdir(&self, path: &str) -> FsResult<()> {
        debug!("rmdir {}", path);
        self.check_writable()?;
        if path == ROOT_PATH {
            return Err(FsError::Busy(path.to_string()));
        }
        self.with_resolved(path, |entry| async move {
            if !entry.kind.is_dir() {
                return Err(FsError::NotADirectory(path.to_string()));
            }
            if !self.paths.children(path, &entry).await?.is_empty() {
                return Err(FsError::NotEmpty(path.to_string()));
            }
            self.delete_entry(path, &entry).await
        })
        .await
    }

    pub async fn rename(&self, old_path: &str, new_path: &str) -> FsResult<()> {
        debug!("rename {} -> {}", old_path, new_path);
        self.check_writable()?;
        if old_path == new_path {
            return Ok(());
        }
        if old_path == ROOT_PATH || path_utils::is_descendant(new_path, old_path) {
            return Err(FsError::InvalidArgument(format!(
                "cannot move {} into {}",
                old_path, new_path
            )));
        }

        let source = self.paths.lookup(old_path).await?;
        let (_, new_name, new_parent) = self.parent_directory(new_path).await?;

        match self.paths.lookup(new_path).await {
            Ok(target) if target.identity == source.identity => return Ok(()),
            Ok(target) => {
                match (source.kind.is_dir(), target.kind.is_dir()) {
                    (false, true) => return Err(FsError::IsADirectory(new_path.to_string())),
                    (true, false) => return Err(FsError::NotADirectory(new_path.to_string())),
                    (true, true) => {
                        if !self.paths.listing(new_path).await?.is_empty() {
                            return Err(FsError::NotEmpty(new_path.to_string()));
                        }
                    }
                    (false, false) => {}
                }
                self.delete_entry(new_path, &target).await?;
            }
            Err(FsError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        self.client
            .move_entry(&source.identity, &new_parent.identity, &new_name)
            .await?;
        self.paths.rename(old_path, new_path)?;
        self.attributes.invalidate(&source.identity);
        info!("Renamed {} -> {}", old_path, new_path);
        Ok(())
    }

    /// Change the size of a file, through its writer if one is open
    pub async fn truncate(&self, path: &str, fh: Option<u64>, size: u64) -> FsResult<EntryAttributes> {
        debug!("truncate {} to {}", path, size);
        self.check_writable()?;
        let entry = self.paths.lookup(path).await?;
        if entry.kind.is_dir() {
            return Err(FsError::IsADirectory(path.to_string()));
        }

        let writer = fh
            .filter(|fh| self.files.writer_handle(&entry.identity) == Some(*fh))
            .or_else(|| self.files.writer_handle(&entry.identity));
        match writer {
            Some(fh) => self.files.truncate(fh, size).await?,
            None => {
                let fh = self.files.open(&entry.identity, AccessMode::WriteOnly, size == 0)?;
                let truncated = self.files.truncate(fh, size).await;
                let released = self.files.release(fh).await;
                truncated?;
                released?;
            }
        }
        self.attributes.invalidate(&entry.identity);
        self.attributes_of(&entry).await
    }

    /// Storage quota, reused for ten minutes
    pub async fn statfs(&self) -> FsResult<Quota> {
        {
            let cached = self.quota.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some((quota, fetched_at)) = *cached {
                if fetched_at.elapsed() < QUOTA_CACHE_TTL {
                    return Ok(quota);
                }
            }
        }
        debug!("statfs cache expired, fetching quota");
        let quota = self.client.quota().await?;
        *self.quota.lock().unwrap_or_else(PoisonError::into_inner) = Some((quota, Instant::now()));
        Ok(quota)
    }
}
