//! Open file table for the FUSE filesystem
//!
//! Every open returns a numeric handle. Handles opened for writing share a
//! single write session per remote identity; the session keeps the whole
//! file in memory and uploads it on flush.

use crate::error::{FsError, FsResult};
use crate::fuse::attr_cache::AttributeCache;
use crate::remote::{RemoteDriveClient, RemoteIdentity};
use log::{debug, error, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Buffers above this size are logged; they are still accepted
pub const BUFFER_WARN_THRESHOLD: usize = 64 * 1024 * 1024;

/// Access mode of an open handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl AccessMode {
    pub fn can_read(self) -> bool {
        matches!(self, AccessMode::ReadOnly | AccessMode::ReadWrite)
    }

    pub fn can_write(self) -> bool {
        matches!(self, AccessMode::WriteOnly | AccessMode::ReadWrite)
    }
}

#[derive(Debug, Default)]
struct DirtyBuffer {
    data: Vec<u8>,
    /// Whether `data` holds the full file content
    loaded: bool,
    dirty: bool,
}

/// In-memory copy of a file being written, shared by the writer handle and
/// any readers of the same identity
#[derive(Debug)]
pub struct WriteSession {
    identity: RemoteIdentity,
    buffer: tokio::sync::Mutex<DirtyBuffer>,
    /// Logical length, readable without waiting on an upload in progress
    len: AtomicU64,
    loaded: AtomicBool,
    unlinked: AtomicBool,
}

impl WriteSession {
    fn new(identity: RemoteIdentity, buffer: DirtyBuffer) -> Self {
        Self {
            identity,
            len: AtomicU64::new(buffer.data.len() as u64),
            loaded: AtomicBool::new(buffer.loaded),
            buffer: tokio::sync::Mutex::new(buffer),
            unlinked: AtomicBool::new(false),
        }
    }

    fn publish(&self, buffer: &DirtyBuffer) {
        self.len.store(buffer.data.len() as u64, Ordering::Release);
        self.loaded.store(buffer.loaded, Ordering::Release);
    }
}

#[derive(Debug)]
pub struct OpenFileHandle {
    pub fh: u64,
    pub identity: RemoteIdentity,
    pub mode: AccessMode,
    session: Option<Arc<WriteSession>>,
}

#[derive(Default)]
struct TableState {
    handles: HashMap<u64, Arc<OpenFileHandle>>,
    writers: HashMap<RemoteIdentity, Arc<WriteSession>>,
}

/// Zero-extend `data` to `len` bytes. The buffer is left untouched when the
/// memory cannot be reserved.
fn grow(data: &mut Vec<u8>, len: usize) -> FsResult<()> {
    if len <= data.len() {
        return Ok(());
    }
    data.try_reserve_exact(len - data.len())
        .map_err(|e| FsError::FileTooLarge(format!("cannot hold {} bytes in memory: {}", len, e)))?;
    data.resize(len, 0);
    Ok(())
}

/// Table of open file handles
pub struct OpenFileTable {
    client: Arc<dyn RemoteDriveClient>,
    attributes: Arc<AttributeCache>,
    next_fh: AtomicU64,
    state: Mutex<TableState>,
}

impl OpenFileTable {
    pub fn new(client: Arc<dyn RemoteDriveClient>, attributes: Arc<AttributeCache>) -> Self {
        Self {
            client,
            attributes,
            next_fh: AtomicU64::new(1),
            state: Mutex::new(TableState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, TableState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn handle(&self, fh: u64) -> FsResult<Arc<OpenFileHandle>> {
        self.state()
            .handles
            .get(&fh)
            .cloned()
            .ok_or(FsError::BadHandle(fh))
    }

    /// Open an existing file. `truncate` empties the content for write modes.
    pub fn open(&self, identity: &RemoteIdentity, mode: AccessMode, truncate: bool) -> FsResult<u64> {
        let initial = truncate.then(|| DirtyBuffer {
            data: Vec::new(),
            loaded: true,
            dirty: true,
        });
        self.open_with(identity, mode, initial)
    }

    /// Open a file that was just created empty on the remote
    pub fn open_created(&self, identity: &RemoteIdentity, mode: AccessMode) -> FsResult<u64> {
        let initial = DirtyBuffer {
            data: Vec::new(),
            loaded: true,
            dirty: false,
        };
        self.open_with(identity, mode, Some(initial))
    }

    fn open_with(&self, identity: &RemoteIdentity, mode: AccessMode, initial: Option<DirtyBuffer>) -> FsResult<u64> {
        let mut state = self.state();
        let session = if mode.can_write() {
            if state.writers.contains_key(identity) {
                debug!("Rejecting second writer for {}", identity);
                return Err(FsError::Busy(identity.to_string()));
            }
            let session = Arc::new(WriteSession::new(identity.clone(), initial.unwrap_or_default()));
            state.writers.insert(identity.clone(), session.clone());
            Some(session)
        } else {
            None
        };

        let fh = self.next_fh.fetch_add(1, Ordering::Relaxed);
        state.handles.insert(
            fh,
            Arc::new(OpenFileHandle {
                fh,
                identity: identity.clone(),
                mode,
                session,
            }),
        );
        debug!("📂 Opened handle {} for {} ({:?})", fh, identity, mode);
        Ok(fh)
    }

    /// Fill the buffer with the remote content unless it already holds it
    async fn ensure_loaded(&self, session: &WriteSession, buffer: &mut DirtyBuffer) -> FsResult<()> {
        if buffer.loaded {
            return Ok(());
        }
        let size = self.attributes.refresh(&session.identity).await?.size;
        let data = self.client.read_range(&session.identity, 0, size).await?;
        debug!("Loaded {} bytes of {} into write buffer", data.len(), session.identity);
        buffer.data = data;
        buffer.loaded = true;
        session.publish(buffer);
        Ok(())
    }

    pub async fn read(&self, fh: u64, offset: u64, size: u32) -> FsResult<Vec<u8>> {
        let handle = self.handle(fh)?;
        if !handle.mode.can_read() {
            return Err(FsError::BadHandle(fh));
        }

        let session = handle
            .session
            .clone()
            .or_else(|| self.state().writers.get(&handle.identity).cloned());
        if let Some(session) = session {
            let buffer = session.buffer.lock().await;
            if buffer.loaded {
                let len = buffer.data.len() as u64;
                let start = offset.min(len) as usize;
                let end = offset.saturating_add(size as u64).min(len) as usize;
                return Ok(buffer.data[start..end].to_vec());
            }
        }

        let file_size = self.attributes.get(&handle.identity).await?.size;
        if offset >= file_size {
            return Ok(Vec::new());
        }
        let length = (size as u64).min(file_size - offset);
        Ok(self.client.read_range(&handle.identity, offset, length).await?)
    }

    /// Apply a write to the handle's buffer. Nothing is sent to the remote.
    pub async fn write(&self, fh: u64, offset: u64, data: &[u8]) -> FsResult<usize> {
        let handle = self.handle(fh)?;
        let session = handle.session.as_ref().ok_or(FsError::BadHandle(fh))?;
        let mut buffer = session.buffer.lock().await;
        self.ensure_loaded(session, &mut buffer).await?;

        let end = usize::try_from(offset)
            .ok()
            .and_then(|start| start.checked_add(data.len()))
            .ok_or_else(|| FsError::FileTooLarge(format!("write of {} bytes at {}", data.len(), offset)))?;
        let start = end - data.len();
        let before = buffer.data.len();
        grow(&mut buffer.data, end)?;
        buffer.data[start..end].copy_from_slice(data);
        buffer.dirty = true;
        session.publish(&buffer);

        if before <= BUFFER_WARN_THRESHOLD && buffer.data.len() > BUFFER_WARN_THRESHOLD {
            warn!(
                "Write buffer for {} exceeds {} bytes; the whole file is held in memory until flush",
                session.identity, BUFFER_WARN_THRESHOLD
            );
        }
        Ok(data.len())
    }

    /// Set the buffer length of a writable handle, zero-filling on growth
    pub async fn truncate(&self, fh: u64, size: u64) -> FsResult<()> {
        let handle = self.handle(fh)?;
        let session = handle.session.as_ref().ok_or(FsError::BadHandle(fh))?;
        let size = usize::try_from(size).map_err(|_| FsError::FileTooLarge(format!("size {}", size)))?;
        let mut buffer = session.buffer.lock().await;
        if size == 0 {
            buffer.loaded = true;
        } else {
            self.ensure_loaded(session, &mut buffer).await?;
        }
        grow(&mut buffer.data, size)?;
        buffer.data.truncate(size);
        buffer.dirty = true;
        session.publish(&buffer);
        Ok(())
    }

    /// Upload the buffer if it holds unsaved changes
    pub async fn flush(&self, fh: u64) -> FsResult<()> {
        let handle = self.handle(fh)?;
        match &handle.session {
            Some(session) => self.flush_session(session).await,
            None => Ok(()),
        }
    }

    async fn flush_session(&self, session: &WriteSession) -> FsResult<()> {
        let mut buffer = session.buffer.lock().await;
        if session.unlinked.load(Ordering::Acquire) {
            buffer.dirty = false;
            return Ok(());
        }
        if !buffer.dirty {
            return Ok(());
        }

        match self.client.write_whole(&session.identity, &buffer.data).await {
            Ok(()) => {
                buffer.dirty = false;
                self.attributes.invalidate(&session.identity);
                debug!("Flushed {} bytes to {}", buffer.data.len(), session.identity);
                Ok(())
            }
            Err(e) => {
                if e.is_transient() {
                    warn!("Flush of {} failed, buffer kept dirty: {}", session.identity, e);
                } else {
                    error!("Flush of {} rejected by remote, buffer kept dirty: {}", session.identity, e);
                }
                Err(FsError::from(e))
            }
        }
    }

    /// Flush and drop a handle. The handle is gone even when the flush fails.
    pub async fn release(&self, fh: u64) -> FsResult<()> {
        let handle = self.handle(fh)?;
        let result = match &handle.session {
            Some(session) => self.flush_session(session).await,
            None => Ok(()),
        };

        {
            let mut state = self.state();
            state.handles.remove(&fh);
            if let Some(session) = &handle.session {
                if state
                    .writers
                    .get(&handle.identity)
                    .is_some_and(|w| Arc::ptr_eq(w, session))
                {
                    state.writers.remove(&handle.identity);
                }
            }
        }

        if let Err(e) = &result {
            error!(
                "Data loss: unsaved changes to {} discarded on release of handle {}: {}",
                handle.identity, fh, e
            );
        } else {
            debug!("📂 Released handle {} for {}", fh, handle.identity);
        }
        result
    }

    /// Handle of the live writer for an identity, if any
    pub fn writer_handle(&self, identity: &RemoteIdentity) -> Option<u64> {
        let state = self.state();
        let session = state.writers.get(identity)?;
        state
            .handles
            .values()
            .find(|h| h.session.as_ref().is_some_and(|s| Arc::ptr_eq(s, session)))
            .map(|h| h.fh)
    }

    /// Logical length of a loaded write session, which overrides the remote size
    pub fn writer_len(&self, identity: &RemoteIdentity) -> Option<u64> {
        let state = self.state();
        let session = state.writers.get(identity)?;
        session
            .loaded
            .load(Ordering::Acquire)
            .then(|| session.len.load(Ordering::Acquire))
    }

    /// Mark write sessions of a deleted identity so they never upload again
    pub fn detach(&self, identity: &RemoteIdentity) {
        if let Some(session) = self.state().writers.remove(identity) {
            debug!("Detached write session of unlinked {}", identity);
            session.unlinked.store(true, Ordering::Release);
        }
    }

    pub fn open_count(&self) -> usize {
        self.state().handles.len()
    }
}
