//! Attribute cache keyed by remote identity

use crate::error::FsResult;
use crate::remote::{EntryKind, RemoteDriveClient, RemoteIdentity, RemoteMetadata};
use log::trace;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant, SystemTime};

/// Metadata of one entry as of `fetched_at`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeSnapshot {
    pub size: u64,
    pub modified: SystemTime,
    pub kind: EntryKind,
    pub fetched_at: Instant,
}

impl AttributeSnapshot {
    fn from_metadata(metadata: RemoteMetadata, fetched_at: Instant) -> Self {
        Self {
            size: metadata.size,
            modified: metadata.modified,
            kind: metadata.kind,
            fetched_at,
        }
    }

    pub fn is_fresh(&self, ttl: Duration) -> bool {
        self.fetched_at.elapsed() < ttl
    }
}

#[derive(Default)]
struct Slot {
    snapshot: Option<AttributeSnapshot>,
    /// Bumped on every invalidation; fetches started under an older
    /// generation are not stored.
    generation: u64,
}

pub struct AttributeCache {
    client: Arc<dyn RemoteDriveClient>,
    ttl: Duration,
    slots: Mutex<HashMap<RemoteIdentity, Slot>>,
}

impl AttributeCache {
    pub fn new(client: Arc<dyn RemoteDriveClient>, ttl: Duration) -> Self {
        Self {
            client,
            ttl,
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<RemoteIdentity, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cached snapshot if still within the TTL, otherwise a fresh one
    pub async fn get(&self, identity: &RemoteIdentity) -> FsResult<AttributeSnapshot> {
        let generation = {
            let mut slots = self.slots();
            let slot = slots.entry(identity.clone()).or_default();
            if let Some(snapshot) = slot.snapshot.as_ref().filter(|s| s.is_fresh(self.ttl)) {
                trace!("Attribute cache hit for {}", identity);
                return Ok(snapshot.clone());
            }
            slot.generation
        };
        self.fetch(identity, generation).await
    }

    /// Fetch a snapshot regardless of the cached one
    pub async fn refresh(&self, identity: &RemoteIdentity) -> FsResult<AttributeSnapshot> {
        let generation = self.slots().entry(identity.clone()).or_default().generation;
        self.fetch(identity, generation).await
    }

    async fn fetch(&self, identity: &RemoteIdentity, generation: u64) -> FsResult<AttributeSnapshot> {
        let metadata = self.client.get_metadata(identity).await?;
        let mut slots = self.slots();
        let slot = slots.entry(identity.clone()).or_default();
        let fetched_at = slot
            .snapshot
            .as_ref()
            .map_or_else(Instant::now, |previous| previous.fetched_at.max(Instant::now()));
        let snapshot = AttributeSnapshot::from_metadata(metadata, fetched_at);
        if slot.generation == generation {
            slot.snapshot = Some(snapshot.clone());
        } else {
            trace!("Discarding attributes of {} fetched before invalidation", identity);
        }
        Ok(snapshot)
    }

    /// Store metadata already known locally, e.g. right after a create
    pub fn insert(&self, identity: &RemoteIdentity, metadata: RemoteMetadata) {
        let mut slots = self.slots();
        let slot = slots.entry(identity.clone()).or_default();
        slot.generation += 1;
        slot.snapshot = Some(AttributeSnapshot::from_metadata(metadata, Instant::now()));
    }

    pub fn invalidate(&self, identity: &RemoteIdentity) {
        let mut slots = self.slots();
        let slot = slots.entry(identity.clone()).or_default();
        slot.generation += 1;
        slot.snapshot = None;
    }

    /// Drop everything known about a deleted identity
    pub fn forget(&self, identity: &RemoteIdentity) {
        self.slots().remove(identity);
    }
}
