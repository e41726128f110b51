//! Identity & path cache
//!
//! Maps mount paths to remote identities. Entries live in an arena and refer
//! to their parent by index, so the tree has no ownership cycles. Each entry
//! and each directory listing carries its own fetch time and is trusted only
//! within the configured TTL.

use crate::error::{FsError, FsResult};
use crate::fuse::path_utils::{self, split_path};
use crate::remote::{EntryKind, RemoteDriveClient, RemoteEntry, RemoteIdentity};
use log::{debug, trace, warn};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

type EntryId = usize;

const ROOT_ENTRY: EntryId = 0;

/// Ordered children of one directory as last reported by the remote
#[derive(Debug)]
struct DirectoryListing {
    names: Vec<String>,
    fetched_at: Instant,
}

#[derive(Debug)]
struct PathEntry {
    name: String,
    identity: RemoteIdentity,
    kind: EntryKind,
    parent: Option<EntryId>,
    /// `None` once the entry has been invalidated
    fetched_at: Option<Instant>,
    children: HashMap<String, EntryId>,
    listing: Option<DirectoryListing>,
}

impl PathEntry {
    fn new(name: &str, identity: RemoteIdentity, kind: EntryKind, parent: Option<EntryId>) -> Self {
        Self {
            name: name.to_string(),
            identity,
            kind,
            parent,
            fetched_at: Some(Instant::now()),
            children: HashMap::new(),
            listing: None,
        }
    }

    fn is_fresh(&self, ttl: Duration) -> bool {
        self.fetched_at.is_some_and(|t| t.elapsed() < ttl)
    }

    fn listing_is_fresh(&self, ttl: Duration) -> bool {
        self.listing
            .as_ref()
            .is_some_and(|l| l.fetched_at.elapsed() < ttl)
    }
}

/// A path resolved to its remote identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEntry {
    pub identity: RemoteIdentity,
    pub kind: EntryKind,
}

struct Arena {
    entries: Vec<Option<PathEntry>>,
    free: Vec<EntryId>,
    by_identity: HashMap<RemoteIdentity, EntryId>,
}

enum WalkStep {
    Found(ResolvedEntry),
    NeedListing(RemoteIdentity),
    NotFound(String),
    NotADirectory(String),
}

impl Arena {
    fn new(root: RemoteIdentity) -> Self {
        let mut by_identity = HashMap::new();
        by_identity.insert(root.clone(), ROOT_ENTRY);
        Self {
            entries: vec![Some(PathEntry::new("", root, EntryKind::Directory, None))],
            free: Vec::new(),
            by_identity,
        }
    }

    fn get(&self, id: EntryId) -> FsResult<&PathEntry> {
        self.entries
            .get(id)
            .and_then(Option::as_ref)
            .ok_or_else(|| FsError::Corrupt(format!("dangling path cache slot {}", id)))
    }

    fn get_mut(&mut self, id: EntryId) -> FsResult<&mut PathEntry> {
        self.entries
            .get_mut(id)
            .and_then(Option::as_mut)
            .ok_or_else(|| FsError::Corrupt(format!("dangling path cache slot {}", id)))
    }

    fn alloc(&mut self, entry: PathEntry) -> EntryId {
        let identity = entry.identity.clone();
        let id = match self.free.pop() {
            Some(slot) => {
                self.entries[slot] = Some(entry);
                slot
            }
            None => {
                self.entries.push(Some(entry));
                self.entries.len() - 1
            }
        };
        self.by_identity.insert(identity, id);
        id
    }

    /// Walk cached links only, ignoring freshness
    fn find(&self, path: &str) -> Option<EntryId> {
        let mut current = ROOT_ENTRY;
        for segment in split_path(path) {
            current = *self.get(current).ok()?.children.get(segment)?;
        }
        Some(current)
    }

    fn path_of(&self, id: EntryId) -> Option<String> {
        let mut names = Vec::new();
        let mut current = id;
        while current != ROOT_ENTRY {
            let entry = self.get(current).ok()?;
            names.push(entry.name.clone());
            current = entry.parent?;
        }
        names.reverse();
        Some(format!("/{}", names.join("/")))
    }

    /// Drop an entry and everything below it. The root itself is never freed.
    fn remove_subtree(&mut self, id: EntryId) {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let Some(entry) = self.entries.get_mut(current).and_then(Option::take) else {
                continue;
            };
            stack.extend(entry.children.values().copied());
            if self.by_identity.get(&entry.identity) == Some(&current) {
                self.by_identity.remove(&entry.identity);
            }
            if current == ROOT_ENTRY {
                let mut root = PathEntry::new("", entry.identity.clone(), EntryKind::Directory, None);
                root.fetched_at = entry.fetched_at;
                self.by_identity.insert(entry.identity, ROOT_ENTRY);
                self.entries[ROOT_ENTRY] = Some(root);
            } else {
                self.free.push(current);
            }
        }
    }

    /// Unlink `id` from its parent's child map and drop the parent's listing
    fn detach(&mut self, id: EntryId) -> FsResult<()> {
        let (parent, name) = {
            let entry = self.get(id)?;
            (entry.parent, entry.name.clone())
        };
        if let Some(parent) = parent {
            let parent_entry = self.get_mut(parent)?;
            if parent_entry.children.get(&name) == Some(&id) {
                parent_entry.children.remove(&name);
            }
            parent_entry.listing = None;
        }
        Ok(())
    }

    /// Attach a child under `parent`, replacing whatever held that name.
    ///
    /// An identity may only appear once in the cache, so a stale entry for
    /// the same identity elsewhere is dropped first.
    fn attach(&mut self, parent: EntryId, name: &str, identity: RemoteIdentity, kind: EntryKind) -> FsResult<EntryId> {
        if let Some(existing) = self.get(parent)?.children.get(name).copied() {
            let same = self.get(existing)?.identity == identity;
            if same {
                if self.get(existing)?.kind != kind {
                    let orphans: Vec<EntryId> = self.get(existing)?.children.values().copied().collect();
                    for orphan in orphans {
                        self.remove_subtree(orphan);
                    }
                    let entry = self.get_mut(existing)?;
                    entry.children.clear();
                    entry.listing = None;
                }
                let entry = self.get_mut(existing)?;
                entry.kind = kind;
                entry.fetched_at = Some(Instant::now());
                return Ok(existing);
            }
            self.remove_subtree(existing);
            self.get_mut(parent)?.children.remove(name);
        }

        if let Some(elsewhere) = self.by_identity.get(&identity).copied() {
            if elsewhere == ROOT_ENTRY {
                return Err(FsError::Corrupt(format!("root identity {} listed as a child", identity)));
            }
            self.detach(elsewhere)?;
            self.remove_subtree(elsewhere);
        }

        let child = self.alloc(PathEntry::new(name, identity, kind, Some(parent)));
        self.get_mut(parent)?.children.insert(name.to_string(), child);
        Ok(child)
    }

    fn walk(&self, segments: &[&str], ttl: Duration, refreshed: &HashSet<RemoteIdentity>) -> FsResult<WalkStep> {
        let mut current = ROOT_ENTRY;
        for (depth, segment) in segments.iter().enumerate() {
            let entry = self.get(current)?;
            if !entry.kind.is_dir() {
                return Ok(WalkStep::NotADirectory(format!("/{}", segments[..depth].join("/"))));
            }
            let listing_trusted = entry.listing_is_fresh(ttl) || refreshed.contains(&entry.identity);
            match entry.children.get(*segment) {
                Some(&child) if listing_trusted || self.get(child)?.is_fresh(ttl) => current = child,
                None if listing_trusted => {
                    return Ok(WalkStep::NotFound(format!("/{}", segments[..=depth].join("/"))));
                }
                _ => return Ok(WalkStep::NeedListing(entry.identity.clone())),
            }
        }
        let entry = self.get(current)?;
        Ok(WalkStep::Found(ResolvedEntry {
            identity: entry.identity.clone(),
            kind: entry.kind,
        }))
    }

    /// Merge a fresh remote listing into the children of `dir`
    fn apply_listing(&mut self, dir: EntryId, remote: &[RemoteEntry]) -> FsResult<()> {
        let listed: HashSet<&str> = remote.iter().map(|e| e.name.as_str()).collect();
        let vanished: Vec<EntryId> = self
            .get(dir)?
            .children
            .iter()
            .filter(|(name, _)| !listed.contains(name.as_str()))
            .map(|(_, id)| *id)
            .collect();
        for id in vanished {
            let name = self.get(id)?.name.clone();
            self.get_mut(dir)?.children.remove(&name);
            self.remove_subtree(id);
        }

        for entry in remote {
            self.attach(dir, &entry.name, entry.identity.clone(), entry.kind)?;
        }

        self.get_mut(dir)?.listing = Some(DirectoryListing {
            names: remote.iter().map(|e| e.name.clone()).collect(),
            fetched_at: Instant::now(),
        });
        Ok(())
    }

    fn listed_entries(&self, dir: EntryId) -> FsResult<Vec<RemoteEntry>> {
        let entry = self.get(dir)?;
        let listing = entry
            .listing
            .as_ref()
            .ok_or_else(|| FsError::Corrupt(format!("listing of {} vanished", entry.identity)))?;
        listing
            .names
            .iter()
            .filter_map(|name| entry.children.get(name))
            .map(|&child| {
                let child = self.get(child)?;
                Ok(RemoteEntry {
                    name: child.name.clone(),
                    identity: child.identity.clone(),
                    kind: child.kind,
                })
            })
            .collect()
    }
}

/// Path to identity cache shared by every filesystem call
pub struct PathCache {
    client: Arc<dyn RemoteDriveClient>,
    ttl: Duration,
    arena: Mutex<Arena>,
}

impl PathCache {
    pub fn new(client: Arc<dyn RemoteDriveClient>, ttl: Duration) -> Self {
        let root = client.root();
        Self {
            client,
            ttl,
            arena: Mutex::new(Arena::new(root)),
        }
    }

    fn arena(&self) -> MutexGuard<'_, Arena> {
        self.arena.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn root_identity(&self) -> RemoteIdentity {
        self.client.root()
    }

    /// Resolve a path to its remote identity
    pub async fn resolve(&self, path: &str) -> FsResult<RemoteIdentity> {
        Ok(self.lookup(path).await?.identity)
    }

    /// Resolve a path to its identity and kind, listing parents remotely on
    /// cache misses.
    pub async fn lookup(&self, path: &str) -> FsResult<ResolvedEntry> {
        let segments = split_path(path);
        let mut refreshed = HashSet::new();
        // Each listing makes progress by at least one segment unless another
        // caller keeps invalidating the same directory.
        let max_listings = segments.len() * 2 + 2;

        for _ in 0..=max_listings {
            let step = self.arena().walk(&segments, self.ttl, &refreshed)?;
            match step {
                WalkStep::Found(resolved) => {
                    trace!("Resolved {} -> {}", path, resolved.identity);
                    return Ok(resolved);
                }
                WalkStep::NotFound(missing) => return Err(FsError::NotFound(missing)),
                WalkStep::NotADirectory(prefix) => return Err(FsError::NotADirectory(prefix)),
                WalkStep::NeedListing(dir) => match self.refresh_listing(&dir).await {
                    Ok(_) => {
                        refreshed.insert(dir);
                    }
                    Err(FsError::NotFound(_)) if dir != self.root_identity() => {
                        // A cached directory was deleted remotely; its parent is listed again
                        debug!("Cached directory {} is gone remotely", dir);
                        if let Some(parent) = self.forget_identity(&dir) {
                            refreshed.remove(&parent);
                        }
                    }
                    Err(e) => return Err(e),
                },
            }
        }

        warn!("Gave up resolving {} after repeated concurrent invalidation", path);
        Err(FsError::Busy(path.to_string()))
    }

    /// List a directory remotely and merge the result
    async fn refresh_listing(&self, dir: &RemoteIdentity) -> FsResult<Vec<RemoteEntry>> {
        debug!("Listing remote directory {}", dir);
        let remote = self.client.list_children(dir).await?;
        let mut arena = self.arena();
        // The directory may have been dropped while the listing was in flight
        if let Some(&entry) = arena.by_identity.get(dir) {
            arena.apply_listing(entry, &remote)?;
        }
        Ok(remote)
    }

    /// Drop an identity and its subtree. Returns the parent's identity.
    fn forget_identity(&self, identity: &RemoteIdentity) -> Option<RemoteIdentity> {
        let mut arena = self.arena();
        let id = *arena.by_identity.get(identity)?;
        let parent = arena.get(id).ok()?.parent?;
        let parent_identity = arena.get(parent).ok()?.identity.clone();
        if let Err(e) = arena.detach(id) {
            warn!("Failed to detach {}: {}", identity, e);
        }
        arena.remove_subtree(id);
        Some(parent_identity)
    }

    /// Ordered children of a directory, listing remotely when stale
    pub async fn listing(&self, path: &str) -> FsResult<Vec<RemoteEntry>> {
        let resolved = self.lookup(path).await?;
        self.children(path, &resolved).await
    }

    /// Ordered children of an already resolved directory
    pub async fn children(&self, path: &str, resolved: &ResolvedEntry) -> FsResult<Vec<RemoteEntry>> {
        if !resolved.kind.is_dir() {
            return Err(FsError::NotADirectory(path.to_string()));
        }
        {
            let arena = self.arena();
            if let Some(&dir) = arena.by_identity.get(&resolved.identity) {
                if arena.get(dir)?.listing_is_fresh(self.ttl) {
                    return arena.listed_entries(dir);
                }
            }
        }
        self.refresh_listing(&resolved.identity).await
    }

    /// Drop cached state for `path`.
    ///
    /// Non-recursive invalidation marks the entry stale and keeps its
    /// descendants; recursive invalidation removes the whole subtree. Either
    /// way the parent's listing is dropped so the next resolve re-lists it.
    pub fn invalidate(&self, path: &str, recursive: bool) {
        let mut arena = self.arena();
        let Some(id) = arena.find(path) else {
            return;
        };
        debug!("Invalidating {} (recursive: {})", path, recursive);
        if recursive {
            if let Err(e) = arena.detach(id) {
                warn!("Failed to detach {}: {}", path, e);
            }
            arena.remove_subtree(id);
            if id == ROOT_ENTRY {
                if let Ok(root) = arena.get_mut(ROOT_ENTRY) {
                    root.listing = None;
                }
            }
        } else if let Ok(entry) = arena.get_mut(id) {
            entry.fetched_at = None;
            entry.listing = None;
            if let Some(parent) = entry.parent {
                if let Ok(parent) = arena.get_mut(parent) {
                    parent.listing = None;
                }
            }
        }
    }

    /// Drop only the listing of a directory
    pub fn invalidate_listing(&self, dir_path: &str) {
        let mut arena = self.arena();
        if let Some(id) = arena.find(dir_path) {
            if let Ok(entry) = arena.get_mut(id) {
                entry.listing = None;
            }
        }
    }

    /// Record a freshly created entry under an already cached parent
    pub fn register(&self, parent_path: &str, name: &str, identity: RemoteIdentity, kind: EntryKind) -> FsResult<()> {
        let mut arena = self.arena();
        let parent = arena
            .find(parent_path)
            .ok_or_else(|| FsError::NotFound(parent_path.to_string()))?;
        arena.get_mut(parent)?.listing = None;
        arena.attach(parent, name, identity, kind)?;
        Ok(())
    }

    /// Remove a path and everything below it
    pub fn remove(&self, path: &str) {
        self.invalidate(path, true);
    }

    /// Move a cached entry to a new path, keeping its identity and subtree
    pub fn rename(&self, old_path: &str, new_path: &str) -> FsResult<()> {
        let (new_parent_path, new_name) = path_utils::parent_and_name(new_path)?;
        let mut arena = self.arena();
        let id = arena
            .find(old_path)
            .ok_or_else(|| FsError::NotFound(old_path.to_string()))?;
        if id == ROOT_ENTRY {
            return Err(FsError::InvalidArgument("cannot rename the root".to_string()));
        }
        let new_parent = arena
            .find(&new_parent_path)
            .ok_or_else(|| FsError::NotFound(new_parent_path.clone()))?;

        arena.detach(id)?;
        if let Some(displaced) = arena.get(new_parent)?.children.get(&new_name).copied() {
            if displaced != id {
                arena.get_mut(new_parent)?.children.remove(&new_name);
                arena.remove_subtree(displaced);
            }
        }

        let entry = arena.get_mut(id)?;
        entry.name = new_name.clone();
        entry.parent = Some(new_parent);
        entry.fetched_at = Some(Instant::now());
        let parent = arena.get_mut(new_parent)?;
        parent.children.insert(new_name, id);
        parent.listing = None;
        debug!("Renamed cached entry {} -> {}", old_path, new_path);
        Ok(())
    }

    /// Current cached path of an identity
    pub fn path_of(&self, identity: &RemoteIdentity) -> Option<String> {
        let arena = self.arena();
        let id = *arena.by_identity.get(identity)?;
        arena.path_of(id)
    }

    /// Number of cached entries, root included
    pub fn len(&self) -> usize {
        self.arena().by_identity.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
