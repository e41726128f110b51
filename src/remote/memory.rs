//! In-process remote drive
//!
//! Keeps a whole drive tree in memory. Used by the test suites and by the
//! `memory` backend, which mounts a scratch drive without any credentials.

use crate::remote::{
    EntryKind, Quota, RemoteDriveClient, RemoteEntry, RemoteError, RemoteIdentity, RemoteMetadata, RemoteResult,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::SystemTime;

const MEMORY_ROOT_ID: &str = "memroot";
const DEFAULT_CAPACITY: u64 = 1 << 30;

#[derive(Debug)]
struct Node {
    parent: Option<RemoteIdentity>,
    name: String,
    kind: EntryKind,
    data: Vec<u8>,
    modified: SystemTime,
    children: BTreeMap<String, RemoteIdentity>,
}

impl Node {
    fn new(parent: Option<RemoteIdentity>, name: &str, kind: EntryKind) -> Self {
        Self {
            parent,
            name: name.to_string(),
            kind,
            data: Vec::new(),
            modified: SystemTime::now(),
            children: BTreeMap::new(),
        }
    }
}

struct MemoryState {
    nodes: HashMap<RemoteIdentity, Node>,
    next_id: u64,
}

impl MemoryState {
    fn node(&self, id: &RemoteIdentity) -> RemoteResult<&Node> {
        self.nodes
            .get(id)
            .ok_or_else(|| RemoteError::NotFound(id.to_string()))
    }

    fn node_mut(&mut self, id: &RemoteIdentity) -> RemoteResult<&mut Node> {
        self.nodes
            .get_mut(id)
            .ok_or_else(|| RemoteError::NotFound(id.to_string()))
    }

    fn used(&self) -> u64 {
        self.nodes.values().map(|n| n.data.len() as u64).sum()
    }

    fn insert(&mut self, parent: &RemoteIdentity, name: &str, kind: EntryKind) -> RemoteResult<RemoteIdentity> {
        let parent_node = self.node(parent)?;
        if !parent_node.kind.is_dir() {
            return Err(RemoteError::Protocol(format!("{} is not a folder", parent)));
        }
        if parent_node.children.contains_key(name) {
            return Err(RemoteError::AlreadyExists(name.to_string()));
        }
        self.next_id += 1;
        let id = RemoteIdentity::new(format!("mem-{}", self.next_id));
        self.nodes
            .insert(id.clone(), Node::new(Some(parent.clone()), name, kind));
        let parent_node = self.node_mut(parent)?;
        parent_node.children.insert(name.to_string(), id.clone());
        parent_node.modified = SystemTime::now();
        Ok(id)
    }

    fn remove_subtree(&mut self, id: &RemoteIdentity) {
        if let Some(node) = self.nodes.remove(id) {
            for child in node.children.values() {
                self.remove_subtree(child);
            }
        }
    }

    fn is_ancestor(&self, ancestor: &RemoteIdentity, id: &RemoteIdentity) -> bool {
        let mut current = Some(id.clone());
        while let Some(cur) = current {
            if &cur == ancestor {
                return true;
            }
            current = self.nodes.get(&cur).and_then(|n| n.parent.clone());
        }
        false
    }
}

/// A drive held entirely in memory
pub struct MemoryDrive {
    state: Mutex<MemoryState>,
    capacity: u64,
}

impl Default for MemoryDrive {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDrive {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: u64) -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(
            RemoteIdentity::new(MEMORY_ROOT_ID),
            Node::new(None, "", EntryKind::Directory),
        );
        Self {
            state: Mutex::new(MemoryState { nodes, next_id: 0 }),
            capacity,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Seed a file directly, bypassing the client interface
    pub fn insert_file(&self, parent: &RemoteIdentity, name: &str, data: &[u8]) -> RemoteResult<RemoteIdentity> {
        let mut state = self.lock();
        let id = state.insert(parent, name, EntryKind::File)?;
        state.node_mut(&id)?.data = data.to_vec();
        Ok(id)
    }

    /// Seed a directory directly, bypassing the client interface
    pub fn insert_dir(&self, parent: &RemoteIdentity, name: &str) -> RemoteResult<RemoteIdentity> {
        self.lock().insert(parent, name, EntryKind::Directory)
    }

    /// Current content of a file, if it exists
    pub fn content(&self, id: &RemoteIdentity) -> Option<Vec<u8>> {
        self.lock().nodes.get(id).map(|n| n.data.clone())
    }

    /// Look up a child identity by name
    pub fn child(&self, parent: &RemoteIdentity, name: &str) -> Option<RemoteIdentity> {
        self.lock()
            .nodes
            .get(parent)
            .and_then(|n| n.children.get(name).cloned())
    }
}

#[async_trait]
impl RemoteDriveClient for MemoryDrive {
    fn root(&self) -> RemoteIdentity {
        RemoteIdentity::new(MEMORY_ROOT_ID)
    }

    async fn list_children(&self, id: &RemoteIdentity) -> RemoteResult<Vec<RemoteEntry>> {
        let state = self.lock();
        let node = state.node(id)?;
        node.children
            .iter()
            .map(|(name, child)| {
                let kind = state.node(child)?.kind;
                Ok(RemoteEntry {
                    name: name.clone(),
                    identity: child.clone(),
                    kind,
                })
            })
            .collect()
    }

    async fn get_metadata(&self, id: &RemoteIdentity) -> RemoteResult<RemoteMetadata> {
        let state = self.lock();
        let node = state.node(id)?;
        Ok(RemoteMetadata {
            size: node.data.len() as u64,
            modified: node.modified,
            kind: node.kind,
        })
    }

    async fn read_range(&self, id: &RemoteIdentity, offset: u64, length: u64) -> RemoteResult<Vec<u8>> {
        let state = self.lock();
        let node = state.node(id)?;
        let len = node.data.len() as u64;
        let start = offset.min(len) as usize;
        let end = offset.saturating_add(length).min(len) as usize;
        Ok(node.data[start..end].to_vec())
    }

    async fn write_whole(&self, id: &RemoteIdentity, data: &[u8]) -> RemoteResult<()> {
        let mut state = self.lock();
        let current = state.node(id)?.data.len() as u64;
        if state.used() - current + data.len() as u64 > self.capacity {
            return Err(RemoteError::PermissionDenied("quota exceeded".to_string()));
        }
        let node = state.node_mut(id)?;
        if node.kind.is_dir() {
            return Err(RemoteError::Protocol(format!("{} is a folder", id)));
        }
        node.data = data.to_vec();
        node.modified = SystemTime::now();
        Ok(())
    }

    async fn create(&self, parent: &RemoteIdentity, name: &str, kind: EntryKind) -> RemoteResult<RemoteIdentity> {
        self.lock().insert(parent, name, kind)
    }

    async fn delete(&self, id: &RemoteIdentity) -> RemoteResult<()> {
        let mut state = self.lock();
        let parent = state.node(id)?.parent.clone();
        let Some(parent) = parent else {
            return Err(RemoteError::PermissionDenied("cannot delete the root".to_string()));
        };
        let name = state.node(id)?.name.clone();
        let parent_node = state.node_mut(&parent)?;
        parent_node.children.remove(&name);
        parent_node.modified = SystemTime::now();
        state.remove_subtree(id);
        Ok(())
    }

    async fn move_entry(&self, id: &RemoteIdentity, new_parent: &RemoteIdentity, new_name: &str) -> RemoteResult<()> {
        let mut state = self.lock();
        let old_parent = state
            .node(id)?
            .parent
            .clone()
            .ok_or_else(|| RemoteError::PermissionDenied("cannot move the root".to_string()))?;
        if state.is_ancestor(id, new_parent) {
            return Err(RemoteError::PermissionDenied(format!(
                "cannot move {} below itself",
                id
            )));
        }
        if !state.node(new_parent)?.kind.is_dir() {
            return Err(RemoteError::Protocol(format!("{} is not a folder", new_parent)));
        }
        if state.node(new_parent)?.children.contains_key(new_name) {
            return Err(RemoteError::AlreadyExists(new_name.to_string()));
        }

        let old_name = state.node(id)?.name.clone();
        state.node_mut(&old_parent)?.children.remove(&old_name);
        state
            .node_mut(new_parent)?
            .children
            .insert(new_name.to_string(), id.clone());
        let node = state.node_mut(id)?;
        node.parent = Some(new_parent.clone());
        node.name = new_name.to_string();
        Ok(())
    }

    async fn quota(&self) -> RemoteResult<Quota> {
        let state = self.lock();
        Ok(Quota {
            total: self.capacity,
            remaining: self.capacity.saturating_sub(state.used()),
        })
    }
}
