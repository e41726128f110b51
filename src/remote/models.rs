//! Graph drive API payloads

use crate::remote::{EntryKind, Quota, RemoteEntry, RemoteError, RemoteIdentity, RemoteMetadata};
use chrono::DateTime;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// ParentReference: parent of a drive item, used when moving items.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParentReference {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// DriveItem: metadata of a file or folder.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DriveItem {
    pub id: String,
    pub name: Option<String>,
    #[serde(rename = "lastModifiedDateTime")]
    pub last_modified: Option<String>,
    pub size: Option<u64>,
    pub folder: Option<FolderFacet>,
    pub file: Option<FileFacet>,
    #[serde(rename = "parentReference")]
    pub parent_reference: Option<ParentReference>,
}

/// FolderFacet: present when the item is a folder.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FolderFacet {
    #[serde(rename = "childCount")]
    pub child_count: Option<u32>,
}

/// FileFacet: present when the item is a file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileFacet {
    #[serde(rename = "mimeType")]
    pub mime_type: Option<String>,
}

/// DriveItemCollection: one page of children.
#[derive(Debug, Deserialize)]
pub struct DriveItemCollection {
    pub value: Vec<DriveItem>,
    #[serde(rename = "@odata.nextLink")]
    pub next_link: Option<String>,
}

/// Drive resource, only the quota part is used
#[derive(Debug, Deserialize)]
pub struct DriveResource {
    pub quota: Option<DriveQuota>,
}

#[derive(Debug, Deserialize)]
pub struct DriveQuota {
    pub total: Option<u64>,
    pub remaining: Option<u64>,
}

/// Body of a folder creation request
#[derive(Debug, Serialize)]
pub struct CreateFolderRequest {
    pub name: String,
    pub folder: serde_json::Map<String, serde_json::Value>,
    #[serde(rename = "@microsoft.graph.conflictBehavior")]
    pub conflict_behavior: String,
}

/// Body of a move/rename request
#[derive(Debug, Serialize)]
pub struct MoveRequest {
    pub name: String,
    #[serde(rename = "parentReference")]
    pub parent_reference: ParentReference,
}

fn parse_time_string(time_string: &str) -> Option<SystemTime> {
    DateTime::parse_from_rfc3339(time_string)
        .ok()
        .map(SystemTime::from)
}

impl DriveItem {
    pub fn kind(&self) -> EntryKind {
        if self.folder.is_some() {
            EntryKind::Directory
        } else {
            EntryKind::File
        }
    }

    pub fn to_remote_entry(&self) -> Result<RemoteEntry, RemoteError> {
        let name = self
            .name
            .clone()
            .ok_or_else(|| RemoteError::Protocol(format!("item {} has no name", self.id)))?;
        Ok(RemoteEntry {
            name,
            identity: RemoteIdentity::new(self.id.clone()),
            kind: self.kind(),
        })
    }

    pub fn to_remote_metadata(&self) -> RemoteMetadata {
        let modified = self
            .last_modified
            .as_deref()
            .and_then(parse_time_string)
            .unwrap_or(UNIX_EPOCH);
        RemoteMetadata {
            size: self.size.unwrap_or(0),
            modified,
            kind: self.kind(),
        }
    }
}

impl DriveQuota {
    pub fn to_quota(&self) -> Quota {
        Quota {
            total: self.total.unwrap_or(0),
            remaining: self.remaining.unwrap_or(0),
        }
    }
}
