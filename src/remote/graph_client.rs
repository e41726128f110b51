//! Remote drive client backed by the Microsoft Graph drive API

use crate::remote::http_client::HttpClient;
use crate::remote::models::{
    CreateFolderRequest, DriveItem, DriveItemCollection, DriveResource, MoveRequest, ParentReference,
};
use crate::remote::session::SessionProvider;
use crate::remote::{
    EntryKind, Quota, RemoteDriveClient, RemoteEntry, RemoteError, RemoteIdentity, RemoteMetadata, RemoteResult,
};
use async_trait::async_trait;
use log::{debug, info};
use reqwest::Method;
use std::sync::Arc;

/// Identity used for the drive root. Graph accepts `root` as an item id alias.
pub const ROOT_ITEM_ID: &str = "root";

pub struct GraphDriveClient {
    http_client: HttpClient,
    sessions: Arc<dyn SessionProvider>,
}

impl GraphDriveClient {
    pub fn new(base_url: &str, sessions: Arc<dyn SessionProvider>) -> Self {
        Self {
            http_client: HttpClient::new(base_url),
            sessions,
        }
    }

    /// Get authorization header from the injected session provider
    async fn auth_header(&self) -> RemoteResult<String> {
        Ok(self.sessions.session().await?.authorization_header())
    }

    fn item_url(id: &RemoteIdentity) -> String {
        format!("/me/drive/items/{}", urlencoding::encode(id.as_str()))
    }
}

#[async_trait]
impl RemoteDriveClient for GraphDriveClient {
    fn root(&self) -> RemoteIdentity {
        RemoteIdentity::new(ROOT_ITEM_ID)
    }

    async fn list_children(&self, id: &RemoteIdentity) -> RemoteResult<Vec<RemoteEntry>> {
        let auth_header = self.auth_header().await?;
        let mut url = format!("{}/children", Self::item_url(id));
        let mut entries = Vec::new();

        loop {
            let page: DriveItemCollection = self.http_client.get(&url, &auth_header).await?;
            for item in &page.value {
                entries.push(item.to_remote_entry()?);
            }
            match page.next_link {
                Some(next) => url = next,
                None => break,
            }
        }

        debug!("Listed {} children of {}", entries.len(), id);
        Ok(entries)
    }

    async fn get_metadata(&self, id: &RemoteIdentity) -> RemoteResult<RemoteMetadata> {
        let auth_header = self.auth_header().await?;
        let item: DriveItem = self.http_client.get(&Self::item_url(id), &auth_header).await?;
        Ok(item.to_remote_metadata())
    }

    async fn read_range(&self, id: &RemoteIdentity, offset: u64, length: u64) -> RemoteResult<Vec<u8>> {
        let auth_header = self.auth_header().await?;
        let url = format!("{}/content", Self::item_url(id));
        self.http_client
            .get_range(&url, offset, length, &auth_header)
            .await
    }

    async fn write_whole(&self, id: &RemoteIdentity, data: &[u8]) -> RemoteResult<()> {
        let auth_header = self.auth_header().await?;
        let url = format!("{}/content", Self::item_url(id));
        let item: DriveItem = self.http_client.put_bytes(&url, data, &auth_header).await?;
        info!("Uploaded {} bytes to {}", data.len(), item.id);
        Ok(())
    }

    async fn create(&self, parent: &RemoteIdentity, name: &str, kind: EntryKind) -> RemoteResult<RemoteIdentity> {
        let auth_header = self.auth_header().await?;
        let item: DriveItem = match kind {
            EntryKind::Directory => {
                let body = CreateFolderRequest {
                    name: name.to_string(),
                    folder: serde_json::Map::new(),
                    conflict_behavior: "fail".to_string(),
                };
                let url = format!("{}/children", Self::item_url(parent));
                self.http_client
                    .send_json(Method::POST, &url, &body, &auth_header)
                    .await?
            }
            EntryKind::File => {
                let url = format!(
                    "{}:/{}:/content?@microsoft.graph.conflictBehavior=fail",
                    Self::item_url(parent),
                    urlencoding::encode(name)
                );
                self.http_client.put_bytes(&url, &[], &auth_header).await?
            }
        };
        if item.id.is_empty() {
            return Err(RemoteError::Protocol(format!("created item {} has no id", name)));
        }
        info!("Created {:?} {} in {} as {}", kind, name, parent, item.id);
        Ok(RemoteIdentity::new(item.id))
    }

    async fn delete(&self, id: &RemoteIdentity) -> RemoteResult<()> {
        let auth_header = self.auth_header().await?;
        self.http_client.delete(&Self::item_url(id), &auth_header).await?;
        info!("Deleted {}", id);
        Ok(())
    }

    async fn move_entry(&self, id: &RemoteIdentity, new_parent: &RemoteIdentity, new_name: &str) -> RemoteResult<()> {
        let auth_header = self.auth_header().await?;
        let body = MoveRequest {
            name: new_name.to_string(),
            parent_reference: ParentReference {
                id: Some(new_parent.as_str().to_string()),
                path: None,
            },
        };
        let _item: DriveItem = self
            .http_client
            .send_json(Method::PATCH, &Self::item_url(id), &body, &auth_header)
            .await?;
        info!("Moved {} to {}/{}", id, new_parent, new_name);
        Ok(())
    }

    async fn quota(&self) -> RemoteResult<Quota> {
        let auth_header = self.auth_header().await?;
        let drive: DriveResource = self.http_client.get("/me/drive", &auth_header).await?;
        drive
            .quota
            .map(|q| q.to_quota())
            .ok_or_else(|| RemoteError::Protocol("drive resource has no quota".to_string()))
    }
}
