use async_trait::async_trait;
use clouddrive_fuse::remote::memory::MemoryDrive;
use clouddrive_fuse::remote::{
    EntryKind, Quota, RemoteDriveClient, RemoteEntry, RemoteError, RemoteIdentity, RemoteMetadata, RemoteResult,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Mock implementation of RemoteDriveClient for testing
///
/// Serves a real in-memory drive, counts calls per operation and can be told
/// to fail individual operations.
#[derive(Clone)]
pub struct MockDriveClient {
    drive: Arc<MemoryDrive>,
    should_fail_operations: Arc<Mutex<HashMap<String, RemoteError>>>,
    call_counter: Arc<Mutex<HashMap<String, usize>>>,
    operation_delays: Arc<Mutex<HashMap<String, Duration>>>,
}

impl MockDriveClient {
    pub fn new() -> Self {
        Self {
            drive: Arc::new(MemoryDrive::new()),
            should_fail_operations: Arc::new(Mutex::new(HashMap::new())),
            call_counter: Arc::new(Mutex::new(HashMap::new())),
            operation_delays: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// The backing drive, for seeding and inspecting content directly
    pub fn drive(&self) -> &MemoryDrive {
        &self.drive
    }

    /// Make specific operations fail with a network error
    pub fn make_operation_fail(&self, operation: &str) {
        self.make_operation_fail_with(operation, RemoteError::Network(format!("Mock {} failure", operation)));
    }

    /// Make specific operations fail with the given error
    pub fn make_operation_fail_with(&self, operation: &str, error: RemoteError) {
        let mut failures = self.should_fail_operations.lock().unwrap();
        failures.insert(operation.to_string(), error);
    }

    /// Make all operations succeed (clear failure list)
    pub fn clear_operation_failures(&self) {
        self.should_fail_operations.lock().unwrap().clear();
    }

    /// Make an operation wait before it runs
    pub fn delay_operation(&self, operation: &str, delay: Duration) {
        self.operation_delays
            .lock()
            .unwrap()
            .insert(operation.to_string(), delay);
    }

    /// Remove every configured delay
    pub fn clear_operation_delays(&self) {
        self.operation_delays.lock().unwrap().clear();
    }

    /// Get call count for a specific operation
    pub fn get_call_count(&self, operation: &str) -> usize {
        let counter = self.call_counter.lock().unwrap();
        counter.get(operation).copied().unwrap_or(0)
    }

    /// Reset call counters
    pub fn reset_call_counters(&self) {
        self.call_counter.lock().unwrap().clear();
    }

    /// Count the call, apply any delay and return the injected failure, if any
    async fn check_operation(&self, operation: &str) -> RemoteResult<()> {
        {
            let mut counter = self.call_counter.lock().unwrap();
            *counter.entry(operation.to_string()).or_insert(0) += 1;
        }
        let delay = self.operation_delays.lock().unwrap().get(operation).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match self.should_fail_operations.lock().unwrap().get(operation) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RemoteDriveClient for MockDriveClient {
    fn root(&self) -> RemoteIdentity {
        self.drive.root()
    }

    async fn list_children(&self, id: &RemoteIdentity) -> RemoteResult<Vec<RemoteEntry>> {
        self.check_operation("list_children").await?;
        self.drive.list_children(id).await
    }

    async fn get_metadata(&self, id: &RemoteIdentity) -> RemoteResult<RemoteMetadata> {
        self.check_operation("get_metadata").await?;
        self.drive.get_metadata(id).await
    }

    async fn read_range(&self, id: &RemoteIdentity, offset: u64, length: u64) -> RemoteResult<Vec<u8>> {
        self.check_operation("read_range").await?;
        self.drive.read_range(id, offset, length).await
    }

    async fn write_whole(&self, id: &RemoteIdentity, data: &[u8]) -> RemoteResult<()> {
        self.check_operation("write_whole").await?;
        self.drive.write_whole(id, data).await
    }

    async fn create(&self, parent: &RemoteIdentity, name: &str, kind: EntryKind) -> RemoteResult<RemoteIdentity> {
        self.check_operation("create").await?;
        self.drive.create(parent, name, kind).await
    }

    async fn delete(&self, id: &RemoteIdentity) -> RemoteResult<()> {
        self.check_operation("delete").await?;
        self.drive.delete(id).await
    }

    async fn move_entry(&self, id: &RemoteIdentity, new_parent: &RemoteIdentity, new_name: &str) -> RemoteResult<()> {
        self.check_operation("move_entry").await?;
        self.drive.move_entry(id, new_parent, new_name).await
    }

    async fn quota(&self) -> RemoteResult<Quota> {
        self.check_operation("quota").await?;
        self.drive.quota().await
    }
}
