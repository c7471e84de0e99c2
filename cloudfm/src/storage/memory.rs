//! In-memory backend for tests, with scripted per-name failures.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use time::OffsetDateTime;

use super::{
    BackendHandle, FileMeta, FileOp, Quota, ScopeId, StorageBackend, StorageConnector,
    StorageError,
};

pub struct MemoryBackend {
    scope: ScopeId,
    total_bytes: u64,
    files: Mutex<BTreeMap<String, (Vec<u8>, OffsetDateTime)>>,
    failing_reads: HashSet<String>,
    rejected_writes: HashSet<String>,
    rejected_deletes: HashSet<String>,
    broken_deletes: HashSet<String>,
    connected: AtomicBool,
    quota_calls: AtomicUsize,
    list_calls: AtomicUsize,
    writes: Mutex<Vec<String>>,
}

impl MemoryBackend {
    pub fn new(scope: ScopeId) -> Self {
        Self {
            scope,
            total_bytes: 1024 * 1024,
            files: Mutex::new(BTreeMap::new()),
            failing_reads: HashSet::new(),
            rejected_writes: HashSet::new(),
            rejected_deletes: HashSet::new(),
            broken_deletes: HashSet::new(),
            connected: AtomicBool::new(true),
            quota_calls: AtomicUsize::new(0),
            list_calls: AtomicUsize::new(0),
            writes: Mutex::new(Vec::new()),
        }
    }

    pub fn with_total_bytes(mut self, total_bytes: u64) -> Self {
        self.total_bytes = total_bytes;
        self
    }

    pub fn with_file(self, name: &str, data: &[u8]) -> Self {
        self.files
            .lock()
            .unwrap()
            .insert(name.to_string(), (data.to_vec(), OffsetDateTime::now_utc()));
        self
    }

    pub fn fail_read(mut self, name: &str) -> Self {
        self.failing_reads.insert(name.to_string());
        self
    }

    pub fn reject_write(mut self, name: &str) -> Self {
        self.rejected_writes.insert(name.to_string());
        self
    }

    pub fn reject_delete(mut self, name: &str) -> Self {
        self.rejected_deletes.insert(name.to_string());
        self
    }

    /// Deletes of `name` fail with a transport error instead of a rejection.
    pub fn break_delete(mut self, name: &str) -> Self {
        self.broken_deletes.insert(name.to_string());
        self
    }

    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    pub fn remove_externally(&self, name: &str) {
        self.files.lock().unwrap().remove(name);
    }

    pub fn quota_calls(&self) -> usize {
        self.quota_calls.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Names in the order writes reached the backend.
    pub fn writes(&self) -> Vec<String> {
        self.writes.lock().unwrap().clone()
    }

    pub fn contents(&self, name: &str) -> Option<Vec<u8>> {
        self.files
            .lock()
            .unwrap()
            .get(name)
            .map(|(data, _)| data.clone())
    }

    pub fn names(&self) -> Vec<String> {
        self.files.lock().unwrap().keys().cloned().collect()
    }

    fn meta_for(name: &str, data: &[u8], modified: OffsetDateTime) -> FileMeta {
        FileMeta {
            name: name.to_string(),
            size: data.len() as u64,
            timestamp: Some(modified),
            is_persisted: true,
            exists: true,
        }
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    fn scope(&self) -> ScopeId {
        self.scope
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn list(&self) -> Result<Vec<FileMeta>, StorageError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .files
            .lock()
            .unwrap()
            .iter()
            .map(|(name, (data, modified))| Self::meta_for(name, data, *modified))
            .collect())
    }

    async fn stat(&self, name: &str) -> Result<FileMeta, StorageError> {
        Ok(self
            .files
            .lock()
            .unwrap()
            .get(name)
            .map(|(data, modified)| Self::meta_for(name, data, *modified))
            .unwrap_or_else(|| FileMeta::missing(name)))
    }

    async fn quota(&self) -> Result<Quota, StorageError> {
        self.quota_calls.fetch_add(1, Ordering::SeqCst);
        let used: u64 = self
            .files
            .lock()
            .unwrap()
            .values()
            .map(|(data, _)| data.len() as u64)
            .sum();
        Ok(Quota {
            total_bytes: self.total_bytes,
            available_bytes: self.total_bytes.saturating_sub(used),
        })
    }

    async fn read(&self, name: &str) -> Result<Vec<u8>, StorageError> {
        if self.failing_reads.contains(name) {
            return Err(StorageError::read(name, "scripted read failure"));
        }
        self.files
            .lock()
            .unwrap()
            .get(name)
            .map(|(data, _)| data.clone())
            .ok_or_else(|| StorageError::read(name, "file not found"))
    }

    async fn write(&self, name: &str, data: Vec<u8>) -> Result<(), StorageError> {
        self.writes.lock().unwrap().push(name.to_string());
        if self.rejected_writes.contains(name) {
            return Err(StorageError::rejected(name, FileOp::Write, "quota exceeded"));
        }
        self.files
            .lock()
            .unwrap()
            .insert(name.to_string(), (data, OffsetDateTime::now_utc()));
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<(), StorageError> {
        if self.rejected_deletes.contains(name) {
            return Err(StorageError::rejected(name, FileOp::Delete, "locked"));
        }
        if self.broken_deletes.contains(name) {
            return Err(StorageError::Transfer {
                name: name.to_string(),
                op: FileOp::Delete,
                reason: "connection reset".into(),
            });
        }
        self.files.lock().unwrap().remove(name);
        Ok(())
    }
}

pub struct MemoryConnector {
    backend: Arc<MemoryBackend>,
    refuse: bool,
}

impl MemoryConnector {
    pub fn new(backend: Arc<MemoryBackend>) -> Self {
        Self {
            backend,
            refuse: false,
        }
    }

    pub fn refusing(backend: Arc<MemoryBackend>) -> Self {
        Self {
            backend,
            refuse: true,
        }
    }
}

#[async_trait]
impl StorageConnector for MemoryConnector {
    async fn connect(&self, scope: ScopeId) -> Result<BackendHandle, StorageError> {
        if self.refuse || scope != self.backend.scope() {
            return Err(StorageError::Connection {
                scope: scope.app_id(),
                reason: "scripted refusal".into(),
            });
        }
        let handle: BackendHandle = self.backend.clone();
        Ok(handle)
    }
}
