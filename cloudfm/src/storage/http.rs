use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use cloudfm_core::{ApiError, ApiErrorClass, CloudClient, FileEntry};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{debug, warn};

use super::{
    BackendHandle, FileMeta, FileOp, Quota, ScopeId, StorageBackend, StorageConnector,
    StorageError,
};

const DEFAULT_PAGE_SIZE: u32 = 100;

/// Opens sessions against the storage REST API.
#[derive(Clone)]
pub struct HttpConnector {
    client: CloudClient,
    page_size: u32,
}

impl HttpConnector {
    pub fn new(client: CloudClient) -> Self {
        Self {
            client,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }
}

#[async_trait]
impl StorageConnector for HttpConnector {
    async fn connect(&self, scope: ScopeId) -> Result<BackendHandle, StorageError> {
        let info = self
            .client
            .get_scope(scope.app_id())
            .await
            .map_err(|err| StorageError::Connection {
                scope: scope.app_id(),
                reason: err.to_string(),
            })?;
        debug!(
            scope = %scope,
            total_bytes = info.total_bytes,
            available_bytes = info.available_bytes,
            "storage session established"
        );
        let backend: BackendHandle = Arc::new(HttpBackend {
            client: self.client.clone(),
            scope,
            page_size: self.page_size,
            connected: AtomicBool::new(true),
        });
        Ok(backend)
    }
}

pub struct HttpBackend {
    client: CloudClient,
    scope: ScopeId,
    page_size: u32,
    connected: AtomicBool,
}

impl HttpBackend {
    /// Any auth failure ends the session; later calls need a reconnect.
    fn observe(&self, err: &ApiError) {
        if err.classification() == Some(ApiErrorClass::Auth)
            && self.connected.swap(false, Ordering::SeqCst)
        {
            warn!(scope = %self.scope, "storage session lost: {err}");
        }
    }

    fn unavailable(&self, err: ApiError) -> StorageError {
        self.observe(&err);
        StorageError::Unavailable(err.to_string())
    }

    fn file_error(&self, name: &str, op: FileOp, err: ApiError) -> StorageError {
        self.observe(&err);
        match err.classification() {
            Some(ApiErrorClass::Auth) => StorageError::Unavailable(err.to_string()),
            _ if err.is_rejection() => StorageError::rejected(name, op, err.to_string()),
            _ => StorageError::Transfer {
                name: name.to_string(),
                op,
                reason: err.to_string(),
            },
        }
    }
}

#[async_trait]
impl StorageBackend for HttpBackend {
    fn scope(&self) -> ScopeId {
        self.scope
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn list(&self) -> Result<Vec<FileMeta>, StorageError> {
        let entries = self
            .client
            .list_files_all(self.scope.app_id(), self.page_size)
            .await
            .map_err(|err| self.unavailable(err))?;
        Ok(entries.into_iter().map(meta_from_entry).collect())
    }

    async fn stat(&self, name: &str) -> Result<FileMeta, StorageError> {
        match self.client.get_file(self.scope.app_id(), name).await {
            Ok(entry) => Ok(meta_from_entry(entry)),
            Err(err) if err.is_not_found() => Ok(FileMeta::missing(name)),
            Err(err) => Err(self.unavailable(err)),
        }
    }

    async fn quota(&self) -> Result<Quota, StorageError> {
        let info = self
            .client
            .get_scope(self.scope.app_id())
            .await
            .map_err(|err| self.unavailable(err))?;
        Ok(Quota {
            total_bytes: info.total_bytes,
            available_bytes: info.available_bytes,
        })
    }

    async fn read(&self, name: &str) -> Result<Vec<u8>, StorageError> {
        self.client
            .download(self.scope.app_id(), name)
            .await
            .map_err(|err| {
                self.observe(&err);
                if err.classification() == Some(ApiErrorClass::Auth) {
                    StorageError::Unavailable(err.to_string())
                } else {
                    StorageError::read(name, err.to_string())
                }
            })
    }

    async fn write(&self, name: &str, data: Vec<u8>) -> Result<(), StorageError> {
        self.client
            .upload(self.scope.app_id(), name, data)
            .await
            .map_err(|err| self.file_error(name, FileOp::Write, err))
    }

    async fn delete(&self, name: &str) -> Result<(), StorageError> {
        match self.client.delete_file(self.scope.app_id(), name).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_not_found() => {
                debug!(scope = %self.scope, name, "delete of absent file");
                Ok(())
            }
            Err(err) => Err(self.file_error(name, FileOp::Delete, err)),
        }
    }
}

fn meta_from_entry(entry: FileEntry) -> FileMeta {
    let timestamp = parse_modified(entry.modified.as_deref());
    FileMeta {
        name: entry.name,
        size: entry.size,
        timestamp,
        is_persisted: entry.persisted,
        exists: entry.exists,
    }
}

fn parse_modified(value: Option<&str>) -> Option<OffsetDateTime> {
    let value = value?;
    match OffsetDateTime::parse(value, &Rfc3339) {
        Ok(parsed) => Some(parsed),
        Err(err) => {
            debug!(value, "ignoring unparseable timestamp: {err}");
            None
        }
    }
}
