use std::fmt;
use std::path::Path;

use serde::Serialize;
use time::OffsetDateTime;

use super::{BackendHandle, MAX_READ_BYTES, StorageError};

/// Snapshot of one remote object, valid at the moment it was queried.
///
/// `exists` and `is_persisted` are passed through from the backend as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileMeta {
    pub name: String,
    pub size: u64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub timestamp: Option<OffsetDateTime>,
    pub is_persisted: bool,
    pub exists: bool,
}

impl FileMeta {
    pub(crate) fn unqueried(name: &str) -> Self {
        Self {
            name: name.to_string(),
            size: 0,
            timestamp: None,
            is_persisted: false,
            exists: false,
        }
    }

    pub(crate) fn missing(name: &str) -> Self {
        Self::unqueried(name)
    }
}

#[derive(Clone)]
pub struct RemoteFile {
    meta: FileMeta,
    backend: BackendHandle,
}

impl RemoteFile {
    pub(crate) fn new(meta: FileMeta, backend: BackendHandle) -> Self {
        Self { meta, backend }
    }

    pub fn name(&self) -> &str {
        &self.meta.name
    }

    /// Base name of the object, used as the default local file name.
    pub fn base_name(&self) -> &str {
        Path::new(&self.meta.name)
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or(&self.meta.name)
    }

    pub fn size(&self) -> u64 {
        self.meta.size
    }

    pub fn timestamp(&self) -> Option<OffsetDateTime> {
        self.meta.timestamp
    }

    pub fn is_persisted(&self) -> bool {
        self.meta.is_persisted
    }

    pub fn exists(&self) -> bool {
        self.meta.exists
    }

    pub fn meta(&self) -> &FileMeta {
        &self.meta
    }

    pub async fn stat(&self) -> Result<FileMeta, StorageError> {
        self.ensure_connected()?;
        self.backend.stat(&self.meta.name).await
    }

    pub async fn read_all_bytes(&self) -> Result<Vec<u8>, StorageError> {
        self.ensure_connected()?;
        if self.meta.size > MAX_READ_BYTES {
            return Err(StorageError::read(
                &self.meta.name,
                format!("size {} exceeds the single read limit", self.meta.size),
            ));
        }
        let data = self.backend.read(&self.meta.name).await?;
        if data.len() as u64 > MAX_READ_BYTES {
            return Err(StorageError::read(
                &self.meta.name,
                format!("size {} exceeds the single read limit", data.len()),
            ));
        }
        Ok(data)
    }

    pub async fn write_all_bytes(&self, data: Vec<u8>) -> Result<(), StorageError> {
        self.ensure_connected()?;
        self.backend.write(&self.meta.name, data).await
    }

    pub async fn delete(&self) -> Result<(), StorageError> {
        self.ensure_connected()?;
        self.backend.delete(&self.meta.name).await
    }

    fn ensure_connected(&self) -> Result<(), StorageError> {
        if self.backend.is_connected() {
            Ok(())
        } else {
            Err(StorageError::Unavailable(format!(
                "session for app {} was lost",
                self.backend.scope()
            )))
        }
    }
}

impl fmt::Debug for RemoteFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteFile")
            .field("scope", &self.backend.scope())
            .field("meta", &self.meta)
            .finish()
    }
}
