//! Remote storage gateway.
//!
//! A [`StorageConnector`] opens a session for one application scope and
//! hands back a [`StorageBackend`]. [`RemoteStorage`] wraps that session and
//! is the only way to obtain [`RemoteFile`] handles, so every file operation
//! runs against a connected scope.

mod error;
mod file;
mod http;
mod local;
#[cfg(test)]
pub(crate) mod memory;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

pub use self::error::{FileOp, StorageError};
pub use self::file::{FileMeta, RemoteFile};
pub use self::http::{HttpBackend, HttpConnector};
pub use self::local::{LocalBackend, LocalConnector};

/// Largest object a single read may return.
pub const MAX_READ_BYTES: u64 = 100 * 1024 * 1024;

pub type BackendHandle = Arc<dyn StorageBackend>;

#[async_trait]
pub trait StorageBackend: Send + Sync {
    fn scope(&self) -> ScopeId;

    fn is_connected(&self) -> bool;

    async fn list(&self) -> Result<Vec<FileMeta>, StorageError>;

    /// Metadata for one name; a missing object is reported with
    /// `exists == false`, not as an error.
    async fn stat(&self, name: &str) -> Result<FileMeta, StorageError>;

    async fn quota(&self) -> Result<Quota, StorageError>;

    async fn read(&self, name: &str) -> Result<Vec<u8>, StorageError>;

    async fn write(&self, name: &str, data: Vec<u8>) -> Result<(), StorageError>;

    async fn delete(&self, name: &str) -> Result<(), StorageError>;
}

#[async_trait]
pub trait StorageConnector: Send + Sync {
    async fn connect(&self, scope: ScopeId) -> Result<BackendHandle, StorageError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ScopeId(u32);

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScopeIdError {
    #[error("Please enter an App ID.")]
    Missing,
    #[error("Please make sure the App ID you entered is valid.")]
    Invalid(String),
}

impl ScopeId {
    pub const fn new(app_id: u32) -> Self {
        Self(app_id)
    }

    pub fn app_id(self) -> u32 {
        self.0
    }
}

impl FromStr for ScopeId {
    type Err = ScopeIdError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(ScopeIdError::Missing);
        }
        trimmed
            .parse::<u32>()
            .map(Self)
            .map_err(|_| ScopeIdError::Invalid(trimmed.to_string()))
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Quota {
    pub total_bytes: u64,
    pub available_bytes: u64,
}

impl Quota {
    pub fn used_bytes(&self) -> u64 {
        self.total_bytes.saturating_sub(self.available_bytes)
    }
}

impl fmt::Display for Quota {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} bytes used", self.used_bytes(), self.total_bytes)
    }
}

/// A connected application scope.
#[derive(Clone)]
pub struct RemoteStorage {
    backend: BackendHandle,
}

impl RemoteStorage {
    pub async fn connect(
        connector: &dyn StorageConnector,
        scope: ScopeId,
    ) -> Result<Self, StorageError> {
        let backend = connector.connect(scope).await?;
        info!(scope = %scope, "connected to remote storage");
        Ok(Self { backend })
    }

    pub fn from_backend(backend: BackendHandle) -> Self {
        Self { backend }
    }

    pub fn scope(&self) -> ScopeId {
        self.backend.scope()
    }

    pub fn is_connected(&self) -> bool {
        self.backend.is_connected()
    }

    pub async fn list_files(&self) -> Result<Vec<RemoteFile>, StorageError> {
        self.ensure_connected()?;
        let metas = self.backend.list().await?;
        debug!(scope = %self.scope(), files = metas.len(), "listed remote files");
        Ok(metas
            .into_iter()
            .map(|meta| RemoteFile::new(meta, Arc::clone(&self.backend)))
            .collect())
    }

    /// Handle for `name` without touching the backend. The object does not
    /// have to exist yet; call [`RemoteFile::stat`] for its current state.
    pub fn get_file(&self, name: &str) -> RemoteFile {
        RemoteFile::new(FileMeta::unqueried(name), Arc::clone(&self.backend))
    }

    pub async fn get_quota(&self) -> Result<Quota, StorageError> {
        self.ensure_connected()?;
        self.backend.quota().await
    }

    fn ensure_connected(&self) -> Result<(), StorageError> {
        if self.backend.is_connected() {
            Ok(())
        } else {
            Err(StorageError::Unavailable(format!(
                "session for app {} was lost",
                self.scope()
            )))
        }
    }
}

impl fmt::Debug for RemoteStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteStorage")
            .field("scope", &self.scope())
            .field("connected", &self.is_connected())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::memory::{MemoryBackend, MemoryConnector};
    use super::*;

    #[test]
    fn parses_scope_ids_like_the_connect_form() {
        assert_eq!("480".parse::<ScopeId>(), Ok(ScopeId::new(480)));
        assert_eq!(" 480 ".parse::<ScopeId>(), Ok(ScopeId::new(480)));
        assert_eq!("".parse::<ScopeId>(), Err(ScopeIdError::Missing));
        assert_eq!("   ".parse::<ScopeId>(), Err(ScopeIdError::Missing));
        assert!(matches!(
            "-1".parse::<ScopeId>(),
            Err(ScopeIdError::Invalid(_))
        ));
        assert!(matches!(
            "4294967296".parse::<ScopeId>(),
            Err(ScopeIdError::Invalid(_))
        ));
    }

    #[test]
    fn quota_derives_used_bytes() {
        let quota = Quota {
            total_bytes: 1000,
            available_bytes: 250,
        };
        assert_eq!(quota.used_bytes(), 750);
        assert_eq!(quota.to_string(), "750/1000 bytes used");

        let overdrawn = Quota {
            total_bytes: 10,
            available_bytes: 20,
        };
        assert_eq!(overdrawn.used_bytes(), 0);
    }

    #[tokio::test]
    async fn get_quota_reports_total_minus_available() {
        let backend = Arc::new(
            MemoryBackend::new(ScopeId::new(7))
                .with_total_bytes(100)
                .with_file("a.sav", b"0123456789"),
        );
        let storage = RemoteStorage::connect(&MemoryConnector::new(backend), ScopeId::new(7))
            .await
            .unwrap();

        let quota = storage.get_quota().await.unwrap();
        assert_eq!(quota.total_bytes, 100);
        assert_eq!(quota.available_bytes, 90);
        assert_eq!(quota.used_bytes(), quota.total_bytes - quota.available_bytes);
    }

    #[tokio::test]
    async fn get_file_succeeds_for_missing_objects() {
        let backend = Arc::new(MemoryBackend::new(ScopeId::new(7)));
        let storage = RemoteStorage::from_backend(backend);

        let handle = storage.get_file("new.sav");
        assert_eq!(handle.name(), "new.sav");
        assert!(!handle.stat().await.unwrap().exists);
    }

    #[tokio::test]
    async fn calls_fail_once_the_session_is_lost() {
        let backend = Arc::new(MemoryBackend::new(ScopeId::new(7)).with_file("a.sav", b"x"));
        let storage = RemoteStorage::from_backend(backend.clone());
        backend.disconnect();

        assert!(!storage.is_connected());
        assert!(matches!(
            storage.list_files().await,
            Err(StorageError::Unavailable(_))
        ));
        assert!(matches!(
            storage.get_quota().await,
            Err(StorageError::Unavailable(_))
        ));
    }
}
