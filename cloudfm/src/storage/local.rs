//! Directory-backed storage.
//!
//! Each application scope is a directory `<root>/<app id>/` holding one
//! regular file per remote object. Writes go through a staging file under
//! `<root>/.partial/` and are renamed into place, and a fixed byte budget per
//! scope stands in for the vendor quota.

use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::debug;

use super::{
    BackendHandle, FileMeta, FileOp, MAX_READ_BYTES, Quota, ScopeId, StorageBackend,
    StorageConnector, StorageError,
};

const STAGING_DIR: &str = ".partial";

#[derive(Debug, Error)]
pub enum NameError {
    #[error("remote name is empty")]
    Empty,
    #[error("remote name must be a single path component")]
    UnsupportedComponent,
}

/// Maps a remote name to its file inside the scope directory.
pub fn scope_path_for(scope_dir: &Path, name: &str) -> Result<PathBuf, NameError> {
    if name.is_empty() {
        return Err(NameError::Empty);
    }
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(part)), None) => Ok(scope_dir.join(part)),
        _ => Err(NameError::UnsupportedComponent),
    }
}

#[derive(Debug, Clone)]
pub struct LocalConnector {
    root: PathBuf,
    quota_bytes: u64,
}

impl LocalConnector {
    pub fn new(root: impl Into<PathBuf>, quota_bytes: u64) -> Self {
        Self {
            root: root.into(),
            quota_bytes,
        }
    }
}

#[async_trait]
impl StorageConnector for LocalConnector {
    async fn connect(&self, scope: ScopeId) -> Result<BackendHandle, StorageError> {
        let dir = self.root.join(scope.to_string());
        let staging = self.root.join(STAGING_DIR);
        for path in [&dir, &staging] {
            tokio::fs::create_dir_all(path)
                .await
                .map_err(|err| StorageError::Connection {
                    scope: scope.app_id(),
                    reason: format!("cannot prepare {}: {err}", path.display()),
                })?;
        }
        debug!(scope = %scope, dir = %dir.display(), "local storage opened");
        let backend: BackendHandle = Arc::new(LocalBackend {
            scope,
            dir,
            staging,
            quota_bytes: self.quota_bytes,
        });
        Ok(backend)
    }
}

pub struct LocalBackend {
    scope: ScopeId,
    dir: PathBuf,
    staging: PathBuf,
    quota_bytes: u64,
}

impl LocalBackend {
    async fn entries(&self) -> io::Result<Vec<FileMeta>> {
        let mut entries = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = dir.next_entry().await? {
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            entries.push(meta_from_fs(name, &metadata));
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn used_bytes(&self) -> io::Result<u64> {
        Ok(self.entries().await?.iter().map(|meta| meta.size).sum())
    }

    fn unavailable(&self, err: io::Error) -> StorageError {
        StorageError::Unavailable(format!("{}: {err}", self.dir.display()))
    }
}

fn meta_from_fs(name: String, metadata: &std::fs::Metadata) -> FileMeta {
    FileMeta {
        name,
        size: metadata.len(),
        timestamp: metadata.modified().ok().map(OffsetDateTime::from),
        is_persisted: true,
        exists: true,
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    fn scope(&self) -> ScopeId {
        self.scope
    }

    fn is_connected(&self) -> bool {
        self.dir.is_dir()
    }

    async fn list(&self) -> Result<Vec<FileMeta>, StorageError> {
        self.entries().await.map_err(|err| self.unavailable(err))
    }

    async fn stat(&self, name: &str) -> Result<FileMeta, StorageError> {
        let Ok(path) = scope_path_for(&self.dir, name) else {
            return Ok(FileMeta::missing(name));
        };
        match tokio::fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => Ok(meta_from_fs(name.to_string(), &metadata)),
            Ok(_) => Ok(FileMeta::missing(name)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(FileMeta::missing(name)),
            Err(err) => Err(self.unavailable(err)),
        }
    }

    async fn quota(&self) -> Result<Quota, StorageError> {
        let used = self.used_bytes().await.map_err(|err| self.unavailable(err))?;
        Ok(Quota {
            total_bytes: self.quota_bytes,
            available_bytes: self.quota_bytes.saturating_sub(used),
        })
    }

    async fn read(&self, name: &str) -> Result<Vec<u8>, StorageError> {
        let path = scope_path_for(&self.dir, name)
            .map_err(|err| StorageError::read(name, err.to_string()))?;
        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|err| StorageError::read(name, err.to_string()))?;
        if metadata.len() > MAX_READ_BYTES {
            return Err(StorageError::read(
                name,
                format!("size {} exceeds the single read limit", metadata.len()),
            ));
        }
        tokio::fs::read(&path)
            .await
            .map_err(|err| StorageError::read(name, err.to_string()))
    }

    async fn write(&self, name: &str, data: Vec<u8>) -> Result<(), StorageError> {
        let path = scope_path_for(&self.dir, name)
            .map_err(|err| StorageError::rejected(name, FileOp::Write, err.to_string()))?;
        let entries = self.entries().await.map_err(|err| self.unavailable(err))?;
        let used_by_others: u64 = entries
            .iter()
            .filter(|meta| meta.name != name)
            .map(|meta| meta.size)
            .sum();
        let needed = used_by_others.saturating_add(data.len() as u64);
        if needed > self.quota_bytes {
            return Err(StorageError::rejected(
                name,
                FileOp::Write,
                format!("quota exceeded ({needed} of {} bytes)", self.quota_bytes),
            ));
        }

        let partial = self.staging.join(format!("{}-{name}.partial", self.scope));
        let transfer_error = |err: io::Error| StorageError::Transfer {
            name: name.to_string(),
            op: FileOp::Write,
            reason: err.to_string(),
        };
        let staged = match tokio::fs::write(&partial, &data).await {
            Ok(()) => tokio::fs::rename(&partial, &path).await,
            Err(err) => Err(err),
        };
        if let Err(err) = staged {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(transfer_error(err));
        }
        debug!(scope = %self.scope, name, bytes = data.len(), "stored file");
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<(), StorageError> {
        let path = scope_path_for(&self.dir, name)
            .map_err(|err| StorageError::rejected(name, FileOp::Delete, err.to_string()))?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::PermissionDenied => Err(
                StorageError::rejected(name, FileOp::Delete, err.to_string()),
            ),
            Err(err) => Err(StorageError::Transfer {
                name: name.to_string(),
                op: FileOp::Delete,
                reason: err.to_string(),
            }),
        }
    }
}
