//! Orchestration of the remote storage session.
//!
//! [`SyncController`] owns the connected [`RemoteStorage`], the displayed
//! file set and quota, and the upload queue. While an upload batch is
//! draining the queue lives inside the worker, and connect, refresh and
//! further uploads are refused with [`ControllerError::Busy`].

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::archive::{ArchiveError, ZipArchiveWriter};
use crate::prompt::Prompter;
use crate::storage::{
    Quota, RemoteFile, RemoteStorage, ScopeId, ScopeIdError, StorageConnector, StorageError,
};
use crate::sync::{
    ItemFailure, QueueError, TransferWorker, UploadBatch, UploadEntry, UploadProgress,
    UploadQueue, UploadReport, WorkerError,
};

const CONFIRM_MULTI_DOWNLOAD: &str = "Are you sure you want to download multiple files?";
const CONFIRM_DELETE: &str = "Are you sure you want to delete the selected files?";

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("Not connected")]
    NotConnected,
    #[error("an upload is in progress")]
    Busy,
    #[error("no upload is in progress")]
    NotUploading,
    #[error("no files selected")]
    EmptySelection,
    #[error(transparent)]
    Scope(#[from] ScopeIdError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error(transparent)]
    Worker(#[from] WorkerError),
    #[error("File download failed: {name}: {source}")]
    Download {
        name: String,
        #[source]
        source: StorageError,
    },
}

#[derive(Debug)]
pub enum DownloadOutcome {
    Cancelled,
    Saved { name: String, path: PathBuf },
    Archived(ArchiveReport),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveReport {
    pub path: PathBuf,
    pub archived: Vec<String>,
    pub failed: Vec<ItemFailure>,
}

impl ArchiveReport {
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn failed_names(&self) -> Vec<&str> {
        self.failed.iter().map(|f| f.name.as_str()).collect()
    }

    pub fn summary(&self) -> String {
        if self.all_succeeded() {
            "All Files Downloaded Successfully!".to_string()
        } else {
            let mut message = format!("{} files failed to download.", self.failed.len());
            for failure in &self.failed {
                message.push('\n');
                message.push_str(&failure.name);
            }
            message
        }
    }
}

#[derive(Debug)]
pub enum DeleteOutcome {
    Cancelled,
    Completed(DeleteReport),
}

#[derive(Debug, Default)]
pub struct DeleteReport {
    pub deleted: Vec<String>,
    pub failed: Vec<ItemFailure>,
    /// Set when the quota could not be re-read afterwards.
    pub quota_error: Option<StorageError>,
}

impl DeleteReport {
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug)]
pub struct UploadCompletion {
    pub report: UploadReport,
    /// Outcome of the refresh that follows every batch.
    pub refresh: Result<(), StorageError>,
}

enum UploadSlot {
    Idle(UploadQueue),
    Draining(UploadBatch),
}

pub struct SyncController {
    connector: Arc<dyn StorageConnector>,
    storage: Option<RemoteStorage>,
    files: Vec<RemoteFile>,
    quota: Option<Quota>,
    upload: UploadSlot,
    progress: Option<mpsc::UnboundedSender<UploadProgress>>,
}

impl SyncController {
    pub fn new(connector: Arc<dyn StorageConnector>) -> Self {
        Self {
            connector,
            storage: None,
            files: Vec::new(),
            quota: None,
            upload: UploadSlot::Idle(UploadQueue::default()),
            progress: None,
        }
    }

    /// Forward per-item progress of every later upload batch.
    pub fn set_progress_sink(&mut self, progress: mpsc::UnboundedSender<UploadProgress>) {
        self.progress = Some(progress);
    }

    pub fn storage(&self) -> Option<&RemoteStorage> {
        self.storage.as_ref()
    }

    pub fn scope(&self) -> Option<ScopeId> {
        self.storage.as_ref().map(RemoteStorage::scope)
    }

    pub fn files(&self) -> &[RemoteFile] {
        &self.files
    }

    pub fn quota(&self) -> Option<Quota> {
        self.quota
    }

    pub fn is_uploading(&self) -> bool {
        matches!(self.upload, UploadSlot::Draining(_))
    }

    /// Connects to the scope typed by the user and loads its listing. A
    /// successful connect replaces the previous session even if the first
    /// refresh fails.
    pub async fn connect(&mut self, scope_input: &str) -> Result<(), ControllerError> {
        self.ensure_idle()?;
        let scope: ScopeId = scope_input.parse()?;
        let storage = RemoteStorage::connect(self.connector.as_ref(), scope).await?;
        self.storage = Some(storage);
        self.files.clear();
        self.quota = None;
        self.refresh().await
    }

    /// Replaces the displayed files and quota. Both are fetched before
    /// anything is replaced, so a failure leaves the previous state intact.
    pub async fn refresh(&mut self) -> Result<(), ControllerError> {
        self.ensure_idle()?;
        self.reload().await
    }

    /// Resolves names against the displayed set, falling back to fresh
    /// handles for names that are not displayed. Repeated names are kept
    /// once, in first-seen order.
    pub fn select<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<RemoteFile>, ControllerError> {
        let storage = self.connected()?;
        let mut seen = HashSet::new();
        Ok(names
            .iter()
            .map(AsRef::as_ref)
            .filter(|name| seen.insert(*name))
            .map(|name| {
                self.files
                    .iter()
                    .find(|file| file.name() == name)
                    .cloned()
                    .unwrap_or_else(|| storage.get_file(name))
            })
            .collect())
    }

    pub async fn download(
        &self,
        selection: &[RemoteFile],
        prompter: &mut dyn Prompter,
    ) -> Result<DownloadOutcome, ControllerError> {
        let storage = self.connected()?;
        match selection {
            [] => Err(ControllerError::EmptySelection),
            [file] => download_single(file, prompter).await,
            files => {
                if !prompter.confirm(CONFIRM_MULTI_DOWNLOAD) {
                    return Ok(DownloadOutcome::Cancelled);
                }
                let suggested = format!("{}-Files.zip", storage.scope());
                let Some(path) = prompter.choose_save_path(&suggested) else {
                    return Ok(DownloadOutcome::Cancelled);
                };
                let report = download_archive(files, path).await?;
                Ok(DownloadOutcome::Archived(report))
            }
        }
    }

    /// Deletes each selected file; rejected files stay displayed. The quota
    /// is read again exactly once afterwards, whatever the outcome.
    pub async fn delete(
        &mut self,
        selection: &[RemoteFile],
        prompter: &mut dyn Prompter,
    ) -> Result<DeleteOutcome, ControllerError> {
        let storage = self.connected()?.clone();
        if selection.is_empty() {
            return Err(ControllerError::EmptySelection);
        }
        if !prompter.confirm(CONFIRM_DELETE) {
            return Ok(DeleteOutcome::Cancelled);
        }

        let mut report = DeleteReport::default();
        for file in selection {
            match file.delete().await {
                Ok(()) => {
                    self.files.retain(|shown| shown.name() != file.name());
                    report.deleted.push(file.name().to_string());
                }
                Err(err) => {
                    warn!(name = file.name(), soft = err.is_soft(), "delete failed: {err}");
                    report.failed.push(ItemFailure::new(file.name(), err));
                }
            }
        }

        match storage.get_quota().await {
            Ok(quota) => self.quota = Some(quota),
            Err(err) => {
                warn!("quota refresh after delete failed: {err}");
                report.quota_error = Some(err);
            }
        }
        info!(
            deleted = report.deleted.len(),
            failed = report.failed.len(),
            "delete finished"
        );
        Ok(DeleteOutcome::Completed(report))
    }

    /// Queues the files and starts the background worker. Returns `false`
    /// without touching any state when `local_paths` is empty.
    pub fn start_upload(&mut self, local_paths: &[PathBuf]) -> Result<bool, ControllerError> {
        if local_paths.is_empty() {
            return Ok(false);
        }
        self.ensure_idle()?;
        let storage = self.connected()?.clone();
        let entries = local_paths
            .iter()
            .map(|path| UploadEntry::from_local_path(path.as_path()))
            .collect::<Result<Vec<_>, _>>()?;

        let UploadSlot::Idle(mut queue) =
            std::mem::replace(&mut self.upload, UploadSlot::Idle(UploadQueue::default()))
        else {
            return Err(ControllerError::Busy);
        };
        for entry in entries {
            queue.enqueue(entry);
        }

        let mut worker = TransferWorker::new(storage);
        if let Some(progress) = &self.progress {
            worker = worker.with_progress(progress.clone());
        }
        info!(files = queue.len(), "upload batch started");
        self.upload = UploadSlot::Draining(worker.start(queue));
        Ok(true)
    }

    /// Waits for the running batch, then refreshes unconditionally.
    pub async fn finish_upload(&mut self) -> Result<UploadCompletion, ControllerError> {
        let UploadSlot::Draining(batch) =
            std::mem::replace(&mut self.upload, UploadSlot::Idle(UploadQueue::default()))
        else {
            return Err(ControllerError::NotUploading);
        };
        let (queue, report) = batch.wait().await?;
        self.upload = UploadSlot::Idle(queue);

        let refresh = match self.reload().await {
            Ok(()) => Ok(()),
            Err(ControllerError::Storage(err)) => Err(err),
            Err(other) => Err(StorageError::Unavailable(other.to_string())),
        };
        Ok(UploadCompletion { report, refresh })
    }

    /// [`start_upload`](Self::start_upload) followed by
    /// [`finish_upload`](Self::finish_upload).
    pub async fn upload(
        &mut self,
        local_paths: &[PathBuf],
    ) -> Result<Option<UploadCompletion>, ControllerError> {
        if !self.start_upload(local_paths)? {
            return Ok(None);
        }
        self.finish_upload().await.map(Some)
    }

    async fn reload(&mut self) -> Result<(), ControllerError> {
        let storage = self.connected()?;
        let files = storage.list_files().await?;
        let quota = storage.get_quota().await?;
        info!(scope = %storage.scope(), files = files.len(), %quota, "listing refreshed");
        self.files = files;
        self.quota = Some(quota);
        Ok(())
    }

    fn connected(&self) -> Result<&RemoteStorage, ControllerError> {
        self.storage.as_ref().ok_or(ControllerError::NotConnected)
    }

    fn ensure_idle(&self) -> Result<(), ControllerError> {
        if self.is_uploading() {
            Err(ControllerError::Busy)
        } else {
            Ok(())
        }
    }
}

async fn download_single(
    file: &RemoteFile,
    prompter: &mut dyn Prompter,
) -> Result<DownloadOutcome, ControllerError> {
    let Some(path) = prompter.choose_save_path(file.base_name()) else {
        return Ok(DownloadOutcome::Cancelled);
    };
    let failed = |source: StorageError| ControllerError::Download {
        name: file.name().to_string(),
        source,
    };
    let data = file.read_all_bytes().await.map_err(failed)?;
    create_parent_dirs(&path).await.map_err(failed)?;
    tokio::fs::write(&path, data)
        .await
        .map_err(|err| failed(StorageError::local_io(&path, err)))?;
    info!(name = file.name(), path = %path.display(), "file downloaded");
    Ok(DownloadOutcome::Saved {
        name: file.name().to_string(),
        path,
    })
}

async fn download_archive(
    files: &[RemoteFile],
    path: PathBuf,
) -> Result<ArchiveReport, ControllerError> {
    create_parent_dirs(&path).await?;
    let mut archive = ZipArchiveWriter::create(&path)?;
    let mut report = ArchiveReport {
        path,
        archived: Vec::new(),
        failed: Vec::new(),
    };
    for file in files {
        let added = match file.read_all_bytes().await {
            Ok(data) => archive
                .add_entry(file.name(), &data)
                .map_err(|err| err.to_string()),
            Err(err) => Err(err.to_string()),
        };
        match added {
            Ok(()) => report.archived.push(file.name().to_string()),
            Err(reason) => {
                warn!(name = file.name(), "download failed: {reason}");
                report.failed.push(ItemFailure::new(file.name(), reason));
            }
        }
    }
    archive.close()?;
    info!(
        path = %report.path.display(),
        archived = report.archived.len(),
        failed = report.failed.len(),
        "archive written"
    );
    Ok(report)
}

async fn create_parent_dirs(path: &Path) -> Result<(), StorageError> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => tokio::fs::create_dir_all(parent)
            .await
            .map_err(|err| StorageError::local_io(parent, err)),
        _ => Ok(()),
    }
}

#[cfg(test)]
#[path = "controller_tests.rs"]
mod tests;
