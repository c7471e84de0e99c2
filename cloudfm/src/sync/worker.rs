//! Background drain of an [`UploadQueue`].
//!
//! [`TransferWorker::start`] takes ownership of the filled queue, drains it on
//! a spawned task and hands the emptied queue back together with the
//! [`UploadReport`] through a single completion channel. Nothing else can
//! touch the queue while the batch runs.

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::queue::UploadQueue;
use crate::storage::{RemoteStorage, StorageError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    pub name: String,
    pub reason: String,
}

impl ItemFailure {
    pub fn new(name: impl Into<String>, reason: impl ToString) -> Self {
        Self {
            name: name.into(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadReport {
    pub uploaded: Vec<String>,
    pub failed: Vec<ItemFailure>,
}

impl UploadReport {
    pub fn failed_names(&self) -> Vec<&str> {
        self.failed.iter().map(|f| f.name.as_str()).collect()
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadProgress {
    Started {
        remote_name: String,
        index: usize,
        total: usize,
    },
    Finished {
        remote_name: String,
        ok: bool,
    },
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("upload worker stopped before reporting")]
    Stopped,
}

pub struct TransferWorker {
    storage: RemoteStorage,
    progress: Option<mpsc::UnboundedSender<UploadProgress>>,
}

impl TransferWorker {
    pub fn new(storage: RemoteStorage) -> Self {
        Self {
            storage,
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: mpsc::UnboundedSender<UploadProgress>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn start(self, mut queue: UploadQueue) -> UploadBatch {
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let report = self.drain(&mut queue).await;
            if tx.send((queue, report)).is_err() {
                debug!("upload batch finished after its receiver was dropped");
            }
        });
        UploadBatch { rx }
    }

    /// Uploads every entry in FIFO order. A failing entry is recorded and the
    /// drain moves on.
    pub async fn drain(&self, queue: &mut UploadQueue) -> UploadReport {
        let total = queue.len();
        let mut report = UploadReport::default();
        let mut index = 0;
        while let Ok(entry) = queue.dequeue() {
            index += 1;
            self.emit(UploadProgress::Started {
                remote_name: entry.remote_name.clone(),
                index,
                total,
            });
            let file = self.storage.get_file(&entry.remote_name);
            let outcome = match tokio::fs::read(&entry.local_path).await {
                Ok(data) => file.write_all_bytes(data).await,
                Err(err) => Err(StorageError::local_io(&entry.local_path, err)),
            };
            let ok = outcome.is_ok();
            match outcome {
                Ok(()) => {
                    debug!(name = %entry.remote_name, "uploaded");
                    report.uploaded.push(entry.remote_name.clone());
                }
                Err(err) => {
                    warn!(name = %entry.remote_name, soft = err.is_soft(), "upload failed: {err}");
                    report.failed.push(ItemFailure::new(&entry.remote_name, err));
                }
            }
            self.emit(UploadProgress::Finished {
                remote_name: entry.remote_name,
                ok,
            });
        }
        info!(
            scope = %self.storage.scope(),
            uploaded = report.uploaded.len(),
            failed = report.failed.len(),
            "upload batch drained"
        );
        report
    }

    fn emit(&self, event: UploadProgress) {
        if let Some(progress) = &self.progress {
            let _ = progress.send(event);
        }
    }
}

/// A running upload batch; resolves exactly once.
pub struct UploadBatch {
    rx: oneshot::Receiver<(UploadQueue, UploadReport)>,
}

impl UploadBatch {
    pub async fn wait(self) -> Result<(UploadQueue, UploadReport), WorkerError> {
        self.rx.await.map_err(|_| WorkerError::Stopped)
    }
}
