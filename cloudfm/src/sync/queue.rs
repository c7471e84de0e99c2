use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadEntry {
    pub remote_name: String,
    pub local_path: PathBuf,
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("upload queue is empty")]
    Empty,
    #[error("path has no file name: {}", .0.display())]
    NoFileName(PathBuf),
    #[error("cannot resolve {}: {source}", path.display())]
    Resolve {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl UploadEntry {
    /// Remote name is the lower-cased base name; the local path is made
    /// absolute against the current directory.
    pub fn from_local_path(path: &Path) -> Result<Self, QueueError> {
        let remote_name =
            remote_name_for(path).ok_or_else(|| QueueError::NoFileName(path.to_path_buf()))?;
        let local_path = std::path::absolute(path).map_err(|source| QueueError::Resolve {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            remote_name,
            local_path,
        })
    }
}

pub fn remote_name_for(path: &Path) -> Option<String> {
    path.file_name()
        .map(|name| name.to_string_lossy().to_lowercase())
        .filter(|name| !name.is_empty())
}

/// FIFO of pending uploads. Entries are never deduplicated.
#[derive(Debug, Default)]
pub struct UploadQueue {
    inner: VecDeque<UploadEntry>,
}

impl UploadQueue {
    pub fn enqueue(&mut self, entry: UploadEntry) {
        self.inner.push_back(entry);
    }

    pub fn dequeue(&mut self) -> Result<UploadEntry, QueueError> {
        self.inner.pop_front().ok_or(QueueError::Empty)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &UploadEntry> {
        self.inner.iter()
    }
}
