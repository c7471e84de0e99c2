use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOp {
    Write,
    Delete,
}

impl fmt::Display for FileOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileOp::Write => f.write_str("write"),
            FileOp::Delete => f.write_str("delete"),
        }
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to connect to app {scope}: {reason}")]
    Connection { scope: u32, reason: String },
    #[error("storage is unavailable: {0}")]
    Unavailable(String),
    #[error("failed to read {name}: {reason}")]
    Read { name: String, reason: String },
    #[error("{op} of {name} was rejected by the backend: {reason}")]
    Rejected {
        name: String,
        op: FileOp,
        reason: String,
    },
    #[error("{op} of {name} failed: {reason}")]
    Transfer {
        name: String,
        op: FileOp,
        reason: String,
    },
    #[error("local I/O error on {}: {source}", path.display())]
    LocalIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl StorageError {
    pub fn local_io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        StorageError::LocalIo {
            path: path.into(),
            source,
        }
    }

    pub fn read(name: &str, reason: impl Into<String>) -> Self {
        StorageError::Read {
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    pub fn rejected(name: &str, op: FileOp, reason: impl Into<String>) -> Self {
        StorageError::Rejected {
            name: name.to_string(),
            op,
            reason: reason.into(),
        }
    }

    /// Backend refusals (quota, permissions) rather than broken transport.
    pub fn is_soft(&self) -> bool {
        matches!(self, StorageError::Rejected { .. })
    }
}
