use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use zip::CompressionMethod;
use zip::ZipWriter;
use zip::result::ZipError;
use zip::write::SimpleFileOptions;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("cannot create archive {}: {source}", path.display())]
    Create {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot add {name} to archive: {reason}")]
    Entry { name: String, reason: String },
    #[error("cannot finish archive: {0}")]
    Finish(#[from] ZipError),
}

/// Flat zip archive: one entry per remote file, named after it.
pub struct ZipArchiveWriter {
    inner: ZipWriter<File>,
}

impl ZipArchiveWriter {
    pub fn create(path: &Path) -> Result<Self, ArchiveError> {
        let file = File::create(path).map_err(|source| ArchiveError::Create {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            inner: ZipWriter::new(file),
        })
    }

    pub fn add_entry(&mut self, name: &str, data: &[u8]) -> Result<(), ArchiveError> {
        let options =
            SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        let entry_error = |reason: String| ArchiveError::Entry {
            name: name.to_string(),
            reason,
        };
        self.inner
            .start_file(name, options)
            .map_err(|err| entry_error(err.to_string()))?;
        self.inner
            .write_all(data)
            .map_err(|err| entry_error(err.to_string()))?;
        Ok(())
    }

    pub fn close(self) -> Result<(), ArchiveError> {
        let mut file = self.inner.finish()?;
        file.flush().map_err(ZipError::Io)?;
        Ok(())
    }
}
