use std::path::{Path, PathBuf};

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};

use crate::entry::AuditEntry;

#[derive(Debug, thiserror::Error)]
pub enum AuditWriteError {
    #[error("cannot create audit log directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot open audit log {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot serialize audit entry: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("audit log {path} I/O failed: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Buffered, append-only JSON-lines file. Entries become durable on
/// [`flush`](Self::flush).
pub struct AuditWriter {
    path: PathBuf,
    out: BufWriter<File>,
    lines: u64,
}

impl AuditWriter {
    pub async fn new(path: impl AsRef<Path>) -> Result<Self, AuditWriteError> {
        let path = path.as_ref().to_path_buf();

        if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|source| AuditWriteError::CreateDir {
                    path: dir.to_path_buf(),
                    source,
                })?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|source| AuditWriteError::Open {
                path: path.clone(),
                source,
            })?;

        Ok(Self {
            path,
            out: BufWriter::new(file),
            lines: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Entries written through this writer since it was opened.
    pub fn lines_written(&self) -> u64 {
        self.lines
    }

    pub async fn write(&mut self, entry: &AuditEntry) -> Result<(), AuditWriteError> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');
        self.out.write_all(&line).await.map_err(|source| self.io_error(source))?;
        self.lines += 1;
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<(), AuditWriteError> {
        self.out.flush().await.map_err(|source| self.io_error(source))
    }

    fn io_error(&self, source: std::io::Error) -> AuditWriteError {
        AuditWriteError::Io {
            path: self.path.clone(),
            source,
        }
    }
}
