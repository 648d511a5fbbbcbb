//! Durable storage for finished export artifacts
//!
//! Chunks are appended to a `.part` file as the renderer produces them and
//! the file is fsynced and renamed into place on finish, so a crash mid-write
//! never leaves a half-artifact under the final name.

use crate::error::{Error, ExportError, Result};
use crate::types::{ExportFormat, TaskId};
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;

/// A finished, durably stored artifact
#[derive(Clone, Debug)]
pub struct StoredResult {
    /// Final artifact path
    pub path: PathBuf,
    /// Artifact size in bytes
    pub size_bytes: u64,
}

/// Writes export artifacts under a configured output directory
#[derive(Clone)]
pub struct ResultStore {
    output_dir: PathBuf,
}

impl ResultStore {
    /// Create a store rooted at `output_dir`, creating the directory if needed
    pub async fn new(output_dir: impl Into<PathBuf>) -> Result<Self> {
        let output_dir = output_dir.into();
        fs::create_dir_all(&output_dir)
            .await
            .map_err(|e| storage_error("create output directory", &output_dir, &e))?;
        Ok(Self { output_dir })
    }

    /// Start writing the artifact for one task
    pub async fn create(&self, task_id: &TaskId, format: ExportFormat) -> Result<ResultWriter> {
        let final_path = self.artifact_path(task_id, format);
        let part_path = final_path.with_extension(format!("{}.part", format.file_extension()));

        let file = File::create(&part_path)
            .await
            .map_err(|e| storage_error("create artifact file", &part_path, &e))?;

        Ok(ResultWriter {
            file,
            part_path,
            final_path,
            bytes_written: 0,
        })
    }

    /// Path where the finished artifact for a task lives
    pub fn artifact_path(&self, task_id: &TaskId, format: ExportFormat) -> PathBuf {
        self.output_dir
            .join(format!("{}.{}", task_id, format.file_extension()))
    }

    /// Remove a stored artifact; missing files are not an error
    pub async fn remove(&self, task_id: &TaskId, format: ExportFormat) -> Result<()> {
        let path = self.artifact_path(task_id, format);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(storage_error("remove artifact", &path, &e)),
        }
    }
}

/// In-progress artifact write for one export
pub struct ResultWriter {
    file: File,
    part_path: PathBuf,
    final_path: PathBuf,
    bytes_written: u64,
}

impl ResultWriter {
    /// Append one chunk
    pub async fn write_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        self.file
            .write_all(chunk)
            .await
            .map_err(|e| storage_error("write artifact chunk", &self.part_path, &e))?;
        self.bytes_written += chunk.len() as u64;
        Ok(())
    }

    /// Bytes appended so far
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Flush, fsync, and move the artifact to its final name
    pub async fn finish(mut self) -> Result<StoredResult> {
        self.file
            .flush()
            .await
            .map_err(|e| storage_error("flush artifact", &self.part_path, &e))?;
        self.file
            .sync_all()
            .await
            .map_err(|e| storage_error("sync artifact", &self.part_path, &e))?;
        drop(self.file);

        fs::rename(&self.part_path, &self.final_path)
            .await
            .map_err(|e| storage_error("finalize artifact", &self.final_path, &e))?;

        tracing::debug!(
            path = %self.final_path.display(),
            size_bytes = self.bytes_written,
            "export artifact stored"
        );
        Ok(StoredResult {
            path: self.final_path,
            size_bytes: self.bytes_written,
        })
    }

    /// Abandon the write and remove the partial file
    pub async fn discard(self) -> Result<()> {
        drop(self.file);
        match fs::remove_file(&self.part_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(storage_error("discard partial artifact", &self.part_path, &e)),
        }
    }
}

fn storage_error(action: &str, path: &Path, e: &std::io::Error) -> Error {
    Error::Export(ExportError::StorageFailed {
        reason: format!("{action} {}: {e}", path.display()),
    })
}
