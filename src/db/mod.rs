//! Database layer for doc-export
//!
//! Handles SQLite persistence for export tasks.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`] — Database lifecycle, schema migrations
//! - [`tasks`] — Export task CRUD and guarded status transitions

use crate::error::{Error, Result};
use crate::types::{
    ContentSpec, ExportFormat, ExportOptions, TaskId, TaskInfo, TaskSnapshot, TaskStatus,
};
use sqlx::{FromRow, sqlite::SqlitePool};

mod migrations;
mod tasks;

/// New export task to be inserted into the database
#[derive(Debug, Clone)]
pub struct NewTask {
    /// Pre-generated opaque task id
    pub id: TaskId,
    /// Owning user id
    pub user_id: String,
    /// Id of the source document being exported
    pub source_document_id: String,
    /// Target format
    pub format: ExportFormat,
    /// Optional template id
    pub template_id: Option<String>,
    /// Content tree, JSON-encoded (kept so retries re-render the same input)
    pub content_json: String,
    /// Export options, JSON-encoded
    pub options_json: String,
}

/// Export task record from database
#[derive(Debug, Clone, FromRow)]
pub struct TaskRow {
    /// Opaque task id
    pub id: TaskId,
    /// Owning user id
    pub user_id: String,
    /// Id of the source document being exported
    pub source_document_id: String,
    /// Target format as a database string
    pub format: String,
    /// Optional template id
    pub template_id: Option<String>,
    /// Current status as a database string
    pub status: String,
    /// Progress percentage (0-100)
    pub progress: i64,
    /// Number of retries consumed so far
    pub retry_count: i64,
    /// Content tree, JSON-encoded
    pub content_json: String,
    /// Export options, JSON-encoded
    pub options_json: String,
    /// Result location, set on completion
    pub result_location: Option<String>,
    /// Result size in bytes, set on completion
    pub result_size_bytes: Option<i64>,
    /// Error message, set on failure
    pub error_message: Option<String>,
    /// Machine-readable error code, set on failure
    pub error_code: Option<String>,
    /// Unix timestamp when the task was created
    pub created_at: i64,
    /// Unix timestamp when processing started
    pub started_at: Option<i64>,
    /// Unix timestamp when the task reached a terminal state
    pub completed_at: Option<i64>,
}

impl TaskRow {
    /// Decoded task status
    pub fn status(&self) -> TaskStatus {
        TaskStatus::from_db(&self.status)
    }

    /// Decoded export format
    pub fn format(&self) -> ExportFormat {
        ExportFormat::from_db(&self.format)
    }

    /// Decode the stored content tree
    pub fn content(&self) -> Result<ContentSpec> {
        serde_json::from_str(&self.content_json).map_err(Error::Serialization)
    }

    /// Decode the stored export options
    pub fn options(&self) -> Result<ExportOptions> {
        serde_json::from_str(&self.options_json).map_err(Error::Serialization)
    }
}

impl From<&TaskRow> for TaskSnapshot {
    fn from(row: &TaskRow) -> Self {
        TaskSnapshot {
            task_id: row.id.clone(),
            status: row.status(),
            progress: row.progress.clamp(0, 100) as u8,
            download_url: row
                .result_location
                .as_ref()
                .map(|_| row.id.download_url()),
            error_message: row.error_message.clone(),
        }
    }
}

impl From<&TaskRow> for TaskInfo {
    fn from(row: &TaskRow) -> Self {
        TaskInfo {
            task_id: row.id.clone(),
            user_id: row.user_id.clone(),
            source_document_id: row.source_document_id.clone(),
            format: row.format(),
            template_id: row.template_id.clone(),
            status: row.status(),
            progress: row.progress.clamp(0, 100) as u8,
            retry_count: row.retry_count.max(0) as u32,
            result_location: row.result_location.clone(),
            result_size_bytes: row.result_size_bytes.map(|s| s.max(0) as u64),
            error_message: row.error_message.clone(),
            error_code: row.error_code.clone(),
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
        }
    }
}

/// Database handle for doc-export
pub struct Database {
    pool: SqlitePool,
}
