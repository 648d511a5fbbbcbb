//! Core types for doc-export

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use utoipa::ToSchema;

/// Unique identifier for an export task
///
/// An opaque token (UUID v4 hex) rather than a sequential row id, so task ids
/// can be handed to clients without leaking creation order.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    /// Generate a fresh random task id
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Get the inner string value
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The relative download URL for this task's finished artifact
    pub fn download_url(&self) -> String {
        format!("/exports/{}/download", self.0)
    }
}

impl From<String> for TaskId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// Implement sqlx Type, Encode, and Decode for database operations
impl sqlx::Type<sqlx::Sqlite> for TaskId {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <String as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <String as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for TaskId {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.0, buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for TaskId {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let id = <String as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(Self(id))
    }
}

/// Export task status
///
/// The lifecycle is `Pending → Processing → {Completed | Failed | Cancelled}`.
/// The three right-hand states are terminal: once a task reaches one of them
/// its row becomes an immutable audit record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Created, waiting for an admission slot
    Pending,
    /// Actively rendering and streaming
    Processing,
    /// Finished successfully, result stored
    Completed,
    /// Finished with an error
    Failed,
    /// Abandoned on explicit user request
    Cancelled,
}

impl TaskStatus {
    /// All states, for exhaustive property tests
    pub const ALL: [TaskStatus; 5] = [
        TaskStatus::Pending,
        TaskStatus::Processing,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Cancelled,
    ];

    /// Database string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    /// Convert a database string to a TaskStatus
    ///
    /// Unknown values decode to Failed so corrupted rows surface visibly
    /// instead of silently re-entering the queue.
    pub fn from_db(status: &str) -> Self {
        match status {
            "pending" => TaskStatus::Pending,
            "processing" => TaskStatus::Processing,
            "completed" => TaskStatus::Completed,
            "failed" => TaskStatus::Failed,
            "cancelled" => TaskStatus::Cancelled,
            _ => TaskStatus::Failed,
        }
    }

    /// Whether this state admits no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// State machine guard: is `self → next` a legal transition?
    ///
    /// Terminal states admit nothing. The retry operation (`Failed → Pending`)
    /// is deliberately NOT part of this relation — it is a distinct operation
    /// with its own retry-count bookkeeping in the database layer, so the
    /// ordinary transition path can never resurrect a failed task.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        match self {
            TaskStatus::Pending => {
                matches!(next, TaskStatus::Processing | TaskStatus::Cancelled)
            }
            TaskStatus::Processing => matches!(
                next,
                TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
            ),
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled => false,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Target document format for an export
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// Microsoft Word (.docx)
    Word,
    /// PDF
    Pdf,
    /// PowerPoint (.pptx)
    Pptx,
    /// Plain markdown text
    Markdown,
}

impl ExportFormat {
    /// Database string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Word => "word",
            ExportFormat::Pdf => "pdf",
            ExportFormat::Pptx => "pptx",
            ExportFormat::Markdown => "markdown",
        }
    }

    /// Parse a format string (as stored in the database or sent by clients)
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "word" => Some(ExportFormat::Word),
            "pdf" => Some(ExportFormat::Pdf),
            "pptx" => Some(ExportFormat::Pptx),
            "markdown" => Some(ExportFormat::Markdown),
            _ => None,
        }
    }

    /// Convert a database string to an ExportFormat
    ///
    /// Unknown values fall back to Markdown (the only format the crate can
    /// always serve) so corrupted rows remain inspectable.
    pub fn from_db(s: &str) -> Self {
        Self::parse(s).unwrap_or(ExportFormat::Markdown)
    }

    /// MIME content type for HTTP transfer of the finished artifact
    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Word => {
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            }
            ExportFormat::Pdf => "application/pdf",
            ExportFormat::Pptx => {
                "application/vnd.openxmlformats-officedocument.presentationml.presentation"
            }
            ExportFormat::Markdown => "text/markdown; charset=utf-8",
        }
    }

    /// File extension (without dot) for suggested filenames
    pub fn file_extension(&self) -> &'static str {
        match self {
            ExportFormat::Word => "docx",
            ExportFormat::Pdf => "pdf",
            ExportFormat::Pptx => "pptx",
            ExportFormat::Markdown => "md",
        }
    }
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Event delivered over the progress channel
///
/// Serialized form is the wire protocol: a JSON object with a `type` tag.
/// Not persisted beyond the latest value mirrored into the task row.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// First frame sent to every new subscriber
    Connected {
        /// Task being watched
        task_id: TaskId,
        /// Status at connect time
        status: TaskStatus,
        /// Progress at connect time
        progress: u8,
    },

    /// Progress update
    Progress {
        /// Progress percentage (0 to 100)
        progress: u8,
        /// Human-readable stage description
        message: String,
    },

    /// Export finished successfully
    Completed {
        /// URL for fetching the finished artifact
        download_url: String,
    },

    /// Export failed
    Error {
        /// Error message
        error_message: String,
    },

    /// Export was cancelled
    Cancelled,
}

impl ProgressEvent {
    /// Short event kind name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            ProgressEvent::Connected { .. } => "connected",
            ProgressEvent::Progress { .. } => "progress",
            ProgressEvent::Completed { .. } => "completed",
            ProgressEvent::Error { .. } => "error",
            ProgressEvent::Cancelled => "cancelled",
        }
    }

    /// Whether this event ends the stream for its task
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProgressEvent::Completed { .. } | ProgressEvent::Error { .. } | ProgressEvent::Cancelled
        )
    }
}

/// Point-in-time view of a task, used to greet new progress subscribers
///
/// Carries just enough of the task row for the hub to build the `connected`
/// frame and, for already-terminal tasks, the one terminal frame a late
/// subscriber receives.
#[derive(Clone, Debug)]
pub struct TaskSnapshot {
    /// Task id
    pub task_id: TaskId,
    /// Current status
    pub status: TaskStatus,
    /// Current progress (0 to 100)
    pub progress: u8,
    /// Download URL, set once completed
    pub download_url: Option<String>,
    /// Error message, set once failed
    pub error_message: Option<String>,
}

impl TaskSnapshot {
    /// The `connected` frame for a new subscriber
    pub fn connected_event(&self) -> ProgressEvent {
        ProgressEvent::Connected {
            task_id: self.task_id.clone(),
            status: self.status,
            progress: self.progress,
        }
    }

    /// The terminal frame, if the task has already finished
    pub fn terminal_event(&self) -> Option<ProgressEvent> {
        match self.status {
            TaskStatus::Completed => Some(ProgressEvent::Completed {
                download_url: self
                    .download_url
                    .clone()
                    .unwrap_or_else(|| self.task_id.download_url()),
            }),
            TaskStatus::Failed => Some(ProgressEvent::Error {
                error_message: self
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "export failed".to_string()),
            }),
            TaskStatus::Cancelled => Some(ProgressEvent::Cancelled),
            TaskStatus::Pending | TaskStatus::Processing => None,
        }
    }
}

/// Per-request export options
///
/// Typed and defaulted; unknown keys are rejected at deserialization time
/// rather than silently accepted.
#[derive(Clone, Debug, Default, Serialize, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct ExportOptions {
    /// Restrict the export to the named sections (None = all sections)
    #[serde(default)]
    pub sections: Option<Vec<String>>,

    /// Content language tag (e.g. "en", "nb"); informational for renderers
    #[serde(default)]
    pub language: Option<String>,

    /// Include answer keys in the exported document
    #[serde(default)]
    pub include_answers: bool,

    /// Include teacher-facing notes in the exported document
    #[serde(default)]
    pub include_teacher_notes: bool,
}

/// One section of the content tree fed to a renderer
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct ContentSection {
    /// Section heading
    pub heading: String,
    /// Section body text
    pub body: String,
    /// Answer key for this section, rendered only when requested via options
    #[serde(default)]
    pub answers: Option<String>,
}

/// The content tree handed to a document renderer
///
/// Assembled by the caller (lesson content, generated material, etc. — out of
/// scope here); renderers treat it as ready-to-render input.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct ContentSpec {
    /// Document title
    pub title: String,
    /// Document sections, in order
    pub sections: Vec<ContentSection>,
    /// Template variable substitutions applied by renderers ({{key}} → value)
    #[serde(default)]
    pub template_variables: HashMap<String, String>,
}

impl ContentSpec {
    /// Validate the content before any rendering work begins
    ///
    /// Returns the reason the content is unusable, or None if it is fine.
    pub fn validation_error(&self) -> Option<String> {
        if self.title.trim().is_empty() {
            return Some("document title must not be empty".to_string());
        }
        if self.sections.is_empty() {
            return Some("document must contain at least one section".to_string());
        }
        None
    }
}

/// Request to create a new export task
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct ExportRequest {
    /// Owning user id
    pub user_id: String,
    /// Id of the source document being exported
    pub source_document_id: String,
    /// Target format
    pub format: ExportFormat,
    /// Optional template id
    #[serde(default)]
    pub template_id: Option<String>,
    /// Export options
    #[serde(default)]
    pub options: ExportOptions,
    /// Content tree to render
    pub content: ContentSpec,
}

/// Information about an export task (API-facing snapshot of the task row)
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct TaskInfo {
    /// Task id
    pub task_id: TaskId,
    /// Owning user id
    pub user_id: String,
    /// Source document id
    pub source_document_id: String,
    /// Target format
    pub format: ExportFormat,
    /// Template id, if any
    pub template_id: Option<String>,
    /// Current status
    pub status: TaskStatus,
    /// Progress percentage (0 to 100)
    pub progress: u8,
    /// Number of retries consumed so far
    pub retry_count: u32,
    /// Result location (set only on completed)
    pub result_location: Option<String>,
    /// Result size in bytes (set only on completed)
    pub result_size_bytes: Option<u64>,
    /// Error message (set only on failed)
    pub error_message: Option<String>,
    /// Machine-readable error code (set only on failed)
    pub error_code: Option<String>,
    /// Unix timestamp when the task was created
    pub created_at: i64,
    /// Unix timestamp when processing started
    pub started_at: Option<i64>,
    /// Unix timestamp when the task reached a terminal state
    pub completed_at: Option<i64>,
}

/// Non-blocking snapshot of RateGate counters
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct GateStatus {
    /// Configured maximum concurrent exports
    pub max: usize,
    /// Exports currently holding a slot
    pub active: usize,
    /// Callers currently suspended waiting for a slot
    pub queued: usize,
    /// Total acquisitions rejected by timeout
    pub rejected_total: u64,
    /// Total slots released after successful acquisition
    pub completed_total: u64,
}

/// Non-blocking snapshot of ProgressHub state
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct HubStats {
    /// Number of live subscriber connections across all tasks
    pub connection_count: usize,
    /// Task ids with at least one live subscriber
    pub task_ids: Vec<TaskId>,
}

/// Combined operational snapshot for health/metrics collectors
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct PipelineStats {
    /// Configured maximum concurrent exports
    pub max_concurrent: usize,
    /// Exports currently holding a slot
    pub active: usize,
    /// Callers currently suspended waiting for a slot
    pub queued: usize,
    /// Total acquisitions rejected by timeout
    pub rejected_total: u64,
    /// Total slots released after successful acquisition
    pub completed_total: u64,
    /// Live progress subscriber connections
    pub connection_count: usize,
    /// Task ids currently being watched
    pub active_task_ids: Vec<TaskId>,
}
