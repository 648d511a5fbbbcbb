//! Error types for doc-export
//!
//! This module provides error handling for the library, including:
//! - Domain-specific error types (Export, Database)
//! - HTTP status code mapping for API integration
//! - Structured error responses with machine-readable error codes

use crate::types::{TaskId, TaskStatus};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Result type alias for doc-export operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for doc-export
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "chunk_size")
        key: Option<String>,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Export pipeline error
    #[error("export error: {0}")]
    Export(#[from] ExportError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Task not found
    #[error("export task not found: {0}")]
    NotFound(String),

    /// Shutdown in progress - not accepting new exports
    #[error("shutdown in progress: not accepting new exports")]
    ShuttingDown,

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// API server error
    #[error("API server error: {0}")]
    ApiServerError(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Record not found
    #[error("record not found: {0}")]
    NotFound(String),
}

/// Export pipeline errors
#[derive(Debug, Error)]
pub enum ExportError {
    /// Chunk size outside the accepted [1 KiB, 1 MiB] range
    #[error("invalid chunk size {size} bytes: must be between {min} and {max} bytes")]
    InvalidChunkSize {
        /// The requested chunk size
        size: usize,
        /// Minimum accepted chunk size (1 KiB)
        min: usize,
        /// Maximum accepted chunk size (1 MiB)
        max: usize,
    },

    /// Input rejected before any resource was acquired
    #[error("invalid input: {reason}")]
    InvalidInput {
        /// Why the input was rejected
        reason: String,
    },

    /// No renderer registered for the requested format
    #[error("no renderer registered for format {format}")]
    UnsupportedFormat {
        /// The requested format string
        format: String,
    },

    /// The document-rendering collaborator failed
    #[error("rendering failed: {reason}")]
    RenderFailed {
        /// Why rendering failed
        reason: String,
    },

    /// The result could not be durably written
    #[error("failed to store export result: {reason}")]
    StorageFailed {
        /// Why storage failed
        reason: String,
    },

    /// State-machine guard violation
    #[error("invalid transition for task {id}: {from} -> {to}")]
    InvalidTransition {
        /// The task whose transition was rejected
        id: TaskId,
        /// State the task was in
        from: TaskStatus,
        /// State the transition attempted to reach
        to: TaskStatus,
    },

    /// Admission-control wait exceeded the configured timeout
    ///
    /// Recoverable: the caller may retry later. No task row is mutated.
    #[error("task {id} timed out waiting for an export slot")]
    AdmissionTimeout {
        /// The task that was rejected
        id: TaskId,
    },

    /// Retry requested but the task has exhausted its retry budget
    #[error("task {id} has exhausted its {max_retries} retries")]
    RetryExhausted {
        /// The task whose retry was rejected
        id: TaskId,
        /// Configured maximum retry count
        max_retries: u32,
    },

    /// Operation attempted on a task in an incompatible state
    #[error("cannot {operation} task {id} in state {status}")]
    InvalidState {
        /// The task in an incompatible state
        id: TaskId,
        /// The operation that was attempted (e.g., "cancel", "retry")
        operation: String,
        /// The state preventing the operation
        status: TaskStatus,
    },
}

/// API error response format
///
/// Returned by API endpoints when an error occurs, with a machine-readable
/// error code, a human-readable message, and optional contextual details.
///
/// # Example JSON Response
///
/// ```json
/// {
///   "error": {
///     "code": "not_found",
///     "message": "export task abc123 not found"
///   }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApiError {
    /// The error details
    pub error: ErrorDetail,
}

/// Detailed error information for API responses
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g., "not_found", "invalid_chunk_size")
    pub code: String,

    /// Human-readable error message
    pub message: String,

    /// Optional additional context about the error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Create a new API error with code and message
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }

    /// Create an API error with additional details
    pub fn with_details(
        code: impl Into<String>,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
                details: Some(details),
            },
        }
    }

    /// Create a "not found" error
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::new("not_found", format!("{} not found", resource.into()))
    }

    /// Create a "validation error" error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new("validation_error", message)
    }

    /// Create an "unauthorized" error
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new("unauthorized", message)
    }
}

/// Convert errors to HTTP status codes for API responses
pub trait ToHttpStatus {
    /// Get the HTTP status code for this error
    fn status_code(&self) -> u16;

    /// Get the machine-readable error code
    fn error_code(&self) -> &str;
}

impl ToHttpStatus for Error {
    fn status_code(&self) -> u16 {
        match self {
            // 400 Bad Request - Client error (invalid configuration)
            Error::Config { .. } => 400,

            // 404 Not Found
            Error::NotFound(_) => 404,
            Error::Database(DatabaseError::NotFound(_)) => 404,

            Error::Export(e) => match e {
                // 422 Unprocessable Entity - rejected before any work began
                ExportError::InvalidChunkSize { .. } => 422,
                ExportError::InvalidInput { .. } => 422,
                ExportError::UnsupportedFormat { .. } => 422,

                // 409 Conflict - state machine / contract violations
                ExportError::InvalidTransition { .. } => 409,
                ExportError::InvalidState { .. } => 409,
                ExportError::RetryExhausted { .. } => 409,

                // 503 Service Unavailable - try again later, nothing was mutated
                ExportError::AdmissionTimeout { .. } => 503,

                // 500 Internal Server Error
                ExportError::RenderFailed { .. } => 500,
                ExportError::StorageFailed { .. } => 500,
            },

            // 500 Internal Server Error - Server-side issues
            Error::Database(_) => 500,
            Error::Sqlx(_) => 500,
            Error::Io(_) => 500,
            Error::Serialization(_) => 500,
            Error::ApiServerError(_) => 500,
            Error::Other(_) => 500,

            // 503 Service Unavailable
            Error::ShuttingDown => 503,
        }
    }

    fn error_code(&self) -> &str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Database(_) => "database_error",
            Error::Sqlx(_) => "database_error",
            Error::Export(e) => match e {
                ExportError::InvalidChunkSize { .. } => "invalid_chunk_size",
                ExportError::InvalidInput { .. } => "invalid_input",
                ExportError::UnsupportedFormat { .. } => "unsupported_format",
                ExportError::RenderFailed { .. } => "render_failed",
                ExportError::StorageFailed { .. } => "storage_failed",
                ExportError::InvalidTransition { .. } => "invalid_transition",
                ExportError::AdmissionTimeout { .. } => "admission_timeout",
                ExportError::RetryExhausted { .. } => "retry_exhausted",
                ExportError::InvalidState { .. } => "invalid_state",
            },
            Error::Io(_) => "io_error",
            Error::NotFound(_) => "not_found",
            Error::ShuttingDown => "shutting_down",
            Error::Serialization(_) => "serialization_error",
            Error::ApiServerError(_) => "api_server_error",
            Error::Other(_) => "internal_error",
        }
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        let code = error.error_code().to_string();
        let message = error.to_string();

        // Add contextual details for specific error types
        let details = match &error {
            Error::Export(ExportError::InvalidChunkSize { size, min, max }) => {
                Some(serde_json::json!({
                    "chunk_size": size,
                    "min": min,
                    "max": max,
                }))
            }
            Error::Export(ExportError::InvalidTransition { id, from, to }) => {
                Some(serde_json::json!({
                    "task_id": id,
                    "from": from,
                    "to": to,
                }))
            }
            Error::Export(ExportError::InvalidState {
                id,
                operation,
                status,
            }) => Some(serde_json::json!({
                "task_id": id,
                "operation": operation,
                "status": status,
            })),
            Error::Export(ExportError::RetryExhausted { id, max_retries }) => {
                Some(serde_json::json!({
                    "task_id": id,
                    "max_retries": max_retries,
                }))
            }
            Error::Export(ExportError::AdmissionTimeout { id }) => Some(serde_json::json!({
                "task_id": id,
            })),
            _ => None,
        };

        Self {
            error: ErrorDetail {
                code,
                message,
                details,
            },
        }
    }
}
