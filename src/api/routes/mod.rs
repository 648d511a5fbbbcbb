//! Route handlers for the REST API
//!
//! Handlers are organized by domain:
//! - [`exports`] — Export task management and artifact download
//! - [`system`] — Health, stats, OpenAPI

use serde::{Deserialize, Serialize};

mod exports;
mod system;

// Re-export all handlers so `routes::function_name` continues to work
pub use exports::*;
pub use system::*;

// ============================================================================
// Query/Request Types (shared across handlers)
// ============================================================================

/// Query parameters for GET /exports
#[derive(Debug, Deserialize, Serialize, utoipa::ToSchema)]
pub struct ListExportsQuery {
    /// Restrict the listing to tasks owned by this user
    pub user_id: Option<String>,
}

/// Response for POST /exports and POST /exports/:id/retry
#[derive(Debug, Deserialize, Serialize, utoipa::ToSchema)]
pub struct CreateExportResponse {
    /// Id of the created (or re-queued) task
    pub task_id: crate::types::TaskId,
    /// Status at response time (always `pending`)
    pub status: crate::types::TaskStatus,
}
