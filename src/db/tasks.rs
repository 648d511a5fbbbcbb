//! Export task CRUD and guarded status transitions.
//!
//! Every state-machine transition is a conditional UPDATE whose WHERE clause
//! names the expected current status; the returned row count tells the caller
//! whether the transition happened. This makes the guards atomic: two racing
//! callers can never both move a task out of the same state.

use crate::error::DatabaseError;
use crate::error::{Error, Result};
use crate::types::{TaskId, TaskStatus};

use super::{Database, NewTask, TaskRow};

const TASK_COLUMNS: &str = r#"
    id, user_id, source_document_id, format, template_id, status,
    progress, retry_count, content_json, options_json,
    result_location, result_size_bytes, error_message, error_code,
    created_at, started_at, completed_at
"#;

impl Database {
    /// Insert a new export task in Pending state
    pub async fn insert_task(&self, task: &NewTask) -> Result<()> {
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO export_tasks (
                id, user_id, source_document_id, format, template_id,
                status, progress, retry_count, content_json, options_json,
                created_at
            ) VALUES (?, ?, ?, ?, ?, ?, 0, 0, ?, ?, ?)
            "#,
        )
        .bind(&task.id)
        .bind(&task.user_id)
        .bind(&task.source_document_id)
        .bind(task.format.as_str())
        .bind(&task.template_id)
        .bind(TaskStatus::Pending.as_str())
        .bind(&task.content_json)
        .bind(&task.options_json)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to insert export task: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Get an export task by id
    pub async fn get_task(&self, id: &TaskId) -> Result<Option<TaskRow>> {
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLUMNS} FROM export_tasks WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get export task: {}",
                e
            )))
        })?;

        Ok(row)
    }

    /// List all export tasks, newest first
    pub async fn list_tasks(&self) -> Result<Vec<TaskRow>> {
        let rows = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLUMNS} FROM export_tasks ORDER BY created_at DESC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list export tasks: {}",
                e
            )))
        })?;

        Ok(rows)
    }

    /// List export tasks with a specific status
    pub async fn list_tasks_by_status(&self, status: TaskStatus) -> Result<Vec<TaskRow>> {
        let rows = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLUMNS} FROM export_tasks WHERE status = ? ORDER BY created_at ASC"
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list export tasks by status: {}",
                e
            )))
        })?;

        Ok(rows)
    }

    /// List export tasks owned by a user, newest first
    pub async fn list_tasks_for_user(&self, user_id: &str) -> Result<Vec<TaskRow>> {
        let rows = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLUMNS} FROM export_tasks WHERE user_id = ? ORDER BY created_at DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list export tasks for user: {}",
                e
            )))
        })?;

        Ok(rows)
    }

    /// Move a Pending task to Processing, recording the start time
    ///
    /// Returns false if the task was not Pending (already started, cancelled,
    /// or unknown).
    pub async fn mark_processing(&self, id: &TaskId) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE export_tasks
            SET status = 'processing', started_at = ?
            WHERE id = ? AND status = 'pending'
            "#,
        )
        .bind(chrono::Utc::now().timestamp())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to mark task processing: {}",
                e
            )))
        })?;

        Ok(result.rows_affected() == 1)
    }

    /// Record progress for a Processing task
    ///
    /// MAX() keeps the stored value non-decreasing even if updates land out
    /// of order; updates on non-Processing rows are silently skipped.
    pub async fn update_progress(&self, id: &TaskId, progress: u8) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE export_tasks
            SET progress = MAX(progress, ?)
            WHERE id = ? AND status = 'processing'
            "#,
        )
        .bind(progress.min(100) as i64)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to update task progress: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Move a Processing task to Completed with its result
    ///
    /// Returns false if the task was not Processing (e.g. cancelled while the
    /// final chunk was in flight) — the caller must not publish completion.
    pub async fn complete_task(
        &self,
        id: &TaskId,
        result_location: &str,
        result_size_bytes: u64,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE export_tasks
            SET status = 'completed', progress = 100,
                result_location = ?, result_size_bytes = ?, completed_at = ?
            WHERE id = ? AND status = 'processing'
            "#,
        )
        .bind(result_location)
        .bind(result_size_bytes as i64)
        .bind(chrono::Utc::now().timestamp())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to complete task: {}",
                e
            )))
        })?;

        Ok(result.rows_affected() == 1)
    }

    /// Move a Processing task to Failed with an error description
    pub async fn fail_task(
        &self,
        id: &TaskId,
        error_message: &str,
        error_code: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE export_tasks
            SET status = 'failed', error_message = ?, error_code = ?, completed_at = ?
            WHERE id = ? AND status = 'processing'
            "#,
        )
        .bind(error_message)
        .bind(error_code)
        .bind(chrono::Utc::now().timestamp())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to mark task failed: {}",
                e
            )))
        })?;

        Ok(result.rows_affected() == 1)
    }

    /// Move a Pending or Processing task to Cancelled
    ///
    /// Returns false if the task was already terminal.
    pub async fn cancel_task(&self, id: &TaskId) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE export_tasks
            SET status = 'cancelled', completed_at = ?
            WHERE id = ? AND status IN ('pending', 'processing')
            "#,
        )
        .bind(chrono::Utc::now().timestamp())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to cancel task: {}",
                e
            )))
        })?;

        Ok(result.rows_affected() == 1)
    }

    /// Move a Failed task back to Pending for another attempt
    ///
    /// Consumes one retry; returns false if the task is not Failed or has no
    /// retries left.
    pub async fn retry_task(&self, id: &TaskId, max_retries: u32) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE export_tasks
            SET status = 'pending', retry_count = retry_count + 1,
                progress = 0, error_message = NULL, error_code = NULL,
                result_location = NULL, result_size_bytes = NULL,
                started_at = NULL, completed_at = NULL
            WHERE id = ? AND status = 'failed' AND retry_count < ?
            "#,
        )
        .bind(id)
        .bind(max_retries as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to retry task: {}",
                e
            )))
        })?;

        Ok(result.rows_affected() == 1)
    }

    /// Mark tasks left Processing by an unclean shutdown as Failed
    ///
    /// Run at startup so reconnecting clients read a terminal truth instead
    /// of a Processing row nobody is driving. Returns the number of rows
    /// recovered.
    pub async fn recover_interrupted_tasks(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE export_tasks
            SET status = 'failed', error_message = 'export interrupted by shutdown',
                error_code = 'interrupted', completed_at = ?
            WHERE status = 'processing'
            "#,
        )
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to recover interrupted tasks: {}",
                e
            )))
        })?;

        Ok(result.rows_affected())
    }

    /// Delete a terminal task row
    ///
    /// Returns false if the task is still Pending or Processing; live tasks
    /// must be cancelled first.
    pub async fn delete_task(&self, id: &TaskId) -> Result<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM export_tasks
            WHERE id = ? AND status IN ('completed', 'failed', 'cancelled')
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to delete task: {}",
                e
            )))
        })?;

        Ok(result.rows_affected() == 1)
    }
}
