//! Task lifecycle control — cancel and retry.

use crate::error::{Error, ExportError, Result};
use crate::types::{TaskId, TaskStatus};

use super::ExportPipeline;

impl ExportPipeline {
    /// Cancel an export task
    ///
    /// A Pending task is cancelled immediately. A Processing task is
    /// signalled through its cancellation token and stops at the next chunk
    /// boundary; the runner then releases its slot, records Cancelled, and
    /// publishes the `cancelled` event. Cancelling an already-cancelled task
    /// is a no-op; cancelling a Completed or Failed task is a contract
    /// violation and mutates nothing.
    pub async fn cancel(&self, id: &TaskId) -> Result<()> {
        let row = self
            .db
            .get_task(id)
            .await?
            .ok_or_else(|| Error::NotFound(id.to_string()))?;

        match row.status() {
            TaskStatus::Cancelled => {
                // Already cancelled, nothing to do
                return Ok(());
            }
            status @ (TaskStatus::Completed | TaskStatus::Failed) => {
                tracing::warn!(task_id = %id, status = %status, "refusing cancel of finished task");
                return Err(Error::Export(ExportError::InvalidTransition {
                    id: id.clone(),
                    from: status,
                    to: TaskStatus::Cancelled,
                }));
            }
            TaskStatus::Pending | TaskStatus::Processing => {}
        }

        // If a runner is active, signal it; it owns the state settlement so
        // the slot release always happens before the Cancelled transition.
        let signalled = {
            let tokens = self.active_tasks.tokens.lock().await;
            match tokens.get(id) {
                Some(token) => {
                    token.cancel();
                    true
                }
                None => false,
            }
        };

        if signalled {
            tracing::debug!(task_id = %id, "cancellation signalled to running export");
            return Ok(());
        }

        // No runner: settle directly (Pending task, or a Processing row
        // whose runner already exited)
        self.settle_cancelled(id).await;
        Ok(())
    }

    /// Retry a Failed export task
    ///
    /// Moves the task back to Pending (consuming one retry from the budget)
    /// and starts a fresh runner over the originally submitted content.
    /// Beyond `max_retries` the failure is final and `RetryExhausted` is
    /// returned.
    pub async fn retry(&self, id: &TaskId) -> Result<()> {
        let row = self
            .db
            .get_task(id)
            .await?
            .ok_or_else(|| Error::NotFound(id.to_string()))?;

        let status = row.status();
        if status != TaskStatus::Failed {
            return Err(Error::Export(ExportError::InvalidState {
                id: id.clone(),
                operation: "retry".to_string(),
                status,
            }));
        }

        let max_retries = self.config.export.max_retries;
        if !self.db.retry_task(id, max_retries).await? {
            return Err(Error::Export(ExportError::RetryExhausted {
                id: id.clone(),
                max_retries,
            }));
        }

        tracing::info!(
            task_id = %id,
            attempt = row.retry_count + 1,
            "retrying failed export"
        );
        self.start_task(id).await
    }
}
