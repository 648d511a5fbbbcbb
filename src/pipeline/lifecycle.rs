//! Startup and shutdown coordination.

use crate::error::Result;

use super::ExportPipeline;

/// How long shutdown waits for running exports to settle
const SHUTDOWN_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

impl ExportPipeline {
    /// Gracefully shut down the pipeline
    ///
    /// Shutdown sequence:
    /// 1. Stop accepting new tasks and runners
    /// 2. Signal cancellation to every running export
    /// 3. Wait for runners to settle their tasks, with a timeout
    /// 4. Mark any task still Processing as Failed (interrupted)
    ///
    /// Each runner settles its own task as Cancelled on the way out, so step
    /// 4 only catches runners that did not drain within the timeout.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");

        self.active_tasks
            .accepting_new
            .store(false, std::sync::atomic::Ordering::SeqCst);
        tracing::info!("Stopped accepting new exports");

        self.cancel_all_active().await;

        let wait_result =
            tokio::time::timeout(SHUTDOWN_TIMEOUT, self.wait_for_active_tasks()).await;
        match wait_result {
            Ok(()) => tracing::info!("All active exports settled"),
            Err(_) => {
                tracing::warn!("Timeout waiting for exports to settle, proceeding with shutdown");
            }
        }

        // Anything still Processing has no live runner to settle it
        match self.db.recover_interrupted_tasks().await {
            Ok(0) => {}
            Ok(interrupted) => {
                tracing::warn!(interrupted, "marked unsettled exports as failed");
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to mark unsettled exports during shutdown");
            }
        }

        tracing::info!("Graceful shutdown complete");
        Ok(())
    }

    /// Signal cancellation to all running exports
    pub(crate) async fn cancel_all_active(&self) {
        let tokens = self.active_tasks.tokens.lock().await;
        tracing::debug!(active_count = tokens.len(), "cancelling all active exports");
        for (id, token) in tokens.iter() {
            tracing::debug!(task_id = %id, "signalling cancellation");
            token.cancel();
        }
    }

    /// Wait until no runner is registered anymore
    async fn wait_for_active_tasks(&self) {
        loop {
            let active_count = {
                let tokens = self.active_tasks.tokens.lock().await;
                tokens.len()
            };
            if active_count == 0 {
                return;
            }
            tracing::debug!(active_count, "waiting for active exports to settle");
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
    }
}
