//! Task runner — drives one export end-to-end.
//!
//! Flow: acquire a gate slot (bounded wait), move the task to Processing,
//! stream renderer chunks into storage while persisting and publishing
//! progress, then settle the terminal state. The gate slot is an RAII guard,
//! so it is released on every exit path; renderer and storage errors become a
//! Failed transition plus one `error` event, never a skipped release.

use crate::error::{Error, Result, ToHttpStatus};
use crate::gate::Admission;
use crate::render::{ChunkedRenderer, ProgressFn};
use crate::types::{ProgressEvent, TaskId, TaskStatus};
use futures::StreamExt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::ExportPipeline;

enum RunOutcome {
    Completed { location: String, size_bytes: u64 },
    Cancelled,
}

impl ExportPipeline {
    /// Start the runner for a Pending task
    ///
    /// Registers a cancellation token and spawns the export in the
    /// background; returns as soon as the runner is launched. Errors if the
    /// task is unknown, not Pending, or already running.
    pub async fn start_task(&self, id: &TaskId) -> Result<()> {
        if !self
            .active_tasks
            .accepting_new
            .load(std::sync::atomic::Ordering::SeqCst)
        {
            return Err(Error::ShuttingDown);
        }

        let row = self
            .db
            .get_task(id)
            .await?
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        let status = row.status();
        if status != TaskStatus::Pending {
            return Err(Error::Export(crate::error::ExportError::InvalidState {
                id: id.clone(),
                operation: "start".to_string(),
                status,
            }));
        }

        let cancel_token = CancellationToken::new();
        {
            let mut tokens = self.active_tasks.tokens.lock().await;
            if tokens.contains_key(id) {
                return Err(Error::Export(crate::error::ExportError::InvalidState {
                    id: id.clone(),
                    operation: "start".to_string(),
                    status: TaskStatus::Processing,
                }));
            }
            tokens.insert(id.clone(), cancel_token.clone());
        }

        let pipeline = self.clone();
        let task_id = id.clone();
        tokio::spawn(async move {
            pipeline.run_export(&task_id, cancel_token).await;
            pipeline.active_tasks.tokens.lock().await.remove(&task_id);
        });
        Ok(())
    }

    /// One export end-to-end
    async fn run_export(&self, id: &TaskId, cancel_token: CancellationToken) {
        let timeout = self.config.export.admission_timeout;
        let guard = match self.gate.acquire(id, timeout).await {
            Admission::Acquired(guard) => guard,
            Admission::Rejected => {
                // The task row stays Pending; it can be started again later
                tracing::warn!(task_id = %id, "export rejected: no slot within timeout");
                self.hub.publish(
                    id,
                    ProgressEvent::Error {
                        error_message: "timed out waiting for an export slot; task remains pending"
                            .to_string(),
                    },
                );
                return;
            }
        };

        if cancel_token.is_cancelled() {
            drop(guard);
            self.settle_cancelled(id).await;
            return;
        }

        if !self.db.mark_processing(id).await.unwrap_or(false) {
            // Cancelled (or otherwise moved) between start and admission
            tracing::debug!(task_id = %id, "task no longer pending, runner exiting");
            return;
        }
        tracing::info!(task_id = %id, "export started");

        match self.drive_export(id, &cancel_token).await {
            Ok(RunOutcome::Completed {
                location,
                size_bytes,
            }) => {
                match self.db.complete_task(id, &location, size_bytes).await {
                    Ok(true) => {
                        tracing::info!(task_id = %id, size_bytes, "export completed");
                        self.hub.publish(
                            id,
                            ProgressEvent::Completed {
                                download_url: id.download_url(),
                            },
                        );
                    }
                    Ok(false) => {
                        tracing::warn!(
                            task_id = %id,
                            "task left processing before completion could be recorded"
                        );
                    }
                    Err(e) => {
                        tracing::error!(task_id = %id, error = %e, "failed to record completion");
                    }
                }
            }
            Ok(RunOutcome::Cancelled) => {
                // Ordering: release the slot first, then settle the state
                drop(guard);
                self.settle_cancelled(id).await;
            }
            Err(e) => self.settle_failed(id, &e).await,
        }
    }

    /// Render, chunk, and store the artifact for one task
    async fn drive_export(
        &self,
        id: &TaskId,
        cancel_token: &CancellationToken,
    ) -> Result<RunOutcome> {
        let row = self
            .db
            .get_task(id)
            .await?
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        let format = row.format();
        let content = row.content()?;
        let options = row.options()?;

        let renderer = self.renderers.get(format).ok_or_else(|| {
            Error::Export(crate::error::ExportError::UnsupportedFormat {
                format: format.as_str().to_string(),
            })
        })?;

        // The chunk stream reports progress synchronously as chunks are
        // pulled; the channel hands those reports back to this task so they
        // can be persisted and fanned out between chunks.
        let (progress_tx, mut progress_rx) = tokio::sync::mpsc::unbounded_channel::<u8>();
        let on_progress: ProgressFn = Arc::new(move |pct| {
            let _ = progress_tx.send(pct);
        });

        let mut stream = ChunkedRenderer::stream(
            renderer,
            &content,
            &options,
            self.config.export.chunk_size,
            Some(on_progress),
        )
        .await?;

        let mut writer = self.store.create(id, format).await?;

        loop {
            // Cancellation is observed at chunk-yield boundaries
            if cancel_token.is_cancelled() {
                drop(stream);
                writer.discard().await.ok();
                return Ok(RunOutcome::Cancelled);
            }

            let Some(item) = stream.next().await else {
                break;
            };
            let chunk = match item {
                Ok(chunk) => chunk,
                Err(e) => {
                    writer.discard().await.ok();
                    return Err(e);
                }
            };
            if let Err(e) = writer.write_chunk(&chunk).await {
                writer.discard().await.ok();
                return Err(e);
            }

            while let Ok(pct) = progress_rx.try_recv() {
                if let Err(e) = self.report_progress(id, pct).await {
                    writer.discard().await.ok();
                    return Err(e);
                }
            }
        }

        // Final reports can land together with the last chunk
        while let Ok(pct) = progress_rx.try_recv() {
            if let Err(e) = self.report_progress(id, pct).await {
                writer.discard().await.ok();
                return Err(e);
            }
        }

        let stored = writer.finish().await?;
        Ok(RunOutcome::Completed {
            location: stored.path.display().to_string(),
            size_bytes: stored.size_bytes,
        })
    }

    /// Persist one progress report and fan it out
    async fn report_progress(&self, id: &TaskId, pct: u8) -> Result<()> {
        self.db.update_progress(id, pct).await?;
        self.hub.publish(
            id,
            ProgressEvent::Progress {
                progress: pct,
                message: format!("export {pct}% complete"),
            },
        );
        Ok(())
    }

    /// Record a cancellation and tell subscribers, in that order
    pub(crate) async fn settle_cancelled(&self, id: &TaskId) {
        match self.db.cancel_task(id).await {
            Ok(true) => {
                tracing::info!(task_id = %id, "export cancelled");
                self.hub.publish(id, ProgressEvent::Cancelled);
            }
            Ok(false) => {
                tracing::debug!(task_id = %id, "cancel settled by someone else");
            }
            Err(e) => {
                tracing::error!(task_id = %id, error = %e, "failed to record cancellation");
            }
        }
    }

    /// Record a failure and publish exactly one error event
    async fn settle_failed(&self, id: &TaskId, error: &Error) {
        let message = error.to_string();
        tracing::error!(task_id = %id, error = %error, "export failed");
        match self.db.fail_task(id, &message, error.error_code()).await {
            Ok(true) => {
                self.hub.publish(
                    id,
                    ProgressEvent::Error {
                        error_message: message,
                    },
                );
            }
            Ok(false) => {
                tracing::warn!(task_id = %id, "task left processing before failure could be recorded");
            }
            Err(e) => {
                tracing::error!(task_id = %id, error = %e, "failed to record failure");
            }
        }
    }
}
