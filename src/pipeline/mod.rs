//! Core export pipeline split into focused submodules.
//!
//! The `ExportPipeline` struct and its methods are organized by domain:
//! - [`runner`] - One export end-to-end (admission, rendering, storage)
//! - [`control`] - Task lifecycle control (cancel, retry)
//! - [`lifecycle`] - Startup recovery and shutdown coordination

mod control;
mod lifecycle;
mod runner;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use crate::config::Config;
use crate::db::{Database, NewTask};
use crate::error::{Error, ExportError, Result};
use crate::gate::RateGate;
use crate::hub::{ProgressHub, SubscriberId};
use crate::render::RendererRegistry;
use crate::storage::ResultStore;
use crate::types::{
    ExportRequest, PipelineStats, ProgressEvent, TaskId, TaskInfo, TaskSnapshot,
};
use std::sync::Arc;

/// Active task tracking (cancellation and shutdown state)
#[derive(Clone)]
pub(crate) struct ActiveTasks {
    /// Map of running exports to their cancellation tokens
    pub(crate) tokens: std::sync::Arc<
        tokio::sync::Mutex<std::collections::HashMap<TaskId, tokio_util::sync::CancellationToken>>,
    >,
    /// Flag cleared during shutdown so no new exports start
    pub(crate) accepting_new: std::sync::Arc<std::sync::atomic::AtomicBool>,
}

/// Main export pipeline instance (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct ExportPipeline {
    /// Database instance for persistence (wrapped in Arc for sharing across tasks)
    /// Public for integration tests to query task status
    pub db: Arc<Database>,
    /// Configuration (wrapped in Arc for sharing across tasks)
    pub(crate) config: Arc<Config>,
    /// Admission gate bounding concurrent exports
    pub(crate) gate: RateGate,
    /// Per-task progress fan-out
    pub(crate) hub: ProgressHub,
    /// Per-format document renderers, injected at construction
    pub(crate) renderers: Arc<RendererRegistry>,
    /// Artifact storage under the configured output directory
    pub(crate) store: ResultStore,
    /// Active task tracking
    pub(crate) active_tasks: ActiveTasks,
}

impl ExportPipeline {
    /// Create a new ExportPipeline instance
    ///
    /// This initializes all core components:
    /// - Creates the output directory
    /// - Opens/creates the SQLite database and runs migrations
    /// - Marks tasks interrupted by a previous unclean shutdown as Failed
    /// - Sets up the admission gate and progress hub
    ///
    /// The renderer registry is injected so embedding applications decide
    /// which formats are served and by what.
    pub async fn new(config: Config, renderers: RendererRegistry) -> Result<Self> {
        let store = ResultStore::new(config.export.output_dir.clone()).await?;

        let db = Database::new(&config.persistence.database_path).await?;

        // Tasks left Processing by a crash have no runner; give clients a
        // terminal truth before anything new starts.
        let recovered = db.recover_interrupted_tasks().await?;
        if recovered > 0 {
            tracing::warn!(recovered, "marked interrupted exports as failed on startup");
        }

        let gate = RateGate::new(config.export.max_concurrent_exports);
        let hub = ProgressHub::new();

        let active_tasks = ActiveTasks {
            tokens: std::sync::Arc::new(tokio::sync::Mutex::new(std::collections::HashMap::new())),
            accepting_new: std::sync::Arc::new(std::sync::atomic::AtomicBool::new(true)),
        };

        Ok(Self {
            db: Arc::new(db),
            config: Arc::new(config),
            gate,
            hub,
            renderers: Arc::new(renderers),
            store,
            active_tasks,
        })
    }

    /// Create a new export task in Pending state
    ///
    /// Validates the request up front: the format must have a registered
    /// renderer and the content must be renderable. Nothing is persisted for
    /// an invalid request.
    pub async fn create_task(&self, request: ExportRequest) -> Result<TaskId> {
        if !self
            .active_tasks
            .accepting_new
            .load(std::sync::atomic::Ordering::SeqCst)
        {
            return Err(Error::ShuttingDown);
        }

        if self.renderers.get(request.format).is_none() {
            return Err(Error::Export(ExportError::UnsupportedFormat {
                format: request.format.as_str().to_string(),
            }));
        }
        if let Some(reason) = request.content.validation_error() {
            return Err(Error::Export(ExportError::InvalidInput { reason }));
        }

        let id = TaskId::generate();
        let task = NewTask {
            id: id.clone(),
            user_id: request.user_id,
            source_document_id: request.source_document_id,
            format: request.format,
            template_id: request.template_id,
            content_json: serde_json::to_string(&request.content)?,
            options_json: serde_json::to_string(&request.options)?,
        };
        self.db.insert_task(&task).await?;

        tracing::info!(
            task_id = %id,
            user_id = %task.user_id,
            format = task.format.as_str(),
            "export task created"
        );
        Ok(id)
    }

    /// Get an export task by id
    pub async fn get_task(&self, id: &TaskId) -> Result<TaskInfo> {
        let row = self
            .db
            .get_task(id)
            .await?
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        Ok(TaskInfo::from(&row))
    }

    /// List all export tasks, newest first
    pub async fn list_tasks(&self) -> Result<Vec<TaskInfo>> {
        let rows = self.db.list_tasks().await?;
        Ok(rows.iter().map(TaskInfo::from).collect())
    }

    /// List export tasks owned by a user, newest first
    pub async fn list_tasks_for_user(&self, user_id: &str) -> Result<Vec<TaskInfo>> {
        let rows = self.db.list_tasks_for_user(user_id).await?;
        Ok(rows.iter().map(TaskInfo::from).collect())
    }

    /// Subscribe to live progress for a task
    ///
    /// The first event is always `connected`; if the task is already terminal
    /// the matching terminal event follows immediately and the channel closes.
    pub async fn watch(
        &self,
        id: &TaskId,
    ) -> Result<(SubscriberId, tokio::sync::mpsc::Receiver<ProgressEvent>)> {
        let row = self
            .db
            .get_task(id)
            .await?
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        let snapshot = TaskSnapshot::from(&row);
        let (subscriber, rx) = self.hub.connect(&snapshot);

        // The runner may publish the terminal event between the row read
        // above and the hub registration; such a subscriber would wait
        // forever. Re-read and settle it if the task finished in the gap.
        if !snapshot.status.is_terminal() {
            let fresh = match self.db.get_task(id).await {
                Ok(row) => row.as_ref().map(TaskSnapshot::from),
                Err(e) => {
                    self.hub.disconnect(id, subscriber);
                    return Err(e);
                }
            };
            if let Some(terminal) = fresh.and_then(|s| s.terminal_event()) {
                self.hub.finish_subscriber(id, subscriber, terminal);
            }
        }

        Ok((subscriber, rx))
    }

    /// Drop a progress subscription; unknown ids are ignored
    pub fn unwatch(&self, id: &TaskId, subscriber: SubscriberId) {
        self.hub.disconnect(id, subscriber);
    }

    /// Combined gate and hub snapshot for health/metrics collectors
    pub fn stats(&self) -> PipelineStats {
        let gate = self.gate.status();
        let hub = self.hub.stats();
        PipelineStats {
            max_concurrent: gate.max,
            active: gate.active,
            queued: gate.queued,
            rejected_total: gate.rejected_total,
            completed_total: gate.completed_total,
            connection_count: hub.connection_count,
            active_task_ids: hub.task_ids,
        }
    }

    /// Get the current configuration
    ///
    /// The configuration is wrapped in an Arc, so this is a cheap clone.
    pub fn get_config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// Path to the stored artifact for a completed task
    pub(crate) fn store(&self) -> &ResultStore {
        &self.store
    }

    /// Spawn the REST API server in a background task
    ///
    /// The server runs concurrently with export processing and listens on the
    /// configured bind address (default: 127.0.0.1:8790).
    pub fn spawn_api_server(&self) -> tokio::task::JoinHandle<Result<()>> {
        let pipeline = self.clone();
        let config = self.config.clone();

        tokio::spawn(async move { crate::api::start_api_server(pipeline, config).await })
    }
}
