//! # doc-export
//!
//! Embeddable document-export pipeline for education-platform backends.
//!
//! ## Design Philosophy
//!
//! doc-export is designed to be:
//! - **Bounded** - A counting-semaphore admission gate caps concurrent renders
//! - **Streaming** - Artifacts are produced as bounded-size chunks with
//!   natural backpressure, never buffered unboundedly
//! - **Observable** - Per-task progress fan-out over WebSocket, with the
//!   durable task record as the source of truth
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//!
//! ## Quick Start
//!
//! ```no_run
//! use doc_export::{Config, ExportPipeline, RendererRegistry};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!
//!     // Serve markdown out of the box; register Word/PDF/PPTX renderers
//!     // from the embedding application as needed.
//!     let renderers = RendererRegistry::with_defaults();
//!
//!     let pipeline = ExportPipeline::new(config, renderers).await?;
//!
//!     // Serve the REST/WebSocket API alongside export processing
//!     let _api = pipeline.spawn_api_server();
//!
//!     // Run until SIGTERM/SIGINT, then drain gracefully
//!     doc_export::run_with_shutdown(pipeline).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// REST API and WebSocket progress channel
pub mod api;
/// Configuration types
pub mod config;
/// Database persistence layer
pub mod db;
/// Error types
pub mod error;
/// Admission control for concurrent exports
pub mod gate;
/// Per-task progress fan-out
pub mod hub;
/// Core export pipeline (decomposed into focused submodules)
pub mod pipeline;
/// Document renderers and chunked streaming
pub mod render;
/// Artifact storage
pub mod storage;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use config::{ApiConfig, Config, ExportConfig, PersistenceConfig};
pub use db::Database;
pub use error::{
    ApiError, DatabaseError, Error, ErrorDetail, ExportError, Result, ToHttpStatus,
};
pub use gate::{Admission, RateGate, SlotGuard};
pub use hub::{ProgressHub, SubscriberId};
pub use pipeline::ExportPipeline;
pub use render::{
    ChunkStream, ChunkedRenderer, DocumentRenderer, RenderStream, RendererRegistry,
    markdown::MarkdownRenderer,
};
pub use types::{
    ContentSection, ContentSpec, ExportFormat, ExportOptions, ExportRequest, PipelineStats,
    ProgressEvent, TaskId, TaskInfo, TaskStatus,
};

/// Helper function to run the pipeline with graceful signal handling.
///
/// Waits for a termination signal and then calls the pipeline's `shutdown()`
/// method.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use doc_export::{Config, ExportPipeline, RendererRegistry, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let pipeline = ExportPipeline::new(Config::default(), RendererRegistry::with_defaults()).await?;
///
///     // Run with automatic signal handling
///     run_with_shutdown(pipeline).await?;
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(pipeline: ExportPipeline) -> Result<()> {
    wait_for_signal().await;
    pipeline.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Signal registration may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
