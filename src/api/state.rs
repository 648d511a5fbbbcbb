//! Application state for the API server

use crate::{Config, ExportPipeline};
use std::sync::Arc;

/// Shared application state accessible to all route handlers
///
/// This struct is cloned for each request (the pipeline itself is a cheap
/// Arc-backed clone) and provides access to the export pipeline and
/// configuration.
#[derive(Clone)]
pub struct AppState {
    /// The main ExportPipeline instance
    pub pipeline: ExportPipeline,

    /// Configuration (for read access)
    pub config: Arc<Config>,
}

impl AppState {
    /// Create a new AppState
    pub fn new(pipeline: ExportPipeline, config: Arc<Config>) -> Self {
        Self { pipeline, config }
    }
}
