//! Shared test helpers for creating ExportPipeline instances in tests.

use crate::config::Config;
use crate::error::{Error, ExportError, Result};
use crate::pipeline::ExportPipeline;
use crate::render::{DocumentRenderer, RenderStream, RendererRegistry};
use crate::types::{
    ContentSection, ContentSpec, ExportFormat, ExportOptions, ExportRequest, TaskId, TaskStatus,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tempfile::{TempDir, tempdir};

/// Streaming stub renderer with tunable shape, pacing, and failure injection.
///
/// `piece_delay` blocks inside the chunk iterator, so paced tests must run on
/// the multi-thread runtime flavor.
pub(crate) struct StubRenderer {
    pub(crate) pieces: usize,
    pub(crate) piece_size: usize,
    pub(crate) piece_delay: Option<Duration>,
    pub(crate) fail_after: Option<usize>,
}

impl StubRenderer {
    pub(crate) fn quick() -> Self {
        Self {
            pieces: 8,
            piece_size: 700,
            piece_delay: None,
            fail_after: None,
        }
    }

    pub(crate) fn slow(pieces: usize, piece_delay: Duration) -> Self {
        Self {
            pieces,
            piece_size: 700,
            piece_delay: Some(piece_delay),
            fail_after: None,
        }
    }

    pub(crate) fn failing_after(pieces_before_failure: usize) -> Self {
        Self {
            pieces: 8,
            piece_size: 700,
            piece_delay: None,
            fail_after: Some(pieces_before_failure),
        }
    }
}

#[async_trait]
impl DocumentRenderer for StubRenderer {
    fn name(&self) -> &str {
        "stub"
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    async fn render(&self, _: &ContentSpec, _: &ExportOptions) -> Result<Vec<u8>> {
        Ok(vec![7u8; self.pieces * self.piece_size])
    }

    async fn render_chunks(&self, _: &ContentSpec, _: &ExportOptions) -> Result<RenderStream> {
        let piece_size = self.piece_size;
        let piece_delay = self.piece_delay;
        let fail_after = self.fail_after;
        let chunks = (0..self.pieces).map(move |i| {
            if let Some(delay) = piece_delay {
                std::thread::sleep(delay);
            }
            if fail_after.is_some_and(|n| i >= n) {
                return Err(Error::Export(ExportError::RenderFailed {
                    reason: "stub renderer failure".to_string(),
                }));
            }
            Ok(vec![(i % 251) as u8; piece_size])
        });
        Ok(RenderStream {
            total_bytes: Some((self.pieces * self.piece_size) as u64),
            chunks: Box::new(chunks),
        })
    }
}

/// Build a registry serving PDF exports through the given stub
pub(crate) fn stub_registry(renderer: StubRenderer) -> RendererRegistry {
    let registry = RendererRegistry::new();
    registry.register(ExportFormat::Pdf, std::sync::Arc::new(renderer));
    registry
}

/// Helper to create a test ExportPipeline backed by a temp directory.
/// Returns the pipeline and the tempdir (which must be kept alive).
pub(crate) async fn create_test_pipeline(
    registry: RendererRegistry,
    tune: impl FnOnce(&mut Config),
) -> (ExportPipeline, TempDir) {
    let temp_dir = tempdir().unwrap();

    let mut config = Config::default();
    config.persistence.database_path = temp_dir.path().join("test.db");
    config.export.output_dir = temp_dir.path().join("exports");
    config.export.chunk_size = 1024;
    config.export.admission_timeout = Duration::from_secs(5);
    tune(&mut config);

    let pipeline = ExportPipeline::new(config, registry).await.unwrap();
    (pipeline, temp_dir)
}

/// A valid export request for the stubbed PDF format
pub(crate) fn sample_request(format: ExportFormat) -> ExportRequest {
    ExportRequest {
        user_id: "teacher-1".to_string(),
        source_document_id: "doc-42".to_string(),
        format,
        template_id: None,
        options: ExportOptions::default(),
        content: ContentSpec {
            title: "Fractions worksheet".to_string(),
            sections: vec![ContentSection {
                heading: "Adding fractions".to_string(),
                body: "1/2 + 1/3 = ?".to_string(),
                answers: Some("5/6".to_string()),
            }],
            template_variables: HashMap::new(),
        },
    }
}

/// Poll until the task reaches the wanted status or the timeout elapses
pub(crate) async fn wait_for_status(
    pipeline: &ExportPipeline,
    id: &TaskId,
    wanted: TaskStatus,
    timeout: Duration,
) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let info = pipeline.get_task(id).await.unwrap();
        if info.status == wanted {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
