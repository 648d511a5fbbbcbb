//! Document rendering and bounded-chunk streaming
//!
//! Renderers are pluggable: the crate knows nothing about Word/PDF/PPTX byte
//! formats, only about the [`DocumentRenderer`] capability. [`ChunkedRenderer`]
//! wraps any renderer into a pull-based [`Stream`] of bounded chunks so large
//! documents never have to sit in memory ahead of a slow consumer, and
//! reports monotonic 0-100 progress while doing so.

pub mod markdown;

use crate::error::{Error, ExportError, Result};
use crate::types::{ContentSpec, ExportFormat, ExportOptions};
use async_trait::async_trait;
use futures::Stream;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use std::task::{Context, Poll};

/// Smallest accepted chunk size (1 KiB)
pub const MIN_CHUNK_SIZE: usize = 1024;

/// Largest accepted chunk size (1 MiB)
pub const MAX_CHUNK_SIZE: usize = 1024 * 1024;

/// Progress callback invoked with percentages in 0..=100
///
/// Calls are monotonically increasing and 100 is reported exactly once, on
/// the final chunk of a successful stream.
pub type ProgressFn = Arc<dyn Fn(u8) + Send + Sync>;

/// Output of a natively-streaming renderer
pub struct RenderStream {
    /// Total artifact size in bytes, when the renderer knows it up front
    pub total_bytes: Option<u64>,
    /// Renderer-sized chunks, yielded lazily
    pub chunks: Box<dyn Iterator<Item = Result<Vec<u8>>> + Send>,
}

/// An opaque document-rendering capability
///
/// Implementations produce the artifact bytes for one format. Byte formats
/// are entirely the renderer's business; the pipeline only moves chunks.
#[async_trait]
pub trait DocumentRenderer: Send + Sync {
    /// Renderer name, for logs
    fn name(&self) -> &str;

    /// Whether this renderer can produce output incrementally
    ///
    /// Streaming renderers get their chunk iterator re-chunked to the
    /// requested size; buffered renderers are rendered once and sliced.
    fn supports_streaming(&self) -> bool {
        false
    }

    /// Render the whole artifact into memory
    async fn render(&self, content: &ContentSpec, options: &ExportOptions) -> Result<Vec<u8>>;

    /// Render incrementally
    ///
    /// Only called when [`supports_streaming`](Self::supports_streaming)
    /// returns true. The default falls back to a single whole-artifact chunk.
    async fn render_chunks(
        &self,
        content: &ContentSpec,
        options: &ExportOptions,
    ) -> Result<RenderStream> {
        let bytes = self.render(content, options).await?;
        Ok(RenderStream {
            total_bytes: Some(bytes.len() as u64),
            chunks: Box::new(std::iter::once(Ok(bytes))),
        })
    }
}

/// Wraps a [`DocumentRenderer`] into a bounded-chunk progress-reporting stream
pub struct ChunkedRenderer;

impl ChunkedRenderer {
    /// Validate inputs and produce a chunk stream for one export
    ///
    /// Fails fast with `InvalidChunkSize` or `InvalidInput` before any
    /// rendering work starts. The returned stream yields chunks of at most
    /// `chunk_size` bytes and drives `on_progress` as they are consumed.
    pub async fn stream(
        renderer: Arc<dyn DocumentRenderer>,
        content: &ContentSpec,
        options: &ExportOptions,
        chunk_size: usize,
        on_progress: Option<ProgressFn>,
    ) -> Result<ChunkStream> {
        if !(MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE).contains(&chunk_size) {
            return Err(Error::Export(ExportError::InvalidChunkSize {
                size: chunk_size,
                min: MIN_CHUNK_SIZE,
                max: MAX_CHUNK_SIZE,
            }));
        }
        if let Some(reason) = content.validation_error() {
            return Err(Error::Export(ExportError::InvalidInput { reason }));
        }

        let (source, total_bytes) = if renderer.supports_streaming() {
            let stream = renderer.render_chunks(content, options).await?;
            (
                Source::Native {
                    chunks: stream.chunks,
                    pending: Vec::new(),
                    exhausted: false,
                },
                stream.total_bytes,
            )
        } else {
            let bytes = renderer.render(content, options).await?;
            let total = bytes.len() as u64;
            (
                Source::Buffered {
                    buffer: Some(bytes),
                    offset: 0,
                },
                Some(total),
            )
        };

        Ok(ChunkStream {
            chunk_size,
            source,
            total_bytes,
            bytes_emitted: 0,
            last_progress: None,
            finished: false,
            on_progress,
        })
    }
}

enum Source {
    /// Render-then-slice: whole artifact buffered once, freed when exhausted
    Buffered {
        buffer: Option<Vec<u8>>,
        offset: usize,
    },
    /// Native streaming: renderer chunks re-chunked to the requested size
    Native {
        chunks: Box<dyn Iterator<Item = Result<Vec<u8>>> + Send>,
        pending: Vec<u8>,
        exhausted: bool,
    },
}

impl Source {
    /// Next chunk of at most `chunk_size` bytes, with a last-chunk flag
    fn next_chunk(&mut self, chunk_size: usize) -> Option<Result<(Vec<u8>, bool)>> {
        match self {
            Source::Buffered { buffer, offset } => {
                let buf = buffer.as_ref()?;
                if *offset >= buf.len() {
                    *buffer = None;
                    return None;
                }
                let end = (*offset + chunk_size).min(buf.len());
                let chunk = buf[*offset..end].to_vec();
                let is_last = end == buf.len();
                *offset = end;
                if is_last {
                    // Free the full artifact as soon as the last slice is out
                    *buffer = None;
                }
                Some(Ok((chunk, is_last)))
            }
            Source::Native {
                chunks,
                pending,
                exhausted,
            } => {
                while pending.len() < chunk_size && !*exhausted {
                    match chunks.next() {
                        Some(Ok(bytes)) => pending.extend_from_slice(&bytes),
                        Some(Err(e)) => return Some(Err(e)),
                        None => *exhausted = true,
                    }
                }
                if pending.is_empty() {
                    return None;
                }
                let take = chunk_size.min(pending.len());
                let rest = pending.split_off(take);
                let chunk = std::mem::replace(pending, rest);
                let is_last = *exhausted && pending.is_empty();
                Some(Ok((chunk, is_last)))
            }
        }
    }
}

/// Pull-based stream of bounded artifact chunks
///
/// Consumers drive the stream at their own pace; no chunk is produced ahead
/// of demand, which is what bounds memory for large documents.
pub struct ChunkStream {
    chunk_size: usize,
    source: Source,
    total_bytes: Option<u64>,
    bytes_emitted: u64,
    last_progress: Option<u8>,
    finished: bool,
    on_progress: Option<ProgressFn>,
}

impl std::fmt::Debug for ChunkStream {
    // source and on_progress hold non-Debug boxed values
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkStream")
            .field("chunk_size", &self.chunk_size)
            .field("total_bytes", &self.total_bytes)
            .field("bytes_emitted", &self.bytes_emitted)
            .field("last_progress", &self.last_progress)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl ChunkStream {
    /// Total artifact size, when known up front
    pub fn total_bytes(&self) -> Option<u64> {
        self.total_bytes
    }

    fn report(&mut self, pct: u8) {
        if self.last_progress.is_some_and(|last| pct <= last) {
            return;
        }
        self.last_progress = Some(pct);
        if let Some(on_progress) = &self.on_progress {
            on_progress(pct);
        }
    }

    fn report_intermediate(&mut self) {
        // Without a known total there is nothing honest to report until the
        // final chunk; 100 is never emitted early either way.
        let Some(total) = self.total_bytes.filter(|t| *t > 0) else {
            return;
        };
        let pct = ((self.bytes_emitted * 100 / total) as u8).min(99);
        self.report(pct);
    }
}

impl Stream for ChunkStream {
    type Item = Result<Vec<u8>>;

    fn poll_next(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }
        match this.source.next_chunk(this.chunk_size) {
            Some(Ok((chunk, is_last))) => {
                this.bytes_emitted += chunk.len() as u64;
                if is_last {
                    this.finished = true;
                    this.report(100);
                } else {
                    this.report_intermediate();
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            Some(Err(e)) => {
                // Already-yielded chunks stand; the failure ends the stream
                this.finished = true;
                Poll::Ready(Some(Err(e)))
            }
            None => {
                this.finished = true;
                this.report(100);
                Poll::Ready(None)
            }
        }
    }
}

/// Per-format renderer registry
///
/// Injected into the pipeline at construction; there is no global registry.
pub struct RendererRegistry {
    renderers: RwLock<HashMap<ExportFormat, Arc<dyn DocumentRenderer>>>,
}

impl RendererRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            renderers: RwLock::new(HashMap::new()),
        }
    }

    /// Create a registry with the built-in markdown renderer pre-registered
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        registry.register(
            ExportFormat::Markdown,
            Arc::new(markdown::MarkdownRenderer::new()),
        );
        registry
    }

    /// Register (or replace) the renderer for a format
    pub fn register(&self, format: ExportFormat, renderer: Arc<dyn DocumentRenderer>) {
        let mut renderers = self
            .renderers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        renderers.insert(format, renderer);
    }

    /// Look up the renderer for a format
    pub fn get(&self, format: ExportFormat) -> Option<Arc<dyn DocumentRenderer>> {
        let renderers = self
            .renderers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        renderers.get(&format).cloned()
    }

    /// Formats with a registered renderer
    pub fn formats(&self) -> Vec<ExportFormat> {
        let renderers = self
            .renderers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        renderers.keys().copied().collect()
    }
}

impl Default for RendererRegistry {
    fn default() -> Self {
        Self::new()
    }
}
