//! Built-in markdown renderer
//!
//! Markdown is plain text, so this is the one format the crate renders
//! without an injected collaborator. It streams natively: one piece per
//! document part, so arbitrarily long documents never sit in memory whole.

use super::{DocumentRenderer, RenderStream};
use crate::error::Result;
use crate::types::{ContentSpec, ExportOptions};
use async_trait::async_trait;
use std::collections::HashMap;

/// Renders the content tree as a markdown document
pub struct MarkdownRenderer;

impl MarkdownRenderer {
    /// Create the renderer
    pub fn new() -> Self {
        Self
    }

    /// Assemble the markdown pieces for one document
    fn pieces(&self, content: &ContentSpec, options: &ExportOptions) -> Vec<Vec<u8>> {
        let vars = &content.template_variables;
        let mut pieces = Vec::new();

        let title = substitute(&content.title, vars);
        pieces.push(format!("# {title}\n").into_bytes());

        for section in &content.sections {
            if let Some(wanted) = &options.sections {
                if !wanted.iter().any(|name| name == &section.heading) {
                    continue;
                }
            }

            let heading = substitute(&section.heading, vars);
            let body = substitute(&section.body, vars);
            let mut piece = format!("\n## {heading}\n\n{body}\n");

            if options.include_answers {
                if let Some(answers) = &section.answers {
                    let answers = substitute(answers, vars);
                    piece.push_str(&format!("\n### Answers\n\n{answers}\n"));
                }
            }
            pieces.push(piece.into_bytes());
        }
        pieces
    }
}

impl Default for MarkdownRenderer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentRenderer for MarkdownRenderer {
    fn name(&self) -> &str {
        "markdown"
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    async fn render(&self, content: &ContentSpec, options: &ExportOptions) -> Result<Vec<u8>> {
        Ok(self.pieces(content, options).concat())
    }

    async fn render_chunks(
        &self,
        content: &ContentSpec,
        options: &ExportOptions,
    ) -> Result<RenderStream> {
        let pieces = self.pieces(content, options);
        let total = pieces.iter().map(|p| p.len() as u64).sum();
        Ok(RenderStream {
            total_bytes: Some(total),
            chunks: Box::new(pieces.into_iter().map(Ok)),
        })
    }
}

/// Replace `{{key}}` placeholders with their configured values
///
/// Unknown placeholders are left as-is so a missing variable is visible in
/// the output instead of silently vanishing.
fn substitute(text: &str, vars: &HashMap<String, String>) -> String {
    let mut out = text.to_string();
    for (key, value) in vars {
        out = out.replace(&format!("{{{{{key}}}}}"), value);
    }
    out
}
