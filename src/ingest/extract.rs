//! Text extraction
//!
//! Seam between the ingest loop and format-specific extraction. Plain-text
//! formats are handled in-tree; PDF, HTML, and OCR extraction belong to
//! external collaborators plugged in through the same trait.

use crate::error::RagError;
use anyhow::Result;
use std::path::Path;

/// Extracts UTF-8 text from a source file.
pub trait TextExtractor: Send + Sync {
    fn extract(&self, path: &Path) -> Result<String>;
}

/// Reads the file as UTF-8 text verbatim.
pub struct PlainTextExtractor;

impl TextExtractor for PlainTextExtractor {
    fn extract(&self, path: &Path) -> Result<String> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RagError::TransientIo(format!("failed to read {:?}: {}", path, e))
        })?;
        Ok(content)
    }
}

static PLAIN_TEXT: PlainTextExtractor = PlainTextExtractor;

/// Resolve the extractor for a file, by extension.
///
/// Returns `None` for unsupported formats; the ingest loop reports those
/// per file and moves on.
pub fn extractor_for(path: &Path) -> Option<&'static dyn TextExtractor> {
    let ext = path.extension()?.to_str()?.to_lowercase();
    match ext.as_str() {
        "txt" | "text" | "md" | "markdown" | "log" => Some(&PLAIN_TEXT),
        _ => None,
    }
}

/// File extension, lowercased, for source-type bookkeeping.
pub fn source_type(path: &Path) -> String {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase())
        .unwrap_or_else(|| "unknown".to_string())
}
