//! Text chunking
//!
//! Splits extracted document text into indexable chunks: a character-window
//! splitter with configurable overlap, and a sentence-aware variant that
//! packs whole sentences up to the size budget.

use crate::config::Config;
use unicode_segmentation::UnicodeSegmentation;

/// Chunking parameters, measured in characters.
#[derive(Debug, Clone, Copy)]
pub struct ChunkConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1600,
            chunk_overlap: 200,
        }
    }
}

/// Trait for text chunking strategies.
pub trait Chunker: Send + Sync {
    /// Split text into chunks. Whitespace-only fragments are dropped.
    fn chunk(&self, text: &str) -> Vec<String>;
}

/// Fixed-size character windows with overlap carried from the previous chunk.
pub struct WindowChunker {
    config: ChunkConfig,
}

impl WindowChunker {
    pub fn new(config: ChunkConfig) -> Self {
        Self { config }
    }
}

impl Chunker for WindowChunker {
    fn chunk(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        if chars.is_empty() {
            return Vec::new();
        }

        let step = self
            .config
            .chunk_size
            .saturating_sub(self.config.chunk_overlap)
            .max(1);

        let mut chunks = Vec::new();
        let mut start = 0;
        while start < chars.len() {
            let end = (start + self.config.chunk_size).min(chars.len());
            let piece: String = chars[start..end].iter().collect();
            if !piece.trim().is_empty() {
                chunks.push(piece);
            }
            if end >= chars.len() {
                break;
            }
            start += step;
        }
        chunks
    }
}

/// Sentence-aware chunker that never splits inside a sentence.
pub struct SentenceChunker {
    config: ChunkConfig,
}

impl SentenceChunker {
    pub fn new(config: ChunkConfig) -> Self {
        Self { config }
    }
}

impl Chunker for SentenceChunker {
    fn chunk(&self, text: &str) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut current = String::new();

        for sentence in text.unicode_sentences() {
            if !current.is_empty() && current.len() + sentence.len() > self.config.chunk_size {
                let piece = current.trim().to_string();
                if !piece.is_empty() {
                    chunks.push(piece);
                }
                current.clear();
            }
            current.push_str(sentence);

            // A single sentence larger than the budget falls back to windows.
            if current.len() > self.config.chunk_size && !current.trim().is_empty() {
                let window = WindowChunker::new(self.config);
                chunks.extend(window.chunk(&current));
                current.clear();
            }
        }

        let piece = current.trim().to_string();
        if !piece.is_empty() {
            chunks.push(piece);
        }
        chunks
    }
}

/// Pick the chunking strategy the configuration asks for.
pub fn chunker_for(config: &Config) -> Box<dyn Chunker> {
    let chunk_config = ChunkConfig {
        chunk_size: config.chunk_size,
        chunk_overlap: config.chunk_overlap,
    };
    if config.enable_semantic_chunking {
        Box::new(SentenceChunker::new(chunk_config))
    } else {
        Box::new(WindowChunker::new(chunk_config))
    }
}
