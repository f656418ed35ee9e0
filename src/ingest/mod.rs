//! Ingest session
//!
//! Walks a corpus folder, extracts and chunks each document, embeds the
//! chunks in batches, and appends them through the index writer. Per-file
//! failures are reported and skipped; only cancellation and configuration
//! errors abort the session. The vector index is persisted once, at the end
//! of the session.

pub mod chunker;
pub mod extract;

pub use chunker::{chunker_for, ChunkConfig, Chunker, SentenceChunker, WindowChunker};
pub use extract::{extractor_for, TextExtractor};

use crate::embedding::Embedder;
use crate::error::{self, RagError};
use crate::index::{ChunkInsert, IndexWriter};
use crate::store::NewChunk;
use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

/// Outcome summary of one ingest session.
#[derive(Debug, Default, Clone, Copy)]
pub struct IngestReport {
    pub files_processed: usize,
    pub files_skipped: usize,
    pub chunks_indexed: usize,
}

/// Single-writer ingest session over a corpus folder.
pub struct IngestSession {
    writer: IndexWriter,
    embedder: Arc<dyn Embedder>,
    chunker: Box<dyn Chunker>,
    batch_size: usize,
    cancel: CancellationToken,
}

impl IngestSession {
    pub fn new(
        writer: IndexWriter,
        embedder: Arc<dyn Embedder>,
        chunker: Box<dyn Chunker>,
        batch_size: usize,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            writer,
            embedder,
            chunker,
            batch_size: batch_size.max(1),
            cancel,
        }
    }

    /// Ingest every supported file under `folder`.
    pub async fn run(&mut self, folder: &Path) -> Result<IngestReport> {
        if !folder.is_dir() {
            return Err(RagError::Config(format!(
                "ingest path {:?} is not a directory",
                folder
            ))
            .into());
        }

        let mut files: Vec<_> = WalkDir::new(folder)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .collect();
        files.sort();

        tracing::info!("Ingesting {} file(s) from {:?}", files.len(), folder);
        let mut report = IngestReport::default();

        for path in files {
            if self.cancel.is_cancelled() {
                return Err(RagError::Cancelled.into());
            }
            match self.process_file(&path).await {
                Ok(count) => {
                    report.files_processed += 1;
                    report.chunks_indexed += count;
                    tracing::info!("Indexed {:?}: {} chunk(s)", path, count);
                }
                Err(err) if error::is_cancelled(&err) => return Err(err),
                Err(err) => {
                    if err
                        .downcast_ref::<RagError>()
                        .map_or(false, RagError::is_per_file)
                    {
                        tracing::warn!("Skipping {:?}: {}", path, err);
                        report.files_skipped += 1;
                    } else {
                        return Err(err.context(format!("ingest failed on {:?}", path)));
                    }
                }
            }
        }

        // Big commit: the vector index file is replaced once per session.
        self.writer.save_vector_index()?;

        tracing::info!(
            "Ingest complete: {} file(s) processed, {} skipped, {} chunk(s) indexed",
            report.files_processed,
            report.files_skipped,
            report.chunks_indexed
        );
        Ok(report)
    }

    /// Wipe all stores before ingesting (`--fresh`).
    pub fn reset(&mut self) -> Result<()> {
        self.writer.reset()
    }

    /// Chunks currently in the store.
    pub fn size(&self) -> Result<usize> {
        self.writer.size()
    }

    pub fn writer(&self) -> &IndexWriter {
        &self.writer
    }

    async fn process_file(&mut self, path: &Path) -> Result<usize> {
        let Some(extractor) = extractor_for(path) else {
            return Err(RagError::UserContent(format!(
                "unsupported file extension: {:?}",
                path
            ))
            .into());
        };

        let text = extractor.extract(path)?;
        if text.trim().is_empty() {
            return Err(
                RagError::UserContent(format!("no text extracted from {:?}", path)).into(),
            );
        }

        let chunks = self.chunker.chunk(&text);
        if chunks.is_empty() {
            return Err(
                RagError::UserContent(format!("no chunks produced from {:?}", path)).into(),
            );
        }

        let source_uri = path.to_string_lossy().to_string();
        let source_type = extract::source_type(path);
        let total_chunks = chunks.len();
        let mut indexed = 0;

        for (batch_start, batch) in chunks
            .chunks(self.batch_size)
            .enumerate()
            .map(|(i, batch)| (i * self.batch_size, batch))
        {
            if self.cancel.is_cancelled() {
                return Err(RagError::Cancelled.into());
            }

            let embedder = Arc::clone(&self.embedder);
            let texts: Vec<String> = batch.to_vec();
            let embeddings =
                tokio::task::spawn_blocking(move || embedder.embed_batch(&texts))
                    .await
                    .context("embedding task failed")??;

            let inserts: Vec<ChunkInsert> = batch
                .iter()
                .zip(embeddings)
                .enumerate()
                .map(|(offset, (content, vector))| ChunkInsert {
                    chunk: NewChunk {
                        content: content.clone(),
                        source_uri: source_uri.clone(),
                        source_type: source_type.clone(),
                        chunk_index: batch_start + offset,
                        total_chunks,
                        vector_digest: None,
                    },
                    vector,
                })
                .collect();

            let ids = self.writer.add_batch(&inserts)?;
            indexed += ids.len();
        }

        Ok(indexed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use std::fs;
    use tempfile::TempDir;

    fn session_in(dir: &Path, cancel: CancellationToken) -> IngestSession {
        let writer = IndexWriter::open(
            &dir.join("chunks.db"),
            &dir.join("vectors.idx"),
            &dir.join("lexical"),
            8,
        )
        .unwrap();
        IngestSession::new(
            writer,
            Arc::new(HashEmbedder::new(8)),
            Box::new(WindowChunker::new(ChunkConfig {
                chunk_size: 64,
                chunk_overlap: 8,
            })),
            4,
            cancel,
        )
    }

    #[tokio::test]
    async fn test_ingest_mixed_folder() {
        let dir = TempDir::new().unwrap();
        let corpus = dir.path().join("corpus");
        fs::create_dir(&corpus).unwrap();
        fs::write(corpus.join("a.txt"), "alpha document with searchable text").unwrap();
        fs::write(corpus.join("b.md"), "# Beta\n\nsecond document body").unwrap();
        fs::write(corpus.join("empty.txt"), "   ").unwrap();
        fs::write(corpus.join("binary.png"), [0u8, 1, 2, 3]).unwrap();

        let mut session = session_in(dir.path(), CancellationToken::new());
        let report = session.run(&corpus).await.unwrap();

        assert_eq!(report.files_processed, 2);
        assert_eq!(report.files_skipped, 2);
        assert!(report.chunks_indexed >= 2);

        // All three stores agree on the chunk count.
        let writer = session.writer();
        assert_eq!(writer.size().unwrap(), report.chunks_indexed);
        assert_eq!(writer.vectors().unwrap().len(), report.chunks_indexed);
        assert_eq!(
            writer.lexical().unwrap().num_docs() as usize,
            report.chunks_indexed
        );

        // The session saved the vector index.
        assert!(dir.path().join("vectors.idx").exists());
    }

    #[tokio::test]
    async fn test_ingest_missing_folder_is_config_error() {
        let dir = TempDir::new().unwrap();
        let mut session = session_in(dir.path(), CancellationToken::new());
        let err = session.run(&dir.path().join("nope")).await.unwrap_err();
        let rag = err.downcast_ref::<RagError>().unwrap();
        assert!(matches!(rag, RagError::Config(_)));
    }

    #[tokio::test]
    async fn test_cancellation_aborts_session() {
        let dir = TempDir::new().unwrap();
        let corpus = dir.path().join("corpus");
        fs::create_dir(&corpus).unwrap();
        fs::write(corpus.join("a.txt"), "some content").unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut session = session_in(dir.path(), cancel);

        let err = session.run(&corpus).await.unwrap_err();
        assert!(error::is_cancelled(&err));
    }

    #[tokio::test]
    async fn test_fresh_reset_then_ingest() {
        let dir = TempDir::new().unwrap();
        let corpus = dir.path().join("corpus");
        fs::create_dir(&corpus).unwrap();
        fs::write(corpus.join("first.txt"), "original corpus file").unwrap();

        let mut session = session_in(dir.path(), CancellationToken::new());
        session.run(&corpus).await.unwrap();
        let before = session.size().unwrap();
        assert!(before > 0);

        // Fresh rebuild drops the old state entirely.
        session.reset().unwrap();
        assert_eq!(session.size().unwrap(), 0);

        fs::write(corpus.join("second.txt"), "replacement corpus file").unwrap();
        let report = session.run(&corpus).await.unwrap();
        assert_eq!(report.files_processed, 2);
        assert_eq!(session.size().unwrap(), report.chunks_indexed);
    }

    #[tokio::test]
    async fn test_chunk_metadata_is_recorded() {
        let dir = TempDir::new().unwrap();
        let corpus = dir.path().join("corpus");
        fs::create_dir(&corpus).unwrap();
        let long_text = "word ".repeat(100);
        fs::write(corpus.join("long.txt"), &long_text).unwrap();

        let mut session = session_in(dir.path(), CancellationToken::new());
        let report = session.run(&corpus).await.unwrap();
        assert!(report.chunks_indexed > 1);

        let store = session.writer().chunks().unwrap();
        let records = store
            .by_source(&corpus.join("long.txt").to_string_lossy())
            .unwrap();
        assert_eq!(records.len(), report.chunks_indexed);
        for (i, record) in records.iter().enumerate() {
            assert_eq!(record.chunk_index, i);
            assert_eq!(record.total_chunks, report.chunks_indexed);
            assert_eq!(record.source_type, "txt");
            assert!(record.vector_digest.is_some());
        }
    }
}
