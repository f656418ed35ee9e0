//! Lexical index
//!
//! BM25 full-text search via tantivy. Each document stores the raw chunk
//! text plus the chunk identifier shared with the vector index and chunk
//! store, so search hits resolve straight back to chunk records.

use crate::error::RagError;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::{Schema, Value, INDEXED, STORED, TEXT};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument};

const WRITER_HEAP_BYTES: usize = 50_000_000;

/// Inverted index over chunk content, keyed by chunk identifier.
pub struct LexicalIndex {
    index: Index,
    reader: IndexReader,
    /// Present only for ingest sessions; query sessions open read-only.
    writer: Option<Mutex<IndexWriter>>,
    chunk_id_field: tantivy::schema::Field,
    content_field: tantivy::schema::Field,
    #[allow(dead_code)]
    dir: PathBuf,
}

impl std::fmt::Debug for LexicalIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LexicalIndex").field("dir", &self.dir).finish()
    }
}

impl LexicalIndex {
    /// Open the index for writing, creating it when absent.
    pub fn create_or_open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .context(format!("Failed to create lexical index directory: {:?}", dir))?;

        let index = if dir.join("meta.json").exists() {
            Index::open_in_dir(dir).context("Failed to open tantivy index")?
        } else {
            tracing::info!("Creating lexical index in {:?}", dir);
            Index::create_in_dir(dir, Self::schema())?
        };

        let writer: IndexWriter = index.writer(WRITER_HEAP_BYTES)?;
        Self::assemble(index, Some(writer), dir)
    }

    /// Open an existing index for search only.
    pub fn open_readonly(dir: &Path) -> Result<Self> {
        if !dir.join("meta.json").exists() {
            return Err(RagError::Resource(format!(
                "lexical index {:?} not found; run ingest first",
                dir
            ))
            .into());
        }
        let index = Index::open_in_dir(dir).context("Failed to open tantivy index")?;
        Self::assemble(index, None, dir)
    }

    fn schema() -> Schema {
        let mut builder = Schema::builder();
        builder.add_i64_field("chunk_id", INDEXED | STORED);
        builder.add_text_field("content", TEXT | STORED);
        builder.build()
    }

    fn assemble(index: Index, writer: Option<IndexWriter>, dir: &Path) -> Result<Self> {
        let schema = index.schema();
        let chunk_id_field = schema
            .get_field("chunk_id")
            .context("chunk_id field not found in schema")?;
        let content_field = schema
            .get_field("content")
            .context("content field not found in schema")?;

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()?;

        Ok(Self {
            index,
            reader,
            writer: writer.map(Mutex::new),
            chunk_id_field,
            content_field,
            dir: dir.to_path_buf(),
        })
    }

    /// Queue a document for the next commit.
    pub fn add_document(&self, chunk_id: i64, content: &str) -> Result<()> {
        let writer = self
            .writer
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("lexical index opened read-only"))?;
        let writer = writer.lock().expect("lexical writer mutex poisoned");
        writer.add_document(doc!(
            self.chunk_id_field => chunk_id,
            self.content_field => content,
        ))?;
        Ok(())
    }

    /// Commit queued documents and refresh the reader.
    pub fn commit(&self) -> Result<()> {
        let writer = self
            .writer
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("lexical index opened read-only"))?;
        writer
            .lock()
            .expect("lexical writer mutex poisoned")
            .commit()?;
        self.reader.reload()?;
        tracing::debug!("Lexical index committed");
        Ok(())
    }

    /// BM25 search returning `(chunk_id, score)` in descending score order.
    ///
    /// Queries are parsed leniently: free-form question text never fails the
    /// search, unparseable fragments are just dropped.
    pub fn search(&self, query_text: &str, top_k: usize) -> Result<Vec<(i64, f32)>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let searcher = self.reader.searcher();
        let query_parser = QueryParser::for_index(&self.index, vec![self.content_field]);
        let (query, _errors) = query_parser.parse_query_lenient(query_text);

        let top_docs = searcher.search(&query, &TopDocs::with_limit(top_k))?;

        let mut results = Vec::with_capacity(top_docs.len());
        for (score, doc_address) in top_docs {
            let retrieved: TantivyDocument = searcher.doc(doc_address)?;
            if let Some(chunk_id) = retrieved
                .get_first(self.chunk_id_field)
                .and_then(|value| value.as_i64())
            {
                results.push((chunk_id, score));
            }
        }
        Ok(results)
    }

    /// Number of committed documents.
    pub fn num_docs(&self) -> u64 {
        self.reader.searcher().num_docs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_build_and_search() {
        let dir = TempDir::new().unwrap();
        let index = LexicalIndex::create_or_open(dir.path()).unwrap();

        index
            .add_document(1, "Rust is a systems programming language")
            .unwrap();
        index
            .add_document(2, "Python is popular for data science")
            .unwrap();
        index.commit().unwrap();

        let results = index.search("systems programming", 5).unwrap();
        assert!(!results.is_empty());
        assert_eq!(results[0].0, 1);
    }

    #[test]
    fn test_reopen_after_commit() {
        let dir = TempDir::new().unwrap();
        {
            let index = LexicalIndex::create_or_open(dir.path()).unwrap();
            index.add_document(5, "persistent content").unwrap();
            index.commit().unwrap();
        }

        let reopened = LexicalIndex::open_readonly(dir.path()).unwrap();
        assert_eq!(reopened.num_docs(), 1);
        let results = reopened.search("persistent", 3).unwrap();
        assert_eq!(results[0].0, 5);
    }

    #[test]
    fn test_readonly_rejects_writes() {
        let dir = TempDir::new().unwrap();
        {
            let index = LexicalIndex::create_or_open(dir.path()).unwrap();
            index.commit().unwrap();
        }
        let readonly = LexicalIndex::open_readonly(dir.path()).unwrap();
        assert!(readonly.add_document(1, "nope").is_err());
    }

    #[test]
    fn test_missing_index_is_a_resource_error() {
        let dir = TempDir::new().unwrap();
        let err = LexicalIndex::open_readonly(&dir.path().join("absent")).unwrap_err();
        let rag = err.downcast_ref::<RagError>().unwrap();
        assert!(matches!(rag, RagError::Resource(_)));
    }

    #[test]
    fn test_search_empty_index_returns_nothing() {
        let dir = TempDir::new().unwrap();
        let index = LexicalIndex::create_or_open(dir.path()).unwrap();
        index.commit().unwrap();
        let results = index.search("anything at all", 10).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_question_punctuation_is_tolerated() {
        let dir = TempDir::new().unwrap();
        let index = LexicalIndex::create_or_open(dir.path()).unwrap();
        index.add_document(3, "the capital of France is Paris").unwrap();
        index.commit().unwrap();

        // Lenient parsing: the question mark and quotes never error.
        let results = index.search("what is the \"capital\" of France?", 5).unwrap();
        assert!(!results.is_empty());
        assert_eq!(results[0].0, 3);
    }
}
