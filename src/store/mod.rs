//! Chunk store
//!
//! Authoritative SQLite-backed mapping from chunk identifier to chunk record.
//! Identifiers are assigned by the database on insert, strictly monotonic and
//! never reused while the store file lives; they are the join key shared with
//! the vector and lexical indexes.

use crate::error::RagError;
use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// A stored chunk of source-document text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// Identifier shared by the chunk store, vector index, and lexical index.
    pub id: i64,
    /// The chunk text content.
    pub content: String,
    /// URI of the source document.
    pub source_uri: String,
    /// Source kind (file extension or extractor name).
    pub source_type: String,
    /// Position of this chunk within its document.
    pub chunk_index: usize,
    /// Total chunks produced for the document.
    pub total_chunks: usize,
    /// Unix timestamp of insertion.
    pub created_at: i64,
    /// Optional digest of the embedded content.
    pub vector_digest: Option<String>,
}

/// Insert-side shape of a chunk, before an identifier exists.
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub content: String,
    pub source_uri: String,
    pub source_type: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub vector_digest: Option<String>,
}

/// SQLite-backed chunk store.
pub struct ChunkStore {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl std::fmt::Debug for ChunkStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkStore").field("path", &self.path).finish()
    }
}

impl ChunkStore {
    /// Open (or create) the store at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .context(format!("Failed to create store directory: {:?}", parent))?;
            }
        }
        let conn = Connection::open(path)
            .context(format!("Failed to open chunk store: {:?}", path))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS chunks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                content TEXT NOT NULL,
                source_uri TEXT NOT NULL,
                source_type TEXT NOT NULL,
                chunk_index INTEGER NOT NULL,
                total_chunks INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                vector_digest TEXT
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_chunks_source_uri
             ON chunks(source_uri)",
            [],
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
            path: path.to_path_buf(),
        })
    }

    /// Path of the backing database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert a batch of chunks; returns the assigned identifiers in insert
    /// order. The transaction commits before returning, so identifiers are
    /// durable once this call succeeds.
    pub fn insert_batch(&self, chunks: &[NewChunk]) -> Result<Vec<i64>> {
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = self.conn.lock().expect("chunk store mutex poisoned");
        let tx = conn.transaction()?;
        let created_at = chrono::Utc::now().timestamp();

        let mut ids = Vec::with_capacity(chunks.len());
        {
            let mut stmt = tx.prepare(
                "INSERT INTO chunks
                 (content, source_uri, source_type, chunk_index, total_chunks,
                  created_at, vector_digest)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for chunk in chunks {
                stmt.execute(params![
                    chunk.content,
                    chunk.source_uri,
                    chunk.source_type,
                    chunk.chunk_index as i64,
                    chunk.total_chunks as i64,
                    created_at,
                    chunk.vector_digest,
                ])?;
                ids.push(tx.last_insert_rowid());
            }
        }
        tx.commit()?;

        tracing::debug!("Inserted {} chunks into {:?}", ids.len(), self.path);
        Ok(ids)
    }

    /// Point lookup by identifier.
    pub fn get(&self, id: i64) -> Result<Option<ChunkRecord>> {
        let conn = self.conn.lock().expect("chunk store mutex poisoned");
        let record = conn
            .query_row(
                "SELECT id, content, source_uri, source_type, chunk_index,
                        total_chunks, created_at, vector_digest
                 FROM chunks WHERE id = ?1",
                params![id],
                Self::row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    /// All chunks originating from a source document.
    pub fn by_source(&self, source_uri: &str) -> Result<Vec<ChunkRecord>> {
        let conn = self.conn.lock().expect("chunk store mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, content, source_uri, source_type, chunk_index,
                    total_chunks, created_at, vector_digest
             FROM chunks WHERE source_uri = ?1 ORDER BY chunk_index",
        )?;
        let rows = stmt
            .query_map(params![source_uri], Self::row_to_record)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Number of stored chunks.
    pub fn count(&self) -> Result<usize> {
        let conn = self.conn.lock().expect("chunk store mutex poisoned");
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// All identifiers in ascending order. Used by integrity checks.
    pub fn ids(&self) -> Result<Vec<i64>> {
        let conn = self.conn.lock().expect("chunk store mutex poisoned");
        let mut stmt = conn.prepare("SELECT id FROM chunks ORDER BY id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<i64>, _>>()?;
        Ok(ids)
    }

    fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChunkRecord> {
        Ok(ChunkRecord {
            id: row.get(0)?,
            content: row.get(1)?,
            source_uri: row.get(2)?,
            source_type: row.get(3)?,
            chunk_index: row.get::<_, i64>(4)? as usize,
            total_chunks: row.get::<_, i64>(5)? as usize,
            created_at: row.get(6)?,
            vector_digest: row.get(7)?,
        })
    }
}

/// Validate that a store exists on disk for a retrieval session.
pub fn require_store(path: &Path) -> Result<ChunkStore> {
    if !path.exists() {
        return Err(RagError::Resource(format!(
            "chunk store {:?} not found; run ingest first",
            path
        ))
        .into());
    }
    ChunkStore::open(path)
}
