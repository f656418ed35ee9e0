//! Index writer
//!
//! Single writer that keeps the chunk store, vector index, and lexical index
//! in identifier lockstep. Chunk records are inserted first so the store
//! materializes identifiers, then vectors and lexical documents are appended
//! under those same identifiers, then the lexical index commits.

use crate::error::RagError;
use crate::index::lexical::LexicalIndex;
use crate::index::vector::{open_vector_index, VectorIndex};
use crate::store::{ChunkStore, NewChunk};
use anyhow::Result;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One chunk plus its embedding, ready for the cross-store append.
#[derive(Debug, Clone)]
pub struct ChunkInsert {
    pub chunk: NewChunk,
    pub vector: Vec<f32>,
}

struct Stores {
    chunks: ChunkStore,
    vectors: Arc<dyn VectorIndex>,
    lexical: LexicalIndex,
}

/// Writer side of the dual index.
///
/// After a failed `reset` the writer is unusable for the rest of the
/// session; the next session starts from whatever survived on disk.
pub struct IndexWriter {
    stores: Option<Stores>,
    chunk_store_path: PathBuf,
    vector_index_path: PathBuf,
    lexical_index_path: PathBuf,
    dimension: usize,
}

impl IndexWriter {
    /// Open all three stores for writing.
    pub fn open(
        chunk_store_path: &Path,
        vector_index_path: &Path,
        lexical_index_path: &Path,
        dimension: usize,
    ) -> Result<Self> {
        let stores = Self::open_stores(
            chunk_store_path,
            vector_index_path,
            lexical_index_path,
            dimension,
        )?;
        Ok(Self {
            stores: Some(stores),
            chunk_store_path: chunk_store_path.to_path_buf(),
            vector_index_path: vector_index_path.to_path_buf(),
            lexical_index_path: lexical_index_path.to_path_buf(),
            dimension,
        })
    }

    fn open_stores(
        chunk_store_path: &Path,
        vector_index_path: &Path,
        lexical_index_path: &Path,
        dimension: usize,
    ) -> Result<Stores> {
        Ok(Stores {
            chunks: ChunkStore::open(chunk_store_path)?,
            vectors: open_vector_index(vector_index_path, dimension)?,
            lexical: LexicalIndex::create_or_open(lexical_index_path)?,
        })
    }

    fn stores(&self) -> Result<&Stores> {
        self.stores.as_ref().ok_or_else(|| {
            anyhow::anyhow!("index writer is unusable after a failed reset; restart the session")
        })
    }

    /// Append a batch across all three stores.
    ///
    /// Returns the identifiers assigned by the chunk store, in batch order.
    pub fn add_batch(&mut self, batch: &[ChunkInsert]) -> Result<Vec<i64>> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        let stores = self.stores()?;

        // Validate every vector up front so a bad record cannot leave the
        // chunk store ahead of the vector index.
        for insert in batch {
            if insert.vector.len() != self.dimension {
                return Err(RagError::DataIntegrity(format!(
                    "embedding length {} does not match index dimension {}",
                    insert.vector.len(),
                    self.dimension
                ))
                .into());
            }
        }

        let records: Vec<NewChunk> = batch
            .iter()
            .map(|insert| {
                let mut chunk = insert.chunk.clone();
                chunk.vector_digest = Some(content_digest(&chunk.content));
                chunk
            })
            .collect();

        // 1. Chunk records first: the store materializes identifiers.
        let ids = stores.chunks.insert_batch(&records)?;

        // 2. Vectors under the freshly assigned identifiers.
        let vectors: Vec<Vec<f32>> = batch.iter().map(|insert| insert.vector.clone()).collect();
        stores.vectors.add_with_ids(&vectors, &ids)?;

        // 3. Lexical documents carrying text and identifier.
        for (insert, &id) in batch.iter().zip(&ids) {
            stores.lexical.add_document(id, &insert.chunk.content)?;
        }

        // 4. Commit the lexical index.
        stores.lexical.commit()?;

        tracing::debug!("Indexed batch of {} chunks", ids.len());
        Ok(ids)
    }

    /// Persist the vector index, replacing the existing file.
    ///
    /// Called once at the end of every ingest session, after all batches
    /// have committed.
    pub fn save_vector_index(&self) -> Result<()> {
        let stores = self.stores()?;
        stores.vectors.save(&self.vector_index_path)?;
        tracing::info!(
            "Saved vector index ({} vectors) to {:?}",
            stores.vectors.len(),
            self.vector_index_path
        );
        Ok(())
    }

    /// Reload the vector index from its file.
    pub fn load_vector_index(&mut self) -> Result<()> {
        if !self.vector_index_path.exists() {
            return Err(RagError::Resource(format!(
                "vector index {:?} not found",
                self.vector_index_path
            ))
            .into());
        }
        let vectors = open_vector_index(&self.vector_index_path, self.dimension)?;
        if let Some(stores) = self.stores.as_mut() {
            stores.vectors = vectors;
        }
        Ok(())
    }

    /// Delete all three stores and reinitialize them empty.
    ///
    /// Identifier allocation restarts at 1 afterwards.
    pub fn reset(&mut self) -> Result<()> {
        tracing::info!("Resetting chunk store, vector index, and lexical index");

        // Drop live handles first so every platform can delete the files.
        self.stores = None;

        remove_file_if_exists(&self.chunk_store_path)?;
        remove_file_if_exists(&self.vector_index_path)?;
        if self.lexical_index_path.exists() {
            std::fs::remove_dir_all(&self.lexical_index_path)?;
        }

        self.stores = Some(Self::open_stores(
            &self.chunk_store_path,
            &self.vector_index_path,
            &self.lexical_index_path,
            self.dimension,
        )?);
        Ok(())
    }

    /// Number of chunks in the store.
    pub fn size(&self) -> Result<usize> {
        self.stores()?.chunks.count()
    }

    pub fn chunks(&self) -> Result<&ChunkStore> {
        Ok(&self.stores()?.chunks)
    }

    pub fn vectors(&self) -> Result<Arc<dyn VectorIndex>> {
        Ok(Arc::clone(&self.stores()?.vectors))
    }

    pub fn lexical(&self) -> Result<&LexicalIndex> {
        Ok(&self.stores()?.lexical)
    }
}

fn remove_file_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn content_digest(content: &str) -> String {
    let mut hasher = DefaultHasher::new();
    content.hash(&mut hasher);
    format!("{:x}", hasher.finish())
}
