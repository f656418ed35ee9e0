//! Hybrid retrieval
//!
//! Fuses semantic (vector) and lexical (BM25) ranked lists with weighted
//! Reciprocal Rank Fusion, then materializes chunk records through the chunk
//! store. The two sub-searches of one call run concurrently on pool workers.

use crate::index::lexical::LexicalIndex;
use crate::index::vector::{VectorIndex, SENTINEL_ID};
use crate::store::{ChunkRecord, ChunkStore};
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// Standard RRF constant.
pub const RRF_K: f32 = 60.0;

/// Hybrid retriever over the identifier-aligned stores.
pub struct Retriever {
    vectors: Arc<dyn VectorIndex>,
    lexical: Arc<LexicalIndex>,
    store: Arc<ChunkStore>,
    hybrid_enabled: bool,
    /// Weight of the semantic list; the lexical list gets `1 - alpha`.
    alpha: f32,
}

impl Retriever {
    pub fn new(
        vectors: Arc<dyn VectorIndex>,
        lexical: Arc<LexicalIndex>,
        store: Arc<ChunkStore>,
        hybrid_enabled: bool,
        alpha: f32,
    ) -> Self {
        Self {
            vectors,
            lexical,
            store,
            hybrid_enabled,
            alpha,
        }
    }

    /// Top-k retrieval for one query.
    ///
    /// The hybrid path fetches `2 * top_k` candidates from each source,
    /// fuses them, and returns at most `top_k` records. With hybrid search
    /// disabled only the vector index is consulted.
    pub async fn search(
        &self,
        query_vector: &[f32],
        query_text: &str,
        top_k: usize,
    ) -> Result<Vec<ChunkRecord>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        if !self.hybrid_enabled {
            let ranked = self.vector_candidates(query_vector.to_vec(), top_k).await?;
            return Ok(ranked);
        }

        let fetch = top_k * 2;
        let vector_task = self.vector_candidates(query_vector.to_vec(), fetch);
        let lexical_task = self.lexical_candidates(query_text.to_string(), fetch);
        let (vector_ranked, lexical_ranked) = tokio::try_join!(vector_task, lexical_task)?;

        let vector_ids: Vec<i64> = vector_ranked.iter().map(|record| record.id).collect();
        let lexical_ids: Vec<i64> = lexical_ranked.iter().map(|record| record.id).collect();
        let fused = reciprocal_rank_fusion(&vector_ids, &lexical_ids, self.alpha);

        // Union of both candidate sets; the first occurrence of an
        // identifier supplies the record.
        let mut by_id: HashMap<i64, ChunkRecord> = HashMap::new();
        for record in vector_ranked.into_iter().chain(lexical_ranked) {
            by_id.entry(record.id).or_insert(record);
        }

        let mut results = Vec::with_capacity(top_k.min(fused.len()));
        for (id, _score) in fused.into_iter().take(top_k) {
            if let Some(record) = by_id.remove(&id) {
                results.push(record);
            }
        }
        Ok(results)
    }

    /// Vector sub-search with sentinel filtering and record materialization.
    async fn vector_candidates(
        &self,
        query: Vec<f32>,
        fetch: usize,
    ) -> Result<Vec<ChunkRecord>> {
        let vectors = Arc::clone(&self.vectors);
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || {
            let (_scores, ids) = vectors.search(&[query], fetch)?;
            let mut records = Vec::new();
            for &id in &ids[0] {
                if id == SENTINEL_ID {
                    continue;
                }
                // The chunk may have been deleted between retrieval and
                // materialization; skip silently.
                if let Some(record) = store.get(id)? {
                    records.push(record);
                }
            }
            Ok(records)
        })
        .await
        .context("vector sub-search task failed")?
    }

    /// Lexical sub-search with record materialization.
    async fn lexical_candidates(
        &self,
        query_text: String,
        fetch: usize,
    ) -> Result<Vec<ChunkRecord>> {
        let lexical = Arc::clone(&self.lexical);
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || {
            let hits = lexical.search(&query_text, fetch)?;
            let mut records = Vec::new();
            for (id, _score) in hits {
                if let Some(record) = store.get(id)? {
                    records.push(record);
                }
            }
            Ok(records)
        })
        .await
        .context("lexical sub-search task failed")?
    }
}

/// Weighted Reciprocal Rank Fusion over two ranked identifier lists.
///
/// Each identifier accumulates `alpha / (k + rank + 1)` from the vector list
/// and `(1 - alpha) / (k + rank + 1)` from the lexical list, with 0-based
/// ranks and `k = 60`. Entries whose accumulated score is zero (possible
/// only under a degenerate weight) are dropped, so `alpha = 1` collapses to
/// the vector ranking and `alpha = 0` to the lexical ranking.
pub fn reciprocal_rank_fusion(
    vector_ids: &[i64],
    lexical_ids: &[i64],
    alpha: f32,
) -> Vec<(i64, f32)> {
    let mut scores: HashMap<i64, f32> = HashMap::new();
    for (rank, &id) in vector_ids.iter().enumerate() {
        *scores.entry(id).or_insert(0.0) += alpha / (RRF_K + rank as f32 + 1.0);
    }
    for (rank, &id) in lexical_ids.iter().enumerate() {
        *scores.entry(id).or_insert(0.0) += (1.0 - alpha) / (RRF_K + rank as f32 + 1.0);
    }

    let mut fused: Vec<(i64, f32)> = scores
        .into_iter()
        .filter(|&(_, score)| score > 0.0)
        .collect();
    fused.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    fused
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::vector::FlatVectorIndex;
    use crate::store::NewChunk;
    use tempfile::TempDir;

    #[test]
    fn test_rrf_tie_break_ordering() {
        // Vector-ranked [1, 2, 3], lexical-ranked [3, 4, 1], alpha 0.7.
        let fused = reciprocal_rank_fusion(&[1, 2, 3], &[3, 4, 1], 0.7);
        let ids: Vec<i64> = fused.iter().take(3).map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![1, 3, 2]);

        // Spot-check the winning score: 0.7/61 + 0.3/63.
        let expected = 0.7 / 61.0 + 0.3 / 63.0;
        assert!((fused[0].1 - expected).abs() < 1e-6);
    }

    #[test]
    fn test_alpha_one_is_pure_vector_ranking() {
        let fused = reciprocal_rank_fusion(&[5, 6, 7], &[7, 8, 9], 1.0);
        let ids: Vec<i64> = fused.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![5, 6, 7]);
    }

    #[test]
    fn test_alpha_zero_is_pure_lexical_ranking() {
        let fused = reciprocal_rank_fusion(&[5, 6, 7], &[7, 8, 9], 0.0);
        let ids: Vec<i64> = fused.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![7, 8, 9]);
    }

    #[test]
    fn test_fusion_with_empty_lexical_list() {
        let fused = reciprocal_rank_fusion(&[4, 2], &[], 0.7);
        let ids: Vec<i64> = fused.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![4, 2]);
    }

    struct Fixture {
        _dir: TempDir,
        retriever: Retriever,
    }

    fn fixture(hybrid: bool, alpha: f32) -> Fixture {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(ChunkStore::open(&dir.path().join("chunks.db")).unwrap());
        let lexical =
            Arc::new(LexicalIndex::create_or_open(&dir.path().join("lexical")).unwrap());
        let vectors: Arc<dyn VectorIndex> = Arc::new(FlatVectorIndex::new(4).unwrap());

        let contents = [
            "the quick brown fox",
            "jumped over the lazy dog",
            "retrieval systems fuse rankings",
        ];
        let axes: [Vec<f32>; 3] = [
            vec![1.0, 0.0, 0.0, 0.0],
            vec![0.0, 1.0, 0.0, 0.0],
            vec![0.0, 0.0, 1.0, 0.0],
        ];
        let new_chunks: Vec<NewChunk> = contents
            .iter()
            .map(|content| NewChunk {
                content: content.to_string(),
                source_uri: "fixture.txt".to_string(),
                source_type: "txt".to_string(),
                chunk_index: 0,
                total_chunks: 3,
                vector_digest: None,
            })
            .collect();
        let ids = store.insert_batch(&new_chunks).unwrap();
        vectors.add_with_ids(&axes, &ids).unwrap();
        for (&id, content) in ids.iter().zip(contents.iter()) {
            lexical.add_document(id, content).unwrap();
        }
        lexical.commit().unwrap();

        Fixture {
            _dir: dir,
            retriever: Retriever::new(vectors, lexical, store, hybrid, alpha),
        }
    }

    #[tokio::test]
    async fn test_hybrid_search_materializes_records() {
        let fx = fixture(true, 0.7);
        let results = fx
            .retriever
            .search(&[1.0, 0.0, 0.0, 0.0], "quick brown fox", 2)
            .await
            .unwrap();

        assert!(!results.is_empty());
        assert!(results.len() <= 2);
        assert_eq!(results[0].content, "the quick brown fox");

        let mut seen = std::collections::HashSet::new();
        for record in &results {
            assert!(seen.insert(record.id), "duplicate id {}", record.id);
        }
    }

    #[tokio::test]
    async fn test_vector_only_when_hybrid_disabled() {
        let fx = fixture(false, 0.7);
        let results = fx
            .retriever
            .search(&[0.0, 1.0, 0.0, 0.0], "unrelated words entirely", 1)
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].content, "jumped over the lazy dog");
    }

    #[tokio::test]
    async fn test_hybrid_with_empty_lexical_index() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(ChunkStore::open(&dir.path().join("chunks.db")).unwrap());
        let lexical =
            Arc::new(LexicalIndex::create_or_open(&dir.path().join("lexical")).unwrap());
        lexical.commit().unwrap();
        let vectors: Arc<dyn VectorIndex> = Arc::new(FlatVectorIndex::new(2).unwrap());

        let ids = store
            .insert_batch(&[NewChunk {
                content: "only vector indexed".to_string(),
                source_uri: "v.txt".to_string(),
                source_type: "txt".to_string(),
                chunk_index: 0,
                total_chunks: 1,
                vector_digest: None,
            }])
            .unwrap();
        vectors.add_with_ids(&[vec![1.0, 0.0]], &ids).unwrap();

        let retriever = Retriever::new(vectors, lexical, store, true, 0.7);
        let results = retriever
            .search(&[1.0, 0.0], "only vector indexed", 3)
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].content, "only vector indexed");
    }

    #[tokio::test]
    async fn test_search_empty_stores() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(ChunkStore::open(&dir.path().join("chunks.db")).unwrap());
        let lexical =
            Arc::new(LexicalIndex::create_or_open(&dir.path().join("lexical")).unwrap());
        lexical.commit().unwrap();
        let vectors: Arc<dyn VectorIndex> = Arc::new(FlatVectorIndex::new(2).unwrap());

        let retriever = Retriever::new(vectors, lexical, store, true, 0.7);
        let results = retriever.search(&[1.0, 0.0], "anything", 5).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_missing_chunk_is_skipped() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(ChunkStore::open(&dir.path().join("chunks.db")).unwrap());
        let lexical =
            Arc::new(LexicalIndex::create_or_open(&dir.path().join("lexical")).unwrap());
        lexical.commit().unwrap();
        let vectors: Arc<dyn VectorIndex> = Arc::new(FlatVectorIndex::new(2).unwrap());

        // Vector index knows an id the chunk store never stored.
        vectors.add_with_ids(&[vec![1.0, 0.0]], &[99]).unwrap();

        let retriever = Retriever::new(vectors, lexical, store, true, 0.7);
        let results = retriever.search(&[1.0, 0.0], "ghost", 3).await.unwrap();
        assert!(results.is_empty());
    }
}
