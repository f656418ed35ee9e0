//! Cross-encoder reranking
//!
//! Precision stage over the fused candidate set. Each (query, chunk) pair is
//! encoded jointly and scored by a cross-encoder session; candidates are
//! returned in descending score order. When disabled the input ordering
//! passes through untouched.

use crate::error::RagError;
use crate::inference::InferenceSession;
use crate::store::ChunkRecord;
use crate::tokenizer::WordPieceTokenizer;
use anyhow::Result;
use std::sync::Arc;

/// Cross-encoder pair scorer.
pub struct CrossEncoderReranker {
    inner: Option<Inner>,
}

struct Inner {
    tokenizer: Arc<WordPieceTokenizer>,
    session: Arc<dyn InferenceSession>,
}

impl CrossEncoderReranker {
    /// Reranker that returns candidates unchanged.
    pub fn disabled() -> Self {
        Self { inner: None }
    }

    pub fn new(tokenizer: Arc<WordPieceTokenizer>, session: Arc<dyn InferenceSession>) -> Self {
        Self {
            inner: Some(Inner { tokenizer, session }),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    /// Sort candidates by descending cross-encoder score.
    ///
    /// Each record is scored as a single-example batch: the pair encoding
    /// distinguishes query and chunk through token type ids, and the model's
    /// scalar logit at `[0, 0]` is the relevance score. The sort is stable,
    /// so score ties keep the input order.
    pub fn rerank(&self, query: &str, records: Vec<ChunkRecord>) -> Result<Vec<ChunkRecord>> {
        let Some(inner) = &self.inner else {
            return Ok(records);
        };

        let mut scored: Vec<(f32, ChunkRecord)> = Vec::with_capacity(records.len());
        for record in records {
            let encoding = inner.tokenizer.encode_pair(query, &record.content);
            let logits = inner.session.run(&encoding)?;
            if logits.is_empty() {
                return Err(
                    RagError::DataIntegrity("reranker produced an empty logit tensor".into())
                        .into(),
                );
            }
            let score = logits.iter().next().copied().unwrap_or(0.0);
            scored.push((score, record));
        }

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        tracing::debug!("Reranked {} candidates", scored.len());
        Ok(scored.into_iter().map(|(_, record)| record).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::Encoding;
    use ndarray::{ArrayD, IxDyn};
    use std::fs;
    use tempfile::TempDir;

    fn record(id: i64, content: &str) -> ChunkRecord {
        ChunkRecord {
            id,
            content: content.to_string(),
            source_uri: "test.txt".to_string(),
            source_type: "txt".to_string(),
            chunk_index: 0,
            total_chunks: 1,
            created_at: 0,
            vector_digest: None,
        }
    }

    fn test_tokenizer() -> Arc<WordPieceTokenizer> {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("vocab.txt"),
            "[PAD]\n[UNK]\n[CLS]\n[SEP]\nlong\nshort\nquery",
        )
        .unwrap();
        fs::write(
            dir.path().join("tokenizer_config.json"),
            r#"{"do_lower_case": true, "model_max_length": 16}"#,
        )
        .unwrap();
        fs::write(dir.path().join("wordpiece.json"), "{}").unwrap();
        Arc::new(WordPieceTokenizer::from_dir(dir.path()).unwrap())
    }

    /// Scores each pair by the number of real tokens in the encoding.
    struct LengthSession;

    impl InferenceSession for LengthSession {
        fn run(&self, encoding: &Encoding) -> Result<ArrayD<f32>> {
            let score = encoding.effective_len as f32;
            Ok(ArrayD::from_elem(IxDyn(&[1, 1]), score))
        }
    }

    #[test]
    fn test_disabled_reranker_preserves_order() {
        let reranker = CrossEncoderReranker::disabled();
        let records = vec![record(3, "c"), record(1, "a"), record(2, "b")];
        let out = reranker.rerank("query", records.clone()).unwrap();
        let ids: Vec<i64> = out.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![3, 1, 2]);
    }

    #[test]
    fn test_rerank_sorts_by_descending_score() {
        let reranker = CrossEncoderReranker::new(test_tokenizer(), Arc::new(LengthSession));
        // Longer chunk content encodes more real tokens, so it scores higher.
        let records = vec![
            record(1, "short"),
            record(2, "long long long long"),
            record(3, "long long"),
        ];
        let out = reranker.rerank("query", records).unwrap();
        let ids: Vec<i64> = out.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![2, 3, 1]);
    }

    #[test]
    fn test_rerank_empty_candidates() {
        let reranker = CrossEncoderReranker::new(test_tokenizer(), Arc::new(LengthSession));
        let out = reranker.rerank("query", Vec::new()).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_stable_on_score_ties() {
        struct ConstSession;
        impl InferenceSession for ConstSession {
            fn run(&self, _encoding: &Encoding) -> Result<ArrayD<f32>> {
                Ok(ArrayD::from_elem(IxDyn(&[1, 1]), 0.5))
            }
        }

        let reranker = CrossEncoderReranker::new(test_tokenizer(), Arc::new(ConstSession));
        let records = vec![record(9, "a"), record(4, "b"), record(7, "c")];
        let out = reranker.rerank("query", records).unwrap();
        let ids: Vec<i64> = out.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![9, 4, 7]);
    }
}
