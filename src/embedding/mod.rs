//! Embedding generation
//!
//! Trait-based embedding interface. The model-backed embedder composes the
//! WordPiece tokenizer with an inference session and applies masked mean
//! pooling followed by L2 normalization.

use crate::error::RagError;
use crate::inference::InferenceSession;
use crate::runtime::RetryPolicy;
use crate::tokenizer::WordPieceTokenizer;
use anyhow::Result;
use ndarray::ArrayD;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Represents an embedding vector.
pub type Embedding = Vec<f32>;

/// Guard against division by a vanishing norm.
const NORM_EPSILON: f32 = 1e-12;

/// Trait for embedding models.
pub trait Embedder: Send + Sync {
    /// Embed a single text.
    fn embed(&self, text: &str) -> Result<Embedding>;

    /// Embed multiple texts in fixed-size batches.
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>>;

    /// Get the embedding dimension.
    fn dimension(&self) -> usize;
}

impl std::fmt::Debug for dyn Embedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("dyn Embedder").field("dimension", &self.dimension()).finish()
    }
}

/// Mean-pool the last hidden state over positions with a non-zero mask.
///
/// `hidden` must have shape `[1, seq_len, hidden_dim]` with `seq_len` equal
/// to the mask length. An all-zero mask yields the zero vector.
pub fn masked_mean_pool(hidden: &ArrayD<f32>, mask: &[i64]) -> Result<Embedding> {
    let shape = hidden.shape();
    if shape.len() != 3 || shape[0] != 1 {
        return Err(RagError::DataIntegrity(format!(
            "unexpected hidden-state shape {:?}",
            shape
        ))
        .into());
    }
    if shape[1] != mask.len() {
        return Err(RagError::DataIntegrity(format!(
            "hidden-state sequence length {} does not match mask length {}",
            shape[1],
            mask.len()
        ))
        .into());
    }

    let seq_len = shape[1];
    let dim = shape[2];
    let count = mask.iter().filter(|&&m| m != 0).count().max(1) as f32;

    let mut pooled = vec![0.0f32; dim];
    for (t, &m) in mask.iter().enumerate().take(seq_len) {
        if m == 0 {
            continue;
        }
        for (d, slot) in pooled.iter_mut().enumerate() {
            *slot += hidden[[0, t, d]];
        }
    }
    for slot in pooled.iter_mut() {
        *slot /= count;
    }
    Ok(pooled)
}

/// Normalize a vector to unit L2 length in place.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    let denom = norm.max(NORM_EPSILON);
    for value in vector.iter_mut() {
        *value /= denom;
    }
}

/// Embedder backed by a tokenizer and an inference session.
pub struct SessionEmbedder {
    tokenizer: Arc<WordPieceTokenizer>,
    session: Arc<dyn InferenceSession>,
    dimension: usize,
    batch_size: usize,
    retry: RetryPolicy,
}

impl SessionEmbedder {
    pub fn new(
        tokenizer: Arc<WordPieceTokenizer>,
        session: Arc<dyn InferenceSession>,
        dimension: usize,
        batch_size: usize,
    ) -> Self {
        Self {
            tokenizer,
            session,
            dimension,
            batch_size: batch_size.max(1),
            retry: RetryPolicy::internal(),
        }
    }

    /// Replace the retry schedule (used by tests).
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn encode_and_run(&self, text: &str) -> Result<Embedding> {
        let encoding = self.tokenizer.encode(text);
        if encoding.attention_mask.iter().all(|&m| m == 0) {
            return Ok(vec![0.0; self.dimension]);
        }

        let hidden = self.session.run(&encoding)?;
        let mut pooled = masked_mean_pool(&hidden, &encoding.attention_mask)?;
        if pooled.len() != self.dimension {
            return Err(RagError::DataIntegrity(format!(
                "model produced dimension {}, expected {}",
                pooled.len(),
                self.dimension
            ))
            .into());
        }
        l2_normalize(&mut pooled);
        Ok(pooled)
    }
}

impl Embedder for SessionEmbedder {
    fn embed(&self, text: &str) -> Result<Embedding> {
        self.retry
            .run_blocking("embedding", || self.encode_and_run(text))
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let vectors = self.retry.run_blocking("embedding batch", || {
                batch
                    .iter()
                    .map(|text| self.encode_and_run(text))
                    .collect::<Result<Vec<_>>>()
            })?;
            embeddings.extend(vectors);
        }
        Ok(embeddings)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Deterministic hash-based embedder.
///
/// Serves as the built-in backend when no ONNX model is configured and as a
/// stable stand-in for tests. Same contract as the model-backed embedder:
/// fixed dimension, unit L2 norm, zero vector for empty input.
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

impl Embedder for HashEmbedder {
    fn embed(&self, text: &str) -> Result<Embedding> {
        let mut vector = vec![0.0f32; self.dimension];
        let mut any = false;
        for word in text.split_whitespace() {
            any = true;
            let lowered = word.to_lowercase();
            let mut hasher = DefaultHasher::new();
            lowered.hash(&mut hasher);
            let digest = hasher.finish();
            let slot = (digest % self.dimension as u64) as usize;
            let sign = if digest & (1 << 63) == 0 { 1.0 } else { -1.0 };
            vector[slot] += sign;
        }
        if any {
            l2_normalize(&mut vector);
        }
        Ok(vector)
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        texts.iter().map(|text| self.embed(text)).collect()
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
