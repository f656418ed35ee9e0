//! Configuration
//!
//! TOML-backed settings for the retrieval core. Every key is optional and
//! falls back to a default; validation runs before any I/O so inconsistent
//! settings never reach the indexes.

use crate::error::RagError;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Preferred execution provider for inference sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderPreference {
    /// Use the accelerator when present, fall back to CPU otherwise.
    #[default]
    Auto,
    /// CPU only, even when an accelerator is present.
    Cpu,
    /// Accelerator required; startup fails without one.
    Gpu,
}

/// Settings for the retrieval core.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// ONNX embedding model directory. Empty selects the built-in
    /// deterministic hash embedder.
    pub embedding_model_path: String,
    /// ONNX cross-encoder model directory. Empty disables reranking.
    pub reranker_model_path: String,

    pub chunk_store_path: PathBuf,
    pub vector_index_path: PathBuf,
    pub lexical_index_path: PathBuf,

    pub llm_endpoint: String,
    pub llm_model: String,
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
    pub request_timeout_seconds: u64,

    pub enable_semantic_chunking: bool,
    pub chunk_size: usize,
    pub chunk_overlap: usize,

    pub embedding_batch_size: usize,
    pub embedding_dimension: usize,

    pub enable_query_expansion: bool,
    pub query_expansion_count: usize,

    pub enable_hybrid_search: bool,
    pub hybrid_alpha: f32,

    pub enable_reranking: bool,
    pub rerank_top_k: usize,
    pub default_top_k: usize,

    pub execution_provider_preference: ProviderPreference,
    pub gpu_device_id: i32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            embedding_model_path: String::new(),
            reranker_model_path: String::new(),
            chunk_store_path: PathBuf::from("data/chunks.db"),
            vector_index_path: PathBuf::from("data/vectors.idx"),
            lexical_index_path: PathBuf::from("data/lexical"),
            llm_endpoint: "http://127.0.0.1:11434".to_string(),
            llm_model: "llama3".to_string(),
            temperature: 0.1,
            top_p: 0.9,
            max_tokens: 500,
            request_timeout_seconds: 180,
            enable_semantic_chunking: false,
            chunk_size: 1600,
            chunk_overlap: 200,
            embedding_batch_size: 16,
            embedding_dimension: 384,
            enable_query_expansion: true,
            query_expansion_count: 3,
            enable_hybrid_search: true,
            hybrid_alpha: 0.7,
            enable_reranking: true,
            rerank_top_k: 20,
            default_top_k: 7,
            execution_provider_preference: ProviderPreference::Auto,
            gpu_device_id: 0,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file and validate it.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .context(format!("Failed to read config file: {:?}", path))?;
        let config: Config = toml::from_str(&raw)
            .map_err(|e| RagError::Config(format!("invalid TOML in {:?}: {}", path, e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` when given, otherwise fall back to defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let config = Config::default();
                config.validate()?;
                Ok(config)
            }
        }
    }

    /// Check numeric ranges and cross-field consistency.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(RagError::Config("chunk_size must be > 0".into()).into());
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(RagError::Config(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            ))
            .into());
        }
        if self.embedding_batch_size == 0 {
            return Err(RagError::Config("embedding_batch_size must be > 0".into()).into());
        }
        if self.embedding_dimension == 0 {
            return Err(RagError::Config("embedding_dimension must be > 0".into()).into());
        }
        if self.query_expansion_count < 1 {
            return Err(RagError::Config("query_expansion_count must be >= 1".into()).into());
        }
        if !(0.0..=1.0).contains(&self.hybrid_alpha) {
            return Err(RagError::Config(format!(
                "hybrid_alpha must lie in [0, 1], got {}",
                self.hybrid_alpha
            ))
            .into());
        }
        if self.rerank_top_k == 0 {
            return Err(RagError::Config("rerank_top_k must be > 0".into()).into());
        }
        if self.default_top_k == 0 {
            return Err(RagError::Config("default_top_k must be > 0".into()).into());
        }
        Ok(())
    }
}
