//! Command-line interface
//!
//! Wires configuration, models, and stores into the ingest and query
//! sessions behind the two CLI commands.

use crate::config::Config;
use crate::embedding::{Embedder, HashEmbedder, SessionEmbedder};
use crate::error::RagError;
use crate::index::{open_vector_index, IndexWriter, LexicalIndex};
use crate::inference::load_session;
use crate::ingest::{chunker_for, IngestSession};
use crate::llm::LlmClient;
use crate::pipeline::{PipelineOptions, QueryPipeline};
use crate::rerank::CrossEncoderReranker;
use crate::retrieval::Retriever;
use crate::runtime::{resolve_provider, ProviderStatus};
use crate::store::require_store;
use crate::tokenizer::WordPieceTokenizer;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Execute the ingest command.
pub async fn ingest(config_path: Option<PathBuf>, folder: PathBuf, fresh: bool) -> Result<()> {
    let config = Config::load_or_default(config_path.as_deref())?;
    let provider = resolve_provider(
        config.execution_provider_preference,
        config.gpu_device_id,
    )?;
    tracing::info!(
        "Execution provider: {:?} (gpu: {})",
        provider.provider,
        provider.using_gpu
    );

    let embedder = build_embedder(&config, provider)?;
    let writer = IndexWriter::open(
        &config.chunk_store_path,
        &config.vector_index_path,
        &config.lexical_index_path,
        config.embedding_dimension,
    )?;

    let cancel = CancellationToken::new();
    watch_ctrl_c(cancel.clone());

    let mut session = IngestSession::new(
        writer,
        embedder,
        chunker_for(&config),
        config.embedding_batch_size,
        cancel,
    );

    if fresh {
        tracing::info!("Fresh ingest requested, rebuilding all stores");
        session.reset()?;
    }

    let report = session.run(&folder).await?;

    println!("\nIngest Summary:");
    println!("  Files processed: {}", report.files_processed);
    println!("  Files skipped:   {}", report.files_skipped);
    println!("  Chunks indexed:  {}", report.chunks_indexed);
    println!("  Total chunks:    {}", session.size()?);
    Ok(())
}

/// Execute the query command.
pub async fn query(config_path: Option<PathBuf>, question: String) -> Result<()> {
    let config = Config::load_or_default(config_path.as_deref())?;
    let provider = resolve_provider(
        config.execution_provider_preference,
        config.gpu_device_id,
    )?;

    let embedder = build_embedder(&config, provider)?;

    // Retrieval sessions require existing indexes.
    let store = Arc::new(require_store(&config.chunk_store_path)?);
    if !config.vector_index_path.exists() {
        return Err(RagError::Resource(format!(
            "vector index {:?} not found; run ingest first",
            config.vector_index_path
        ))
        .into());
    }
    let vectors = open_vector_index(&config.vector_index_path, config.embedding_dimension)?;
    let lexical = Arc::new(LexicalIndex::open_readonly(&config.lexical_index_path)?);

    let retriever = Arc::new(Retriever::new(
        vectors,
        lexical,
        store,
        config.enable_hybrid_search,
        config.hybrid_alpha,
    ));
    let reranker = Arc::new(build_reranker(&config, provider)?);

    let llm = Arc::new(LlmClient::new(&config)?);
    llm.health()
        .await
        .context("LLM collaborator is not available")?;

    let pipeline = QueryPipeline::new(
        embedder,
        retriever,
        reranker,
        llm,
        PipelineOptions::from(&config),
    );

    let cancel = CancellationToken::new();
    watch_ctrl_c(cancel.clone());

    let response = pipeline.answer(&question, &cancel).await?;

    println!("{}\n", response.answer);
    println!("Sources:");
    for (i, source) in response.sources.iter().enumerate() {
        println!(
            "  [{}] {} (chunk {})",
            i + 1,
            source.source_uri,
            source.chunk_index
        );
    }
    Ok(())
}

/// Build the configured embedder.
///
/// An empty model path selects the built-in hash embedder; a configured path
/// must exist and resolves to the ONNX-backed embedder.
fn build_embedder(config: &Config, provider: ProviderStatus) -> Result<Arc<dyn Embedder>> {
    if config.embedding_model_path.is_empty() {
        tracing::warn!("No embedding model configured, using the deterministic hash embedder");
        return Ok(Arc::new(HashEmbedder::new(config.embedding_dimension)));
    }

    let model_dir = Path::new(&config.embedding_model_path);
    if !model_dir.is_dir() {
        return Err(RagError::Resource(format!(
            "embedding model directory {:?} not found",
            model_dir
        ))
        .into());
    }

    let tokenizer = Arc::new(WordPieceTokenizer::from_dir(model_dir)?);
    let session = load_session(model_dir, provider)?;
    Ok(Arc::new(SessionEmbedder::new(
        tokenizer,
        session,
        config.embedding_dimension,
        config.embedding_batch_size,
    )))
}

/// Build the reranker; disabled or model-less configurations pass through.
fn build_reranker(config: &Config, provider: ProviderStatus) -> Result<CrossEncoderReranker> {
    if !config.enable_reranking || config.reranker_model_path.is_empty() {
        return Ok(CrossEncoderReranker::disabled());
    }

    let model_dir = Path::new(&config.reranker_model_path);
    if !model_dir.is_dir() {
        tracing::warn!(
            "Reranker model directory {:?} not found, reranking disabled",
            model_dir
        );
        return Ok(CrossEncoderReranker::disabled());
    }

    let tokenizer = Arc::new(WordPieceTokenizer::from_dir(model_dir)?);
    let session = load_session(model_dir, provider)?;
    Ok(CrossEncoderReranker::new(tokenizer, session))
}

fn watch_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling");
            cancel.cancel();
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderPreference;

    fn cpu_status() -> ProviderStatus {
        resolve_provider(ProviderPreference::Auto, 0).unwrap()
    }

    #[test]
    fn test_empty_model_path_selects_hash_embedder() {
        let config = Config::default();
        let embedder = build_embedder(&config, cpu_status()).unwrap();
        assert_eq!(embedder.dimension(), config.embedding_dimension);
        // Deterministic output confirms the hash backend.
        let a = embedder.embed("stable").unwrap();
        let b = embedder.embed("stable").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_missing_model_directory_is_resource_error() {
        let config = Config {
            embedding_model_path: "/nonexistent/model".to_string(),
            ..Default::default()
        };
        let err = build_embedder(&config, cpu_status()).unwrap_err();
        let rag = err.downcast_ref::<RagError>().unwrap();
        assert!(matches!(rag, RagError::Resource(_)));
    }

    #[test]
    fn test_reranker_disabled_paths() {
        let config = Config {
            enable_reranking: false,
            ..Default::default()
        };
        assert!(!build_reranker(&config, cpu_status()).unwrap().is_enabled());

        let config = Config {
            enable_reranking: true,
            reranker_model_path: String::new(),
            ..Default::default()
        };
        assert!(!build_reranker(&config, cpu_status()).unwrap().is_enabled());

        // Absent model directory degrades to the identity reranker.
        let config = Config {
            enable_reranking: true,
            reranker_model_path: "/nonexistent/reranker".to_string(),
            ..Default::default()
        };
        assert!(!build_reranker(&config, cpu_status()).unwrap().is_enabled());
    }
}
