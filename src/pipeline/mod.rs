//! Query pipeline
//!
//! Orchestrates the full question path: expand the query, retrieve per
//! variant, union the candidates, rerank, and hand the assembled context to
//! the LLM collaborator for answer synthesis.

use crate::config::Config;
use crate::embedding::Embedder;
use crate::error::RagError;
use crate::llm::LlmClient;
use crate::rerank::CrossEncoderReranker;
use crate::retrieval::Retriever;
use crate::store::ChunkRecord;
use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Pipeline knobs lifted from the configuration.
#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions {
    pub expansion_enabled: bool,
    /// Number of additional phrasings requested from the LLM.
    pub expansion_count: usize,
    /// Candidate pool width handed to the reranker.
    pub rerank_top_k: usize,
    /// Final slice size handed to generation.
    pub default_top_k: usize,
}

impl From<&Config> for PipelineOptions {
    fn from(config: &Config) -> Self {
        Self {
            expansion_enabled: config.enable_query_expansion,
            expansion_count: config.query_expansion_count,
            rerank_top_k: config.rerank_top_k,
            default_top_k: config.default_top_k,
        }
    }
}

/// Source attribution for one context document.
#[derive(Debug, Clone, Serialize)]
pub struct SourceRef {
    pub chunk_id: i64,
    pub source_uri: String,
    pub chunk_index: usize,
}

/// Answer plus the evidence it was grounded on.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub answer: String,
    pub sources: Vec<SourceRef>,
    /// Raw context handed to the LLM (useful for debugging).
    pub context: String,
}

/// End-to-end query orchestrator.
pub struct QueryPipeline {
    embedder: Arc<dyn Embedder>,
    retriever: Arc<Retriever>,
    reranker: Arc<CrossEncoderReranker>,
    llm: Arc<LlmClient>,
    options: PipelineOptions,
}

impl QueryPipeline {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        retriever: Arc<Retriever>,
        reranker: Arc<CrossEncoderReranker>,
        llm: Arc<LlmClient>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            embedder,
            retriever,
            reranker,
            llm,
            options,
        }
    }

    /// Answer a question against the indexed corpus.
    pub async fn answer(
        &self,
        question: &str,
        cancel: &CancellationToken,
    ) -> Result<QueryResponse> {
        ensure_live(cancel)?;

        // 1. Expand. Failure falls through to the original question.
        let variants = if self.options.expansion_enabled {
            self.llm
                .expand_query(question, self.options.expansion_count)
                .await
        } else {
            vec![question.to_string()]
        };
        tracing::debug!("Retrieving with {} query variant(s)", variants.len());

        // 2. Retrieve per variant, concurrently.
        let candidates = self.retrieve_variants(&variants).await?;
        ensure_live(cancel)?;

        // 3. Union by identifier, first occurrence wins.
        let unioned = dedup_by_id(candidates);

        // 4. Rerank on a pool worker.
        let reranker = Arc::clone(&self.reranker);
        let query_text = question.to_string();
        let mut ranked = tokio::task::spawn_blocking(move || reranker.rerank(&query_text, unioned))
            .await
            .context("rerank task failed")??;

        // 5. Slice to the user-facing budget.
        ranked.truncate(self.options.default_top_k);

        // 6. Assemble context and generate.
        let context = build_context(&ranked);
        let sources = ranked
            .iter()
            .map(|record| SourceRef {
                chunk_id: record.id,
                source_uri: record.source_uri.clone(),
                chunk_index: record.chunk_index,
            })
            .collect();

        ensure_live(cancel)?;
        let prompt = answer_prompt(&context, question);
        let answer = tokio::select! {
            result = self.llm.generate(&prompt) => result?,
            _ = cancel.cancelled() => return Err(RagError::Cancelled.into()),
        };

        Ok(QueryResponse {
            answer,
            sources,
            context,
        })
    }

    async fn retrieve_variants(&self, variants: &[String]) -> Result<Vec<Vec<ChunkRecord>>> {
        let mut tasks = JoinSet::new();
        for (index, variant) in variants.iter().enumerate() {
            let embedder = Arc::clone(&self.embedder);
            let retriever = Arc::clone(&self.retriever);
            let variant = variant.clone();
            let fetch = self.options.rerank_top_k;
            tasks.spawn(async move {
                let to_embed = variant.clone();
                let vector =
                    tokio::task::spawn_blocking(move || embedder.embed(&to_embed))
                        .await
                        .context("embedding task failed")??;
                let records = retriever.search(&vector, &variant, fetch).await?;
                Ok::<_, anyhow::Error>((index, records))
            });
        }

        // Completion order is arbitrary; keep results in variant order so the
        // downstream union is deterministic.
        let mut slots: Vec<Vec<ChunkRecord>> = vec![Vec::new(); variants.len()];
        while let Some(joined) = tasks.join_next().await {
            let (index, records) = joined.context("variant retrieval task panicked")??;
            slots[index] = records;
        }
        Ok(slots)
    }
}

fn ensure_live(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(RagError::Cancelled.into());
    }
    Ok(())
}

/// Concatenate per-variant results, keeping the first record per identifier.
pub fn dedup_by_id(candidate_lists: Vec<Vec<ChunkRecord>>) -> Vec<ChunkRecord> {
    let mut seen = HashSet::new();
    let mut unioned = Vec::new();
    for records in candidate_lists {
        for record in records {
            if seen.insert(record.id) {
                unioned.push(record);
            }
        }
    }
    unioned
}

/// Format retrieved chunks into numbered context blocks.
pub fn build_context(records: &[ChunkRecord]) -> String {
    let mut context = String::new();
    for (i, record) in records.iter().enumerate() {
        context.push_str(&format!(
            "[Document {}]\n{}\nSource: {}\n\n",
            i + 1,
            record.content,
            basename(&record.source_uri)
        ));
    }
    context
}

fn basename(uri: &str) -> &str {
    Path::new(uri)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(uri)
}

fn answer_prompt(context: &str, question: &str) -> String {
    format!(
        "Answer the question using only the context below. \
         If the context does not contain the answer, say so.\n\n\
         Context:\n{}\nQuestion: {}\n\nAnswer:",
        context, question
    )
}
