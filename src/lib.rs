//! # ragline
//!
//! A local-first retrieval-augmented generation engine.
//!
//! ## Overview
//!
//! ragline ingests a document corpus and answers natural-language questions
//! by retrieving grounded passages and handing them to a local LLM for
//! synthesis. The retrieval core keeps three stores in identifier lockstep:
//!
//! - a dense vector index (exact inner product, optionally FAISS-backed)
//! - a BM25 inverted index over chunk content
//! - a SQLite chunk store holding the authoritative records
//!
//! Queries are expanded into variants, retrieved per variant with hybrid
//! vector + lexical search fused by Reciprocal Rank Fusion, deduplicated,
//! reranked by a cross-encoder, and assembled into grounded context.
//!
//! ## Architecture
//!
//! - `tokenizer` - WordPiece encoding with BERT normalization semantics
//! - `embedding` - embedding generation (masked mean pool + L2 normalize)
//! - `inference` - ONNX session seam (feature `onnx`)
//! - `index` - vector index, lexical index, and the lockstep writer
//! - `store` - chunk-metadata store
//! - `retrieval` - hybrid retrieval with RRF fusion
//! - `rerank` - cross-encoder precision stage
//! - `llm` - HTTP client for the generation collaborator
//! - `pipeline` - query orchestration
//! - `ingest` - corpus walking, extraction, chunking
//! - `runtime` - execution-provider probe and retry policies
//! - `cli` - command implementations

pub mod cli;
pub mod config;
pub mod embedding;
pub mod error;
pub mod index;
pub mod inference;
pub mod ingest;
pub mod llm;
pub mod pipeline;
pub mod rerank;
pub mod retrieval;
pub mod runtime;
pub mod store;
pub mod tokenizer;

// Re-export commonly used types
pub use anyhow::{Error, Result};
