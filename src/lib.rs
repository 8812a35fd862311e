//! Lectern - Search and context engine for study documents
//!
//! Answers natural-language queries over locally indexed passages with semantic
//! search, hybrid semantic + keyword search fused by weighted reciprocal rank
//! fusion, and token-bounded context blocks with source attribution for
//! retrieval-augmented generation.
//!
//! The engine talks to its backends through narrow async traits
//! ([`retrieval::SimilarityOracle`], [`retrieval::LexicalOracle`],
//! [`retrieval::PassageStore`]) and a sync [`embedding::Embedder`]. The
//! bundled implementations are an HNSW vector index, a Tantivy keyword index,
//! a SQLite passage store and local fastembed models.

pub mod cli;
pub mod config;
pub mod embedding;
pub mod error;
pub mod retrieval;
pub mod storage;

pub use error::{LecternError, Result};
