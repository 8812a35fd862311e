//! Embedding and indexing
//!
//! - `Embedder` turns text into vectors (`FastEmbedProvider` runs models locally)
//! - `VectorIndex` is the HNSW similarity oracle
//! - `KeywordIndex` is the Tantivy lexical oracle
//! - `BatchIndexer` keeps the passage store and both indexes in step

mod batch;
mod keyword_index;
mod provider;
mod vector_index;

pub use batch::{read_passages_jsonl, BatchIndexer, BatchResult};
pub use keyword_index::{KeywordIndex, KeywordIndexError};
pub use provider::{model_dimension, Embedder, EmbeddingError, FastEmbedProvider};
pub use vector_index::{VectorIndex, VectorIndexError};
