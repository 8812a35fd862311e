//! External collaborators consumed by the engine
//!
//! The similarity index, the keyword index and the passage store are owned
//! elsewhere; the engine only talks to them through these traits.

use crate::retrieval::passage::{Passage, PassageId};
use crate::retrieval::SearchConstraints;
use ahash::AHashMap;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OracleError {
    #[error("Backend failure: {0}")]
    Backend(String),

    #[error("Index not ready: {0}")]
    NotReady(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// A bare id with the oracle's raw score
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OracleHit {
    pub passage_id: PassageId,
    pub raw_score: f32,
}

impl OracleHit {
    pub fn new(passage_id: PassageId, raw_score: f32) -> Self {
        Self {
            passage_id,
            raw_score,
        }
    }
}

/// Nearest-neighbour search over passage embeddings
///
/// Scores are expected in [0, 1]; lists outside that range are rescaled by
/// the engine. Implementations may use `constraints` to narrow the search but
/// are not required to.
#[async_trait]
pub trait SimilarityOracle: Send + Sync {
    async fn search(
        &self,
        query_vector: &[f32],
        top_k: usize,
        constraints: &SearchConstraints,
    ) -> Result<Vec<OracleHit>, OracleError>;
}

/// Keyword search over passage text
#[async_trait]
pub trait LexicalOracle: Send + Sync {
    async fn search(
        &self,
        query_terms: &[String],
        top_k: usize,
    ) -> Result<Vec<OracleHit>, OracleError>;
}

/// Hydrates bare ids into full passages
#[async_trait]
pub trait PassageStore: Send + Sync {
    /// `Ok(None)` when the id is unknown
    async fn get(&self, id: PassageId) -> Result<Option<Passage>, OracleError>;

    /// Lookup several ids; the result is parallel to `ids`
    async fn get_many(&self, ids: &[PassageId]) -> Result<Vec<Option<Passage>>, OracleError> {
        let mut passages = Vec::with_capacity(ids.len());
        for id in ids {
            passages.push(self.get(*id).await?);
        }
        Ok(passages)
    }
}

/// Passage store held entirely in memory
#[derive(Default)]
pub struct InMemoryPassageStore {
    passages: RwLock<AHashMap<PassageId, Passage>>,
}

impl InMemoryPassageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_passages(passages: impl IntoIterator<Item = Passage>) -> Self {
        let store = Self::new();
        for passage in passages {
            store.insert(passage);
        }
        store
    }

    /// Insert or replace by id
    pub fn insert(&self, passage: Passage) {
        self.passages.write().insert(passage.id, passage);
    }

    pub fn remove(&self, id: PassageId) -> Option<Passage> {
        self.passages.write().remove(&id)
    }

    pub fn len(&self) -> usize {
        self.passages.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.passages.read().is_empty()
    }
}

#[async_trait]
impl PassageStore for InMemoryPassageStore {
    async fn get(&self, id: PassageId) -> Result<Option<Passage>, OracleError> {
        Ok(self.passages.read().get(&id).cloned())
    }

    async fn get_many(&self, ids: &[PassageId]) -> Result<Vec<Option<Passage>>, OracleError> {
        let passages = self.passages.read();
        Ok(ids.iter().map(|id| passages.get(id).cloned()).collect())
    }
}
