/// HNSW vector index answering similarity queries
use crate::config::IndexingConfig;
use crate::retrieval::{OracleError, OracleHit, PassageId, SearchConstraints, SimilarityOracle};
use async_trait::async_trait;
use hnsw_rs::prelude::*;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

/// hnsw_rs caps the layer count at 16
const MAX_LAYERS: usize = 16;

#[derive(Error, Debug)]
pub enum VectorIndexError {
    #[error("Invalid dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },

    #[error("Invalid passage id: {0}")]
    InvalidId(PassageId),

    #[error("Index is full: capacity {0}")]
    Full(usize),
}

/// Approximate nearest neighbour index over passage embeddings
///
/// Uses cosine distance. Similarity is reported as `1 - distance`, clamped to
/// [0, 1]. The index lives in memory and is rebuilt from stored embeddings at
/// startup. Removed ids are tombstoned since HNSW graphs do not support deletion.
pub struct VectorIndex {
    index: RwLock<Hnsw<'static, f32, DistCosine>>,
    removed: RwLock<HashSet<PassageId>>,
    config: IndexingConfig,
    count: AtomicU64,
}

impl VectorIndex {
    pub fn new(config: &IndexingConfig) -> Self {
        Self {
            index: RwLock::new(Self::build(config)),
            removed: RwLock::new(HashSet::new()),
            config: config.clone(),
            count: AtomicU64::new(0),
        }
    }

    /// Build an index from stored `(id, embedding)` pairs
    pub fn rebuild<I>(config: &IndexingConfig, embeddings: I) -> Result<Self, VectorIndexError>
    where
        I: IntoIterator<Item = (PassageId, Vec<f32>)>,
    {
        let index = Self::new(config);
        for (id, vector) in embeddings {
            index.insert(id, &vector)?;
        }
        tracing::info!("Rebuilt vector index with {} vectors", index.len());
        Ok(index)
    }

    fn build(config: &IndexingConfig) -> Hnsw<'static, f32, DistCosine> {
        Hnsw::<f32, DistCosine>::new(
            config.hnsw_m,
            config.max_elements,
            MAX_LAYERS,
            config.hnsw_ef_construction,
            DistCosine,
        )
    }

    /// Insert a vector into the index
    ///
    /// # Arguments
    /// * `id` - Passage id (must be non-negative)
    /// * `vector` - Embedding vector
    pub fn insert(&self, id: PassageId, vector: &[f32]) -> Result<(), VectorIndexError> {
        self.check_dimension(vector)?;
        let slot = usize::try_from(id).map_err(|_| VectorIndexError::InvalidId(id))?;
        if self.len() as usize >= self.config.max_elements {
            return Err(VectorIndexError::Full(self.config.max_elements));
        }

        let data = vector.to_vec();
        self.index.read().insert((&data, slot));
        self.removed.write().remove(&id);
        self.count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn insert_batch(&self, items: &[(PassageId, Vec<f32>)]) -> Result<(), VectorIndexError> {
        for (id, vector) in items {
            self.insert(*id, vector)?;
        }
        Ok(())
    }

    /// Hide an id from future searches
    pub fn remove(&self, id: PassageId) {
        self.removed.write().insert(id);
    }

    /// Search for k nearest neighbors
    ///
    /// # Returns
    /// (id, similarity) pairs sorted by similarity descending
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(PassageId, f32)>, VectorIndexError> {
        self.check_dimension(query)?;
        if self.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let removed = self.removed.read();
        // Over-fetch so tombstoned entries do not shrink the result
        let knbn = k + removed.len();
        let ef_search = self.config.hnsw_ef_search.max(knbn);
        let neighbours = self.index.read().search(query, knbn, ef_search);

        let results = neighbours
            .into_iter()
            .filter_map(|neighbour| {
                let id = PassageId::try_from(neighbour.d_id).ok()?;
                if removed.contains(&id) {
                    return None;
                }
                Some((id, (1.0 - neighbour.distance).clamp(0.0, 1.0)))
            })
            .take(k)
            .collect();

        Ok(results)
    }

    /// Number of vectors inserted, tombstoned ones included
    pub fn len(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dimension(&self) -> usize {
        self.config.vector_dim
    }

    /// Remove all vectors
    pub fn clear(&self) {
        *self.index.write() = Self::build(&self.config);
        self.removed.write().clear();
        self.count.store(0, Ordering::Relaxed);
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<(), VectorIndexError> {
        if vector.len() != self.config.vector_dim {
            return Err(VectorIndexError::InvalidDimension {
                expected: self.config.vector_dim,
                actual: vector.len(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl SimilarityOracle for VectorIndex {
    async fn search(
        &self,
        query_vector: &[f32],
        top_k: usize,
        _constraints: &SearchConstraints,
    ) -> Result<Vec<OracleHit>, OracleError> {
        let results = VectorIndex::search(self, query_vector, top_k).map_err(|e| match e {
            VectorIndexError::InvalidDimension { expected, actual } => {
                OracleError::DimensionMismatch { expected, actual }
            }
            other => OracleError::Backend(other.to_string()),
        })?;

        Ok(results
            .into_iter()
            .map(|(id, score)| OracleHit::new(id, score))
            .collect())
    }
}
