/// Batch indexing of passages into the store and both indexes
use super::{Embedder, KeywordIndex, VectorIndex};
use crate::error::{LecternError, Result};
use crate::retrieval::{Passage, PassageId};
use crate::storage::Database;
use std::collections::HashSet;
use std::io::BufRead;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Result of batch processing
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchResult {
    /// Passages embedded and indexed
    pub processed: usize,
    /// Passages already indexed with identical content
    pub skipped: usize,
    pub failed: usize,
    pub duration_ms: u64,
}

/// Writes passages to the passage store, embeds the new or changed ones and
/// updates the vector and keyword indexes
///
/// A chunk whose embedding fails is counted as failed and left without an
/// embedding, so the next run picks it up again.
pub struct BatchIndexer {
    embedder: Arc<dyn Embedder>,
    database: Arc<Database>,
    vector_index: Arc<VectorIndex>,
    keyword_index: Arc<KeywordIndex>,
    batch_size: usize,
}

impl BatchIndexer {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        database: Arc<Database>,
        vector_index: Arc<VectorIndex>,
        keyword_index: Arc<KeywordIndex>,
        batch_size: usize,
    ) -> Self {
        Self {
            embedder,
            database,
            vector_index,
            keyword_index,
            batch_size: batch_size.max(1),
        }
    }

    /// Index a batch of passages
    pub async fn index(&self, passages: Vec<Passage>) -> Result<BatchResult> {
        let start = Instant::now();
        info!("Indexing {} passages", passages.len());

        let mut result = BatchResult::default();
        for chunk in passages.chunks(self.batch_size) {
            self.database.upsert_passages(chunk)?;

            let ids: Vec<PassageId> = chunk.iter().map(|p| p.id).collect();
            let pending: HashSet<PassageId> = self
                .database
                .missing_embeddings(self.embedder.model_name(), &ids)?
                .into_iter()
                .collect();
            let pending: Vec<&Passage> = chunk.iter().filter(|p| pending.contains(&p.id)).collect();
            result.skipped += chunk.len() - pending.len();

            if pending.is_empty() {
                continue;
            }

            match self.index_chunk(&pending).await {
                Ok(count) => {
                    result.processed += count;
                    debug!("Indexed chunk of {} passages", count);
                }
                Err(e) => {
                    warn!("Failed to index chunk: {}", e);
                    result.failed += pending.len();
                }
            }
        }

        self.keyword_index.commit()?;

        result.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Indexing complete: {} processed, {} skipped, {} failed, {}ms",
            result.processed, result.skipped, result.failed, result.duration_ms
        );

        Ok(result)
    }

    async fn index_chunk(&self, chunk: &[&Passage]) -> Result<usize> {
        let texts: Vec<String> = chunk.iter().map(|p| p.text.clone()).collect();
        let embedder = Arc::clone(&self.embedder);

        let embeddings = tokio::task::spawn_blocking(move || embedder.embed_batch(&texts))
            .await
            .map_err(|e| LecternError::Other(e.into()))??;

        if embeddings.len() != chunk.len() {
            return Err(LecternError::Other(anyhow::anyhow!(
                "Embedding count mismatch: expected {}, got {}",
                chunk.len(),
                embeddings.len()
            )));
        }

        let items: Vec<(PassageId, Vec<f32>)> = chunk
            .iter()
            .map(|p| p.id)
            .zip(embeddings)
            .collect();

        self.vector_index.insert_batch(&items)?;
        self.database
            .put_embeddings(self.embedder.model_name(), &items)?;

        for passage in chunk {
            self.keyword_index.upsert(passage.id, &passage.text)?;
        }

        Ok(chunk.len())
    }

    /// Delete a source everywhere, returning how many passages were removed
    pub fn remove_source(&self, source_id: &str) -> Result<usize> {
        let ids = self.database.remove_source(source_id)?;
        for id in &ids {
            self.vector_index.remove(*id);
            self.keyword_index.delete(*id)?;
        }
        self.keyword_index.commit()?;
        Ok(ids.len())
    }
}

/// Read passages from a JSON Lines file, one passage object per line
pub fn read_passages_jsonl(path: &Path) -> Result<Vec<Passage>> {
    let file = std::fs::File::open(path).map_err(|e| LecternError::Io {
        source: e,
        context: format!("Failed to open passages file: {}", path.display()),
    })?;

    let mut passages = Vec::new();
    for (index, line) in std::io::BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| LecternError::Io {
            source: e,
            context: format!("Failed to read {}", path.display()),
        })?;
        if line.trim().is_empty() {
            continue;
        }

        let passage: Passage = serde_json::from_str(&line).map_err(|e| LecternError::Json {
            source: e,
            context: format!("{} line {}", path.display(), index + 1),
        })?;
        passages.push(passage);
    }

    Ok(passages)
}
