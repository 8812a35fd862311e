//! Search engine orchestration
//!
//! Coordinates the embedder and oracles with scoring, filtering, fusion,
//! highlighting and context assembly. Per query the pipeline is stateless; the
//! only shared mutable state is the query cache, the suggestion index and the
//! counters.

use crate::config::{Config, RetrievalConfig};
use crate::embedding::Embedder;
use crate::error::{LecternError, Result};
use crate::retrieval::cache::{CacheKey, QueryCache};
use crate::retrieval::context::{ContextAssembler, ContextBlock};
use crate::retrieval::deduplication::deduplicate_hits;
use crate::retrieval::filter::ResultFilter;
use crate::retrieval::fusion::{fuse, FusionConfig};
use crate::retrieval::highlight::Highlighter;
use crate::retrieval::oracle::{LexicalOracle, OracleHit, PassageStore, SimilarityOracle};
use crate::retrieval::passage::{
    assign_ranks, FusedCandidate, Passage, PassageId, RankedPassage, ScoredCandidate,
};
use crate::retrieval::scorer::{normalize_raw_scores, Clock, RelevanceScorer};
use crate::retrieval::stats::{EngineStats, StatsSnapshot};
use crate::retrieval::suggest::SuggestionIndex;
use crate::retrieval::{text, SearchConstraints};
use ahash::{AHashMap, AHashSet};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

const EMBEDDER: &str = "embedder";
const SIMILARITY_ORACLE: &str = "similarity_oracle";
const LEXICAL_ORACLE: &str = "lexical_oracle";
const PASSAGE_STORE: &str = "passage_store";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    Semantic,
    Hybrid,
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchMode::Semantic => write!(f, "semantic"),
            SearchMode::Hybrid => write!(f, "hybrid"),
        }
    }
}

/// Retrieval engine over injected oracles
pub struct SearchEngine {
    embedder: Arc<dyn Embedder>,
    similarity: Arc<dyn SimilarityOracle>,
    lexical: Option<Arc<dyn LexicalOracle>>,
    store: Arc<dyn PassageStore>,
    retrieval: RetrievalConfig,
    scorer: RelevanceScorer,
    assembler: ContextAssembler,
    highlighter: Highlighter,
    cache: Arc<QueryCache>,
    suggestions: Arc<SuggestionIndex>,
    stats: EngineStats,
}

impl SearchEngine {
    /// Create an engine in semantic-only mode; add a lexical oracle with `with_lexical`
    pub fn new(
        config: &Config,
        embedder: Arc<dyn Embedder>,
        similarity: Arc<dyn SimilarityOracle>,
        store: Arc<dyn PassageStore>,
    ) -> Self {
        Self {
            embedder,
            similarity,
            lexical: None,
            store,
            retrieval: config.retrieval.clone(),
            scorer: RelevanceScorer::new(config.scoring.clone()),
            assembler: ContextAssembler::new(config.context.clone()),
            highlighter: Highlighter::default(),
            cache: Arc::new(QueryCache::new(&config.cache)),
            suggestions: Arc::new(SuggestionIndex::new(config.suggestions.max_entries)),
            stats: EngineStats::new(),
        }
    }

    pub fn with_lexical(mut self, lexical: Arc<dyn LexicalOracle>) -> Self {
        self.lexical = Some(lexical);
        self
    }

    /// Share a cache between engines, or pass `QueryCache::disabled()`
    pub fn with_cache(mut self, cache: Arc<QueryCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.scorer = RelevanceScorer::with_clock(self.scorer.config().clone(), clock);
        self
    }

    pub fn with_suggestions(mut self, suggestions: Arc<SuggestionIndex>) -> Self {
        self.suggestions = suggestions;
        self
    }

    pub fn retrieval_config(&self) -> &RetrievalConfig {
        &self.retrieval
    }

    pub fn highlighter(&self) -> &Highlighter {
        &self.highlighter
    }

    /// Rank passages by embedding similarity
    ///
    /// # Arguments
    /// * `query` - Natural language query
    /// * `top_k` - Maximum number of results
    /// * `constraints` - Metadata and score restrictions
    ///
    /// # Returns
    /// Candidates sorted by adjusted score; empty when nothing relevant survives
    pub async fn semantic_search(
        &self,
        query: &str,
        top_k: usize,
        constraints: &SearchConstraints,
    ) -> Result<Vec<ScoredCandidate>> {
        self.validate_request(query, top_k, constraints)?;

        let span = tracing::info_span!("query", query_id = %Uuid::new_v4(), mode = %SearchMode::Semantic);
        async {
            let started = Instant::now();
            let key = CacheKey::semantic(query, top_k, constraints);

            let results = match self.cache.get_semantic(&key) {
                Some(cached) => cached.as_ref().clone(),
                None => {
                    let results = self.run_semantic(query, top_k, constraints).await?;
                    self.cache.put_semantic(key, results.clone());
                    results
                }
            };

            self.finish(query, started, results.len());
            Ok::<_, LecternError>(results)
        }
        .instrument(span)
        .await
    }

    /// Fuse semantic and lexical rankings with weighted reciprocal rank fusion
    ///
    /// Weights must be non-negative and sum to 1.0. Both oracles are queried
    /// concurrently; the first failure aborts the other call.
    pub async fn hybrid_search(
        &self,
        query: &str,
        top_k: usize,
        constraints: &SearchConstraints,
        semantic_weight: f32,
        lexical_weight: f32,
    ) -> Result<Vec<FusedCandidate>> {
        let fusion = FusionConfig::new(self.retrieval.rrf_k, semantic_weight, lexical_weight)?;
        self.validate_request(query, top_k, constraints)?;
        let lexical = self.lexical.as_ref().ok_or_else(|| {
            LecternError::invalid_configuration("Hybrid search requires a lexical oracle")
        })?;

        let span = tracing::info_span!("query", query_id = %Uuid::new_v4(), mode = %SearchMode::Hybrid);
        async {
            let started = Instant::now();
            let key = CacheKey::hybrid(query, top_k, constraints, semantic_weight, lexical_weight);

            let results = match self.cache.get_hybrid(&key) {
                Some(cached) => cached.as_ref().clone(),
                None => {
                    let results = self
                        .run_hybrid(lexical.as_ref(), query, top_k, constraints, &fusion)
                        .await?;
                    self.cache.put_hybrid(key, results.clone());
                    results
                }
            };

            self.finish(query, started, results.len());
            Ok::<_, LecternError>(results)
        }
        .instrument(span)
        .await
    }

    /// Retrieve and pack the best passages into a token-bounded context block
    ///
    /// Uses hybrid search when `retrieval.hybrid_context` is set and a lexical
    /// oracle is configured, semantic search otherwise.
    pub async fn retrieve_context(
        &self,
        query: &str,
        top_k: usize,
        token_budget: usize,
        constraints: &SearchConstraints,
    ) -> Result<ContextBlock> {
        if token_budget == 0 {
            return Err(LecternError::InvalidBudget {
                budget: token_budget,
            });
        }

        if self.retrieval.hybrid_context && self.lexical.is_some() {
            let fused = self
                .hybrid_search(
                    query,
                    top_k,
                    constraints,
                    self.retrieval.semantic_weight,
                    self.retrieval.lexical_weight,
                )
                .await?;
            self.assembler.assemble(&fused, token_budget)
        } else {
            let ranked = self.semantic_search(query, top_k, constraints).await?;
            self.assembler.assemble(&ranked, token_budget)
        }
    }

    /// Autocomplete from previously seen queries
    pub fn suggest(&self, prefix: &str, limit: usize) -> Vec<String> {
        self.suggestions.suggest(prefix, limit)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot(self.cache.hit_rate())
    }

    async fn run_semantic(
        &self,
        query: &str,
        top_k: usize,
        constraints: &SearchConstraints,
    ) -> Result<Vec<ScoredCandidate>> {
        let fetch_k = self.fetch_k(top_k);
        let hits = self.similarity_hits(query, fetch_k, constraints).await?;

        let passages = self.hydrate(hits.iter().map(|(id, _)| *id)).await?;
        let ranked = self.score_hits(&hits, &passages, query)?;

        let mut results = ResultFilter::filter(ranked, constraints);
        results.truncate(top_k);
        assign_ranks(&mut results);
        self.apply_highlights(&mut results, query);

        debug!(candidates = hits.len(), returned = results.len(), "Semantic search complete");
        Ok(results)
    }

    async fn run_hybrid(
        &self,
        lexical: &dyn LexicalOracle,
        query: &str,
        top_k: usize,
        constraints: &SearchConstraints,
        fusion: &FusionConfig,
    ) -> Result<Vec<FusedCandidate>> {
        let fetch_k = self.fetch_k(top_k);
        let terms = text::tokenize(query);

        let semantic_side = self.similarity_hits(query, fetch_k, constraints);
        let lexical_side = async {
            if terms.is_empty() {
                return Ok::<_, LecternError>(Vec::new());
            }
            let hits = self
                .bounded(LEXICAL_ORACLE, lexical.search(&terms, fetch_k))
                .await?;
            Ok(prepare_hits(hits))
        };
        let (semantic_hits, lexical_hits) = tokio::try_join!(semantic_side, lexical_side)?;

        let passages = self
            .hydrate(
                semantic_hits
                    .iter()
                    .chain(lexical_hits.iter())
                    .map(|(id, _)| *id),
            )
            .await?;

        // Metadata constraints narrow each list before ranks are taken; min_score
        // is checked only after fusion.
        let semantic_ranked = ResultFilter::filter_metadata(
            self.score_hits(&semantic_hits, &passages, query)?,
            constraints,
        );
        let lexical_ranked = ResultFilter::filter_metadata(
            self.score_hits(&lexical_hits, &passages, query)?,
            constraints,
        );

        let fused = fuse(&semantic_ranked, &lexical_ranked, fusion);
        let mut results = ResultFilter::filter(fused, constraints);
        results.truncate(top_k);
        assign_ranks(&mut results);
        self.apply_highlights(&mut results, query);

        debug!(
            semantic = semantic_ranked.len(),
            lexical = lexical_ranked.len(),
            returned = results.len(),
            "Hybrid search complete"
        );
        Ok(results)
    }

    /// Embed the query and ask the similarity oracle for normalized, deduplicated hits
    async fn similarity_hits(
        &self,
        query: &str,
        fetch_k: usize,
        constraints: &SearchConstraints,
    ) -> Result<Vec<(PassageId, f32)>> {
        let vector = self.embed_query(query).await?;
        let hits = self
            .bounded(
                SIMILARITY_ORACLE,
                self.similarity.search(&vector, fetch_k, constraints),
            )
            .await?;
        Ok(prepare_hits(hits))
    }

    async fn embed_query(&self, query: &str) -> Result<Arc<Vec<f32>>> {
        let key = CacheKey::embedding(query);
        if let Some(vector) = self.cache.get_embedding(&key) {
            return Ok(vector);
        }

        let embedder = Arc::clone(&self.embedder);
        let owned = query.to_string();
        let task = async move {
            tokio::task::spawn_blocking(move || embedder.embed(&owned))
                .await
                .map_err(|e| e.to_string())?
                .map_err(|e| e.to_string())
        };
        let vector = self.bounded(EMBEDDER, task).await?;

        self.cache.put_embedding(key, vector.clone());
        Ok(Arc::new(vector))
    }

    /// Fetch passages for `ids`; unknown ids are logged and dropped
    async fn hydrate(
        &self,
        ids: impl Iterator<Item = PassageId>,
    ) -> Result<AHashMap<PassageId, Arc<Passage>>> {
        let mut seen: AHashSet<PassageId> = AHashSet::new();
        let unique: Vec<PassageId> = ids.filter(|id| seen.insert(*id)).collect();
        if unique.is_empty() {
            return Ok(AHashMap::new());
        }

        let fetched = self
            .bounded(PASSAGE_STORE, self.store.get_many(&unique))
            .await?;

        let mut passages = AHashMap::with_capacity(unique.len());
        for (id, passage) in unique.iter().zip(fetched) {
            match passage {
                Some(passage) => {
                    passages.insert(*id, Arc::new(passage));
                }
                None => warn!(
                    error = %LecternError::PassageNotFound { id: *id },
                    "Dropping candidate that could not be hydrated"
                ),
            }
        }

        if passages.is_empty() {
            info!(requested = unique.len(), "No candidates could be hydrated");
        }
        Ok(passages)
    }

    fn score_hits(
        &self,
        hits: &[(PassageId, f32)],
        passages: &AHashMap<PassageId, Arc<Passage>>,
        query: &str,
    ) -> Result<Vec<ScoredCandidate>> {
        let hydrated: Vec<(Arc<Passage>, f32)> = hits
            .iter()
            .filter_map(|(id, score)| passages.get(id).map(|p| (Arc::clone(p), *score)))
            .collect();
        self.scorer.score_all(hydrated, query)
    }

    fn apply_highlights<T: RankedPassage>(&self, results: &mut [T], query: &str) {
        if !self.retrieval.highlight {
            return;
        }
        for result in results.iter_mut() {
            let highlighted = self.highlighter.highlight(&result.passage().text, query);
            result.set_highlighted(Some(highlighted));
        }
    }

    /// Bound an oracle call by the configured timeout, mapping any failure to
    /// `OracleUnavailable`
    async fn bounded<T, E, F>(&self, oracle: &str, call: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, E>>,
        E: fmt::Display,
    {
        let timeout = Duration::from_millis(self.retrieval.oracle_timeout_ms);
        match tokio::time::timeout(timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                warn!(oracle, error = %e, "Oracle call failed");
                Err(LecternError::unavailable(oracle, e))
            }
            Err(_) => {
                warn!(oracle, timeout_ms = self.retrieval.oracle_timeout_ms, "Oracle call timed out");
                Err(LecternError::unavailable(
                    oracle,
                    format!("timed out after {}ms", self.retrieval.oracle_timeout_ms),
                ))
            }
        }
    }

    fn validate_request(
        &self,
        query: &str,
        top_k: usize,
        constraints: &SearchConstraints,
    ) -> Result<()> {
        if query.trim().is_empty() {
            return Err(LecternError::invalid_query("Query text cannot be empty"));
        }
        let length = query.chars().count();
        if length > self.retrieval.max_query_length {
            return Err(LecternError::invalid_query(format!(
                "Query is {} characters, maximum is {}",
                length, self.retrieval.max_query_length
            )));
        }
        if top_k == 0 {
            return Err(LecternError::invalid_configuration("top_k must be at least 1"));
        }
        constraints.validate()
    }

    fn fetch_k(&self, top_k: usize) -> usize {
        top_k.saturating_mul(self.retrieval.candidate_multiplier.max(1))
    }

    fn finish(&self, query: &str, started: Instant, returned: usize) {
        let elapsed = started.elapsed();
        self.stats.record(elapsed);
        self.suggestions.record(query);
        info!(
            returned,
            elapsed_ms = elapsed.as_secs_f64() * 1000.0,
            "Query complete"
        );
    }
}

/// Deduplicate, then rescale scores that fall outside [0, 1]
fn prepare_hits(hits: Vec<OracleHit>) -> Vec<(PassageId, f32)> {
    let mut pairs: Vec<(PassageId, f32)> = deduplicate_hits(hits)
        .into_iter()
        .map(|hit| (hit.passage_id, hit.raw_score))
        .collect();
    normalize_raw_scores(&mut pairs);
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::EmbeddingError;
    use crate::retrieval::oracle::{InMemoryPassageStore, OracleError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct UnitEmbedder;

    impl Embedder for UnitEmbedder {
        fn embed(&self, _text: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
            Ok(vec![1.0, 0.0])
        }

        fn embed_batch(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, EmbeddingError> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }

        fn dimension(&self) -> usize {
            2
        }

        fn model_name(&self) -> &str {
            "unit"
        }
    }

    #[derive(Default)]
    struct CountingOracle {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SimilarityOracle for CountingOracle {
        async fn search(
            &self,
            _query_vector: &[f32],
            _top_k: usize,
            _constraints: &SearchConstraints,
        ) -> std::result::Result<Vec<OracleHit>, OracleError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![OracleHit::new(1, 0.8)])
        }
    }

    fn engine(oracle: Arc<CountingOracle>) -> SearchEngine {
        let store = InMemoryPassageStore::from_passages(vec![Passage::new(1, "doc", 0, "The cat sat")]);
        SearchEngine::new(&Config::default(), Arc::new(UnitEmbedder), oracle, Arc::new(store))
    }

    #[tokio::test]
    async fn test_validation_precedes_oracle_calls() {
        let oracle = Arc::new(CountingOracle::default());
        let engine = engine(Arc::clone(&oracle));
        let none = SearchConstraints::default();

        assert!(matches!(
            engine.semantic_search("   ", 5, &none).await,
            Err(LecternError::InvalidQuery { .. })
        ));
        assert!(matches!(
            engine.semantic_search("cat", 0, &none).await,
            Err(LecternError::InvalidConfiguration { .. })
        ));
        let long = "x".repeat(engine.retrieval_config().max_query_length + 1);
        assert!(matches!(
            engine.semantic_search(&long, 5, &none).await,
            Err(LecternError::InvalidQuery { .. })
        ));
        assert!(matches!(
            engine.retrieve_context("cat", 5, 0, &none).await,
            Err(LecternError::InvalidBudget { budget: 0 })
        ));

        assert_eq!(oracle.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_hybrid_requires_lexical_oracle() {
        let oracle = Arc::new(CountingOracle::default());
        let engine = engine(Arc::clone(&oracle));

        let result = engine
            .hybrid_search("cat", 5, &SearchConstraints::default(), 0.5, 0.5)
            .await;
        assert!(matches!(result, Err(LecternError::InvalidConfiguration { .. })));
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_semantic_search_records_stats_and_suggestions() {
        let oracle = Arc::new(CountingOracle::default());
        let engine = engine(Arc::clone(&oracle));

        let results = engine
            .semantic_search("cat", 5, &SearchConstraints::default())
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert!((results[0].adjusted_score - 0.9).abs() < 1e-5);

        assert_eq!(engine.stats().query_count, 1);
        assert_eq!(engine.suggest("ca", 5), vec!["cat"]);
    }

    /// Records the id batches requested from the store
    #[derive(Default)]
    struct RecordingStore {
        inner: InMemoryPassageStore,
        requests: parking_lot::Mutex<Vec<Vec<PassageId>>>,
    }

    #[async_trait]
    impl PassageStore for RecordingStore {
        async fn get(&self, id: PassageId) -> std::result::Result<Option<Passage>, OracleError> {
            self.inner.get(id).await
        }

        async fn get_many(
            &self,
            ids: &[PassageId],
        ) -> std::result::Result<Vec<Option<Passage>>, OracleError> {
            self.requests.lock().push(ids.to_vec());
            self.inner.get_many(ids).await
        }
    }

    #[tokio::test]
    async fn test_hydrate_requests_each_id_once() {
        let store = Arc::new(RecordingStore::default());
        for id in 1..=3 {
            store.inner.insert(Passage::new(id, "doc", id as u32, "text"));
        }
        let engine = SearchEngine::new(
            &Config::default(),
            Arc::new(UnitEmbedder),
            Arc::new(CountingOracle::default()),
            store.clone(),
        );

        let passages = engine
            .hydrate([3, 1, 3, 2, 1, 9].into_iter())
            .await
            .unwrap();

        assert_eq!(passages.len(), 3);
        assert_eq!(*store.requests.lock(), vec![vec![3, 1, 2, 9]]);
    }

    #[test]
    fn test_prepare_hits() {
        let hits = vec![
            OracleHit::new(1, 8.0),
            OracleHit::new(2, 4.0),
            OracleHit::new(1, 2.0),
        ];
        assert_eq!(prepare_hits(hits), vec![(1, 1.0), (2, 0.5)]);
    }

    #[test]
    fn test_mode_display() {
        assert_eq!(SearchMode::Semantic.to_string(), "semantic");
        assert_eq!(SearchMode::Hybrid.to_string(), "hybrid");
    }
}
