//! Retrieval pipeline
//!
//! Semantic search, hybrid search with reciprocal rank fusion, relevance scoring,
//! constraint filtering, highlighting and RAG context assembly.

mod cache;
mod context;
mod deduplication;
mod engine;
mod filter;
mod fusion;
mod highlight;
mod oracle;
mod passage;
mod scorer;
mod stats;
mod suggest;
pub mod text;

pub use cache::{CacheKey, QueryCache};
pub use context::{CharRatioEstimator, Citation, ContextAssembler, ContextBlock, TokenEstimator};
pub use deduplication::deduplicate_hits;
pub use engine::{SearchEngine, SearchMode};
pub use filter::ResultFilter;
pub use fusion::{fuse, FusionConfig, DEFAULT_RRF_K};
pub use highlight::{Highlighter, MARK_END, MARK_START};
pub use oracle::{
    InMemoryPassageStore, LexicalOracle, OracleError, OracleHit, PassageStore, SimilarityOracle,
};
pub use passage::{
    assign_ranks, sort_scored, tie_break, FusedCandidate, MetaValue, Passage, PassageId,
    PassageMetadata, PresentIn, RankedPassage, ScoreBreakdown, ScoredCandidate,
};
pub use scorer::{clamp_raw, normalize_raw_scores, Clock, FixedClock, RelevanceScorer, SystemClock};
pub use stats::{EngineStats, StatsSnapshot};
pub use suggest::SuggestionIndex;

use crate::error::{LecternError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Optional, AND-combined restrictions on a query's results
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConstraints {
    /// Keep only passages from these sources
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub source_ids: BTreeSet<String>,

    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub categories: BTreeSet<String>,

    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub languages: BTreeSet<String>,

    /// Inclusive lower bound on `created_at`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_after: Option<DateTime<Utc>>,

    /// Inclusive upper bound on `created_at`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_before: Option<DateTime<Utc>>,

    /// Drop candidates whose adjusted score is below this
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_score: Option<f32>,
}

impl SearchConstraints {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    pub fn with_sources<I, S>(mut self, sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.source_ids.extend(sources.into_iter().map(Into::into));
        self
    }

    pub fn with_categories<I, S>(mut self, categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.categories.extend(categories.into_iter().map(Into::into));
        self
    }

    pub fn with_languages<I, S>(mut self, languages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.languages.extend(languages.into_iter().map(Into::into));
        self
    }

    pub fn created_between(
        mut self,
        after: Option<DateTime<Utc>>,
        before: Option<DateTime<Utc>>,
    ) -> Self {
        self.created_after = after;
        self.created_before = before;
        self
    }

    pub fn with_min_score(mut self, min_score: f32) -> Self {
        self.min_score = Some(min_score);
        self
    }

    /// Reject constraints no result could meaningfully satisfy
    pub fn validate(&self) -> Result<()> {
        if let Some(min_score) = self.min_score {
            if !min_score.is_finite() {
                return Err(LecternError::invalid_configuration(
                    "min_score must be a finite number",
                ));
            }
        }
        if let (Some(after), Some(before)) = (self.created_after, self.created_before) {
            if after > before {
                return Err(LecternError::invalid_configuration(format!(
                    "created_after ({}) is later than created_before ({})",
                    after, before
                )));
            }
        }
        Ok(())
    }

    /// Stable hash used in cache keys
    pub fn fingerprint(&self) -> blake3::Hash {
        // Sets are ordered, so the JSON form is canonical
        let encoded = serde_json::to_vec(self).unwrap_or_default();
        blake3::hash(&encoded)
    }
}
