//! Weighted Reciprocal Rank Fusion for combining semantic and lexical rankings

use crate::config::validator::check_weights;
use crate::error::{LecternError, Result};
use crate::retrieval::passage::{
    assign_ranks, tie_break, FusedCandidate, Passage, PassageId, PresentIn, ScoredCandidate,
};
use ahash::AHashMap;
use std::sync::Arc;

/// Standard RRF damping constant
pub const DEFAULT_RRF_K: f32 = 60.0;

/// Configuration for fusion algorithm
#[derive(Debug, Clone, Copy)]
pub struct FusionConfig {
    /// RRF K constant (typically 60)
    pub rrf_k: f32,

    /// Weight for semantic results
    pub semantic_weight: f32,

    /// Weight for lexical results
    pub lexical_weight: f32,
}

impl FusionConfig {
    /// Validated constructor; weights must be non-negative and sum to 1.0
    pub fn new(rrf_k: f32, semantic_weight: f32, lexical_weight: f32) -> Result<Self> {
        if !(rrf_k.is_finite() && rrf_k > 0.0) {
            return Err(LecternError::invalid_configuration(format!(
                "RRF k must be positive, got {}",
                rrf_k
            )));
        }
        check_weights(semantic_weight, lexical_weight)
            .map_err(LecternError::invalid_configuration)?;

        Ok(Self {
            rrf_k,
            semantic_weight,
            lexical_weight,
        })
    }

    fn component(&self, weight: f32, rank: Option<usize>) -> f32 {
        match rank {
            Some(rank) => weight * (1.0 / (self.rrf_k + rank as f32)),
            None => 0.0,
        }
    }
}

struct Accumulator {
    passage: Arc<Passage>,
    semantic_rank: Option<usize>,
    lexical_rank: Option<usize>,
    adjusted_score: f32,
}

/// Merge two rank-sorted lists into one fused ranking
///
/// RRF formula: score(id) = w_s / (k + rank_s(id)) + w_l / (k + rank_l(id)),
/// where a missing rank contributes 0. Ranks are 1-based list positions; a
/// repeated id within one list keeps its first (best) position.
///
/// Ties are broken by presence in both lists, then passage position, then id.
pub fn fuse(
    semantic_ranked: &[ScoredCandidate],
    lexical_ranked: &[ScoredCandidate],
    config: &FusionConfig,
) -> Vec<FusedCandidate> {
    let mut entries: AHashMap<PassageId, Accumulator> = AHashMap::new();

    for (index, candidate) in semantic_ranked.iter().enumerate() {
        let entry = entries
            .entry(candidate.passage.id)
            .or_insert_with(|| Accumulator {
                passage: Arc::clone(&candidate.passage),
                semantic_rank: None,
                lexical_rank: None,
                adjusted_score: candidate.adjusted_score,
            });
        if entry.semantic_rank.is_none() {
            entry.semantic_rank = Some(index + 1);
        }
    }

    for (index, candidate) in lexical_ranked.iter().enumerate() {
        let entry = entries
            .entry(candidate.passage.id)
            .or_insert_with(|| Accumulator {
                passage: Arc::clone(&candidate.passage),
                semantic_rank: None,
                lexical_rank: None,
                adjusted_score: candidate.adjusted_score,
            });
        if entry.lexical_rank.is_none() {
            entry.lexical_rank = Some(index + 1);
            entry.adjusted_score = entry.adjusted_score.max(candidate.adjusted_score);
        }
    }

    let mut fused: Vec<FusedCandidate> = entries
        .into_values()
        .map(|acc| {
            let fused_score = config.component(config.semantic_weight, acc.semantic_rank)
                + config.component(config.lexical_weight, acc.lexical_rank);
            FusedCandidate {
                passage: acc.passage,
                fused_score,
                present_in: PresentIn {
                    semantic: acc.semantic_rank.is_some(),
                    lexical: acc.lexical_rank.is_some(),
                },
                semantic_rank: acc.semantic_rank,
                lexical_rank: acc.lexical_rank,
                adjusted_score: acc.adjusted_score,
                rank: 0,
                highlighted: None,
            }
        })
        .collect();

    fused.sort_by(|a, b| {
        b.fused_score
            .total_cmp(&a.fused_score)
            .then_with(|| b.present_in.count().cmp(&a.present_in.count()))
            .then_with(|| tie_break(&a.passage, &b.passage))
    });
    assign_ranks(&mut fused);

    fused
}
