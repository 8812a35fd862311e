//! Multi-factor relevance scoring
//!
//! Converts a raw oracle score into an adjusted score with additive, independently
//! verifiable boosts. Every boost is a configured constant added to the raw score;
//! the sum is clamped to 1.0.

use crate::config::ScoringConfig;
use crate::error::{LecternError, Result};
use crate::retrieval::passage::{assign_ranks, sort_scored, Passage, ScoreBreakdown, ScoredCandidate};
use crate::retrieval::text;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;
use std::sync::Arc;

/// Time source for the recency boost
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock pinned to one instant
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Query prepared once and reused for every candidate
struct PreparedQuery {
    normalized: String,
    terms: Vec<String>,
}

impl PreparedQuery {
    fn new(query: &str) -> Result<Self> {
        let normalized = text::normalize(query);
        if normalized.is_empty() {
            return Err(LecternError::invalid_query("Query text cannot be empty"));
        }
        Ok(Self {
            terms: text::tokenize(&normalized),
            normalized,
        })
    }
}

/// Additive boost scorer
pub struct RelevanceScorer {
    config: ScoringConfig,
    clock: Arc<dyn Clock>,
}

impl RelevanceScorer {
    pub fn new(config: ScoringConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: ScoringConfig, clock: Arc<dyn Clock>) -> Self {
        Self { config, clock }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Adjusted score for one passage
    pub fn score(&self, passage: &Passage, raw_score: f32, query: &str) -> Result<f32> {
        Ok(self.explain(passage, raw_score, query)?.adjusted())
    }

    /// Per-boost breakdown for one passage
    pub fn explain(&self, passage: &Passage, raw_score: f32, query: &str) -> Result<ScoreBreakdown> {
        let prepared = PreparedQuery::new(query)?;
        Ok(self.breakdown(passage, raw_score, &prepared, self.clock.now()))
    }

    /// Score, sort and rank a batch of hydrated hits
    pub fn score_all(
        &self,
        hits: Vec<(Arc<Passage>, f32)>,
        query: &str,
    ) -> Result<Vec<ScoredCandidate>> {
        let prepared = PreparedQuery::new(query)?;
        let now = self.clock.now();

        let mut candidates: Vec<ScoredCandidate> = hits
            .into_iter()
            .map(|(passage, raw)| {
                let breakdown = self.breakdown(&passage, raw, &prepared, now);
                ScoredCandidate {
                    raw_score: breakdown.raw,
                    adjusted_score: breakdown.adjusted(),
                    rank: 0,
                    breakdown,
                    passage,
                    highlighted: None,
                }
            })
            .collect();

        sort_scored(&mut candidates);
        assign_ranks(&mut candidates);
        Ok(candidates)
    }

    fn breakdown(
        &self,
        passage: &Passage,
        raw_score: f32,
        query: &PreparedQuery,
        now: DateTime<Utc>,
    ) -> ScoreBreakdown {
        let cfg = &self.config;
        let mut breakdown = ScoreBreakdown {
            raw: clamp_raw(raw_score),
            ..Default::default()
        };

        if text::normalize(&passage.text).contains(&query.normalized) {
            breakdown.exact_match = cfg.exact_match_boost;
        }

        if let Some(section) = passage.metadata.section_title.as_deref() {
            breakdown.section_present = cfg.section_present_boost;

            let section_terms: HashSet<String> = text::tokenize(section).into_iter().collect();
            if query.terms.iter().any(|t| section_terms.contains(t)) {
                breakdown.section_match = cfg.section_match_boost;
            }
        }

        let length = passage.text.chars().count();
        if (cfg.ideal_length_min..=cfg.ideal_length_max).contains(&length) {
            breakdown.ideal_length = cfg.ideal_length_boost;
        }

        if let Some(created_at) = passage.metadata.created_at {
            let age = now.signed_duration_since(created_at);
            if age >= Duration::zero() && age <= Duration::days(cfg.recency_window_days) {
                breakdown.recency = cfg.recency_boost;
            }
        }

        breakdown
    }
}

/// Clamp an oracle score into [0, 1]; NaN counts as no similarity
pub fn clamp_raw(raw: f32) -> f32 {
    if raw.is_nan() {
        0.0
    } else {
        raw.clamp(0.0, 1.0)
    }
}

/// Rescale a hit list by its maximum when any score falls outside [0, 1]
///
/// Lists already inside the range are returned unchanged.
pub fn normalize_raw_scores<T>(hits: &mut [(T, f32)]) {
    let out_of_range = hits
        .iter()
        .any(|(_, s)| s.is_nan() || *s < 0.0 || *s > 1.0);
    if !out_of_range {
        return;
    }

    let max = hits
        .iter()
        .map(|(_, s)| *s)
        .filter(|s| s.is_finite())
        .fold(0.0_f32, f32::max);

    for (_, score) in hits.iter_mut() {
        *score = if max > 0.0 {
            clamp_raw(*score / max)
        } else {
            0.0
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::passage::PassageMetadata;
    use chrono::TimeZone;

    fn scorer() -> RelevanceScorer {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        RelevanceScorer::with_clock(ScoringConfig::default(), Arc::new(FixedClock(now)))
    }

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-5
    }

    #[test]
    fn test_exact_match_orders_candidates() {
        let scorer = scorer();
        let hits = vec![
            (Arc::new(Passage::new(1, "doc", 0, "The cat sat")), 0.80),
            (Arc::new(Passage::new(2, "doc", 1, "A dog ran")), 0.79),
        ];

        let ranked = scorer.score_all(hits, "cat").unwrap();

        assert_eq!(ranked[0].passage.id, 1);
        assert!(approx(ranked[0].adjusted_score, 0.90));
        assert!(approx(ranked[1].adjusted_score, 0.79));
        assert_eq!(ranked[1].rank, 2);
    }

    #[test]
    fn test_exact_match_is_whitespace_and_case_insensitive() {
        let scorer = scorer();
        let passage = Passage::new(1, "doc", 0, "The  Krebs\ncycle releases CO2");
        let breakdown = scorer.explain(&passage, 0.5, "krebs   CYCLE").unwrap();
        assert!(approx(breakdown.exact_match, 0.10));
    }

    #[test]
    fn test_section_boosts() {
        let scorer = scorer();
        let passage = Passage::new(1, "doc", 0, "Energy is stored in bonds").with_metadata(
            PassageMetadata {
                section_title: Some("Cellular Respiration".to_string()),
                ..Default::default()
            },
        );

        let matching = scorer.explain(&passage, 0.5, "what is respiration").unwrap();
        assert!(approx(matching.section_match, 0.05));
        assert!(approx(matching.section_present, 0.02));

        let other = scorer.explain(&passage, 0.5, "photosynthesis").unwrap();
        assert_eq!(other.section_match, 0.0);
        assert!(approx(other.section_present, 0.02));
    }

    #[test]
    fn test_ideal_length_boost() {
        let scorer = scorer();
        let short = Passage::new(1, "doc", 0, "tiny");
        let ideal = Passage::new(2, "doc", 0, "x".repeat(200));
        let long = Passage::new(3, "doc", 0, "x".repeat(5000));

        assert_eq!(scorer.explain(&short, 0.5, "q").unwrap().ideal_length, 0.0);
        assert!(approx(scorer.explain(&ideal, 0.5, "q").unwrap().ideal_length, 0.02));
        assert_eq!(scorer.explain(&long, 0.5, "q").unwrap().ideal_length, 0.0);
    }

    #[test]
    fn test_recency_uses_injected_clock() {
        let scorer = scorer();
        let recent = Passage::new(1, "doc", 0, "notes").with_metadata(PassageMetadata {
            created_at: Some(Utc.with_ymd_and_hms(2026, 2, 20, 0, 0, 0).unwrap()),
            ..Default::default()
        });
        let stale = Passage::new(2, "doc", 0, "notes").with_metadata(PassageMetadata {
            created_at: Some(Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()),
            ..Default::default()
        });

        assert!(approx(scorer.explain(&recent, 0.5, "q").unwrap().recency, 0.01));
        assert_eq!(scorer.explain(&stale, 0.5, "q").unwrap().recency, 0.0);
    }

    #[test]
    fn test_adjusted_score_capped() {
        let scorer = scorer();
        let passage = Passage::new(1, "doc", 0, "cat");
        assert_eq!(scorer.score(&passage, 0.99, "cat").unwrap(), 1.0);
    }

    #[test]
    fn test_empty_query_rejected() {
        let scorer = scorer();
        let passage = Passage::new(1, "doc", 0, "anything");
        assert!(matches!(
            scorer.score(&passage, 0.5, "   "),
            Err(LecternError::InvalidQuery { .. })
        ));
    }

    #[test]
    fn test_raw_score_clamped() {
        let scorer = scorer();
        let passage = Passage::new(1, "doc", 0, "unrelated");
        assert_eq!(scorer.score(&passage, 1.7, "query").unwrap(), 1.0);
        assert_eq!(scorer.score(&passage, -0.3, "query").unwrap(), 0.0);
        assert_eq!(scorer.score(&passage, f32::NAN, "query").unwrap(), 0.0);
    }

    #[test]
    fn test_scoring_is_deterministic() {
        let scorer = scorer();
        let hits: Vec<(Arc<Passage>, f32)> = (0..20)
            .map(|i| (Arc::new(Passage::new(i, "doc", (i % 3) as u32, "same text")), 0.5))
            .collect();

        let first = scorer.score_all(hits.clone(), "text").unwrap();
        let second = scorer.score_all(hits, "text").unwrap();

        let ids = |v: &[ScoredCandidate]| v.iter().map(|c| c.passage.id).collect::<Vec<_>>();
        assert_eq!(ids(&first), ids(&second));
    }

    #[test]
    fn test_normalize_raw_scores() {
        let mut in_range = vec![(1, 0.4), (2, 0.9)];
        normalize_raw_scores(&mut in_range);
        assert_eq!(in_range, vec![(1, 0.4), (2, 0.9)]);

        let mut bm25 = vec![(1, 12.0), (2, 6.0), (3, 0.0)];
        normalize_raw_scores(&mut bm25);
        assert_eq!(bm25, vec![(1, 1.0), (2, 0.5), (3, 0.0)]);
    }
}
