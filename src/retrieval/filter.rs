//! Metadata and score constraints applied to ranked candidates
//!
//! Filtering only removes elements; relative order is preserved and nothing is re-sorted.

use crate::retrieval::passage::{Passage, RankedPassage};
use crate::retrieval::SearchConstraints;

/// Stateless constraint checker
pub struct ResultFilter;

impl ResultFilter {
    /// Keep the candidates satisfying every constraint, in their original order
    pub fn filter<T: RankedPassage>(candidates: Vec<T>, constraints: &SearchConstraints) -> Vec<T> {
        if constraints.is_empty() {
            return candidates;
        }

        candidates
            .into_iter()
            .filter(|c| Self::accepts(c, constraints))
            .collect()
    }

    /// Same as `filter` but ignores `min_score`, for use before scores are final
    pub fn filter_metadata<T: RankedPassage>(
        candidates: Vec<T>,
        constraints: &SearchConstraints,
    ) -> Vec<T> {
        candidates
            .into_iter()
            .filter(|c| Self::matches_metadata(c.passage(), constraints))
            .collect()
    }

    pub fn accepts<T: RankedPassage>(candidate: &T, constraints: &SearchConstraints) -> bool {
        if let Some(min_score) = constraints.min_score {
            if candidate.relevance() < min_score {
                return false;
            }
        }
        Self::matches_metadata(candidate.passage(), constraints)
    }

    /// Source, category, language and time window checks
    pub fn matches_metadata(passage: &Passage, constraints: &SearchConstraints) -> bool {
        if !constraints.source_ids.is_empty() && !constraints.source_ids.contains(&passage.source_id)
        {
            return false;
        }

        let metadata = &passage.metadata;

        if !constraints.categories.is_empty()
            && !metadata
                .category
                .as_ref()
                .is_some_and(|c| constraints.categories.contains(c))
        {
            return false;
        }

        if !constraints.languages.is_empty()
            && !metadata
                .language
                .as_ref()
                .is_some_and(|l| constraints.languages.contains(l))
        {
            return false;
        }

        if constraints.created_after.is_some() || constraints.created_before.is_some() {
            let Some(created_at) = metadata.created_at else {
                return false;
            };
            if constraints.created_after.is_some_and(|after| created_at < after) {
                return false;
            }
            if constraints
                .created_before
                .is_some_and(|before| created_at > before)
            {
                return false;
            }
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::passage::{PassageMetadata, ScoreBreakdown, ScoredCandidate};
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;

    fn candidate(id: i64, source: &str, score: f32, metadata: PassageMetadata) -> ScoredCandidate {
        ScoredCandidate {
            passage: Arc::new(Passage::new(id, source, id as u32, "text").with_metadata(metadata)),
            raw_score: score,
            adjusted_score: score,
            rank: id as usize,
            breakdown: ScoreBreakdown::default(),
            highlighted: None,
        }
    }

    fn sample() -> Vec<ScoredCandidate> {
        vec![
            candidate(
                1,
                "bio.pdf",
                0.9,
                PassageMetadata {
                    language: Some("en".to_string()),
                    category: Some("lecture".to_string()),
                    created_at: Some(Utc.with_ymd_and_hms(2026, 1, 10, 0, 0, 0).unwrap()),
                    ..Default::default()
                },
            ),
            candidate(
                2,
                "chem.pdf",
                0.7,
                PassageMetadata {
                    language: Some("de".to_string()),
                    category: Some("textbook".to_string()),
                    created_at: Some(Utc.with_ymd_and_hms(2025, 5, 1, 0, 0, 0).unwrap()),
                    ..Default::default()
                },
            ),
            candidate(3, "bio.pdf", 0.4, PassageMetadata::default()),
        ]
    }

    fn ids(candidates: &[ScoredCandidate]) -> Vec<i64> {
        candidates.iter().map(|c| c.passage.id).collect()
    }

    #[test]
    fn test_empty_constraints_are_noop() {
        let filtered = ResultFilter::filter(sample(), &SearchConstraints::default());
        assert_eq!(ids(&filtered), vec![1, 2, 3]);
    }

    #[test]
    fn test_source_filter_preserves_order() {
        let constraints = SearchConstraints::default().with_sources(["bio.pdf"]);
        let filtered = ResultFilter::filter(sample(), &constraints);
        assert_eq!(ids(&filtered), vec![1, 3]);
    }

    #[test]
    fn test_category_and_language() {
        let constraints = SearchConstraints {
            categories: ["lecture", "textbook"].iter().map(|s| s.to_string()).collect(),
            languages: ["de"].iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        };
        let filtered = ResultFilter::filter(sample(), &constraints);
        assert_eq!(ids(&filtered), vec![2]);
    }

    #[test]
    fn test_time_window_excludes_undated() {
        let constraints = SearchConstraints {
            created_after: Some(Utc.with_ymd_and_hms(2025, 12, 1, 0, 0, 0).unwrap()),
            ..Default::default()
        };
        let filtered = ResultFilter::filter(sample(), &constraints);
        assert_eq!(ids(&filtered), vec![1]);

        let constraints = SearchConstraints {
            created_before: Some(Utc.with_ymd_and_hms(2025, 12, 1, 0, 0, 0).unwrap()),
            ..Default::default()
        };
        let filtered = ResultFilter::filter(sample(), &constraints);
        assert_eq!(ids(&filtered), vec![2]);
    }

    #[test]
    fn test_min_score() {
        let constraints = SearchConstraints {
            min_score: Some(0.7),
            ..Default::default()
        };
        let filtered = ResultFilter::filter(sample(), &constraints);
        assert_eq!(ids(&filtered), vec![1, 2]);

        let metadata_only = ResultFilter::filter_metadata(sample(), &constraints);
        assert_eq!(ids(&metadata_only), vec![1, 2, 3]);
    }

    #[test]
    fn test_filter_is_idempotent() {
        let constraints = SearchConstraints {
            min_score: Some(0.5),
            ..SearchConstraints::default().with_sources(["bio.pdf", "chem.pdf"])
        };
        let once = ResultFilter::filter(sample(), &constraints);
        let twice = ResultFilter::filter(once.clone(), &constraints);
        assert_eq!(ids(&once), ids(&twice));
    }
}
