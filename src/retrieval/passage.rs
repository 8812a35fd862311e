//! Passages and the candidate structures built around them per query

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Stable passage identifier, shared by the store and both indexes
pub type PassageId = i64;

/// Scalar value in the open metadata extension map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

/// Passage metadata with typed well-known keys and an open extension map
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PassageMetadata {
    /// Human readable title of the owning document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_title: Option<String>,

    /// Heading of the section the passage was cut from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_number: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    /// Content category (e.g. "lecture", "textbook", "exercise")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    /// Caller-defined keys
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, MetaValue>,
}

/// An immutable unit of retrievable text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    pub id: PassageId,

    /// Owning document
    pub source_id: String,

    pub text: String,

    /// Ordinal within the source
    pub position: u32,

    #[serde(default)]
    pub metadata: PassageMetadata,
}

impl Passage {
    pub fn new(
        id: PassageId,
        source_id: impl Into<String>,
        position: u32,
        text: impl Into<String>,
    ) -> Self {
        Self {
            id,
            source_id: source_id.into(),
            text: text.into(),
            position,
            metadata: PassageMetadata::default(),
        }
    }

    pub fn with_metadata(mut self, metadata: PassageMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Title used in attribution headers, falling back to the source id
    pub fn display_source(&self) -> &str {
        self.metadata
            .source_title
            .as_deref()
            .unwrap_or(&self.source_id)
    }

    /// Get a short preview of the text (first N characters)
    pub fn preview(&self, max_chars: usize) -> String {
        match self.text.char_indices().nth(max_chars) {
            Some((cut, _)) => format!("{}...", &self.text[..cut]),
            None => self.text.clone(),
        }
    }
}

/// Individual contributions to an adjusted score
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub raw: f32,
    pub exact_match: f32,
    pub section_match: f32,
    pub ideal_length: f32,
    pub section_present: f32,
    pub recency: f32,
}

impl ScoreBreakdown {
    /// Sum of all boosts
    pub fn boosts(&self) -> f32 {
        self.exact_match + self.section_match + self.ideal_length + self.section_present + self.recency
    }

    /// Raw score plus boosts, clamped to [0, 1]
    pub fn adjusted(&self) -> f32 {
        (self.raw + self.boosts()).clamp(0.0, 1.0)
    }
}

/// A passage with its per-query relevance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredCandidate {
    pub passage: Arc<Passage>,

    /// Oracle score normalized to [0, 1]
    pub raw_score: f32,

    /// Score after boosts
    pub adjusted_score: f32,

    /// 1-based rank after sorting
    pub rank: usize,

    pub breakdown: ScoreBreakdown,

    /// Passage text with query terms marked, when highlighting is on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub highlighted: Option<String>,
}

/// Which ranked lists contributed to a fused candidate
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresentIn {
    pub semantic: bool,
    pub lexical: bool,
}

impl PresentIn {
    pub fn both(&self) -> bool {
        self.semantic && self.lexical
    }

    pub fn count(&self) -> usize {
        usize::from(self.semantic) + usize::from(self.lexical)
    }
}

/// Result of merging semantic and lexical candidates for the same passage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusedCandidate {
    pub passage: Arc<Passage>,

    /// Weighted reciprocal rank fusion value
    pub fused_score: f32,

    pub present_in: PresentIn,

    /// 1-based rank within the semantic list, if present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semantic_rank: Option<usize>,

    /// 1-based rank within the lexical list, if present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lexical_rank: Option<usize>,

    /// Best adjusted score among the contributing lists
    pub adjusted_score: f32,

    /// 1-based rank after fusion
    pub rank: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub highlighted: Option<String>,
}

/// Common view over ranked results used by filtering, highlighting and context assembly
pub trait RankedPassage {
    fn passage(&self) -> &Passage;

    /// Score compared against `min_score`
    fn relevance(&self) -> f32;

    fn set_rank(&mut self, rank: usize);

    fn highlighted(&self) -> Option<&str>;

    fn set_highlighted(&mut self, highlighted: Option<String>);
}

impl RankedPassage for ScoredCandidate {
    fn passage(&self) -> &Passage {
        &self.passage
    }

    fn relevance(&self) -> f32 {
        self.adjusted_score
    }

    fn set_rank(&mut self, rank: usize) {
        self.rank = rank;
    }

    fn highlighted(&self) -> Option<&str> {
        self.highlighted.as_deref()
    }

    fn set_highlighted(&mut self, highlighted: Option<String>) {
        self.highlighted = highlighted;
    }
}

impl RankedPassage for FusedCandidate {
    fn passage(&self) -> &Passage {
        &self.passage
    }

    fn relevance(&self) -> f32 {
        self.adjusted_score
    }

    fn set_rank(&mut self, rank: usize) {
        self.rank = rank;
    }

    fn highlighted(&self) -> Option<&str> {
        self.highlighted.as_deref()
    }

    fn set_highlighted(&mut self, highlighted: Option<String>) {
        self.highlighted = highlighted;
    }
}

/// Deterministic tie-break shared by every ranked list: position, then id
pub fn tie_break(a: &Passage, b: &Passage) -> Ordering {
    a.position.cmp(&b.position).then_with(|| a.id.cmp(&b.id))
}

/// Sort by adjusted score descending with deterministic tie-breaking
pub fn sort_scored(candidates: &mut [ScoredCandidate]) {
    candidates.sort_by(|a, b| {
        b.adjusted_score
            .total_cmp(&a.adjusted_score)
            .then_with(|| tie_break(&a.passage, &b.passage))
    });
}

/// Renumber ranks 1..=n in current order
pub fn assign_ranks<T: RankedPassage>(candidates: &mut [T]) {
    for (index, candidate) in candidates.iter_mut().enumerate() {
        candidate.set_rank(index + 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: PassageId, position: u32, score: f32) -> ScoredCandidate {
        ScoredCandidate {
            passage: Arc::new(Passage::new(id, "doc", position, "text")),
            raw_score: score,
            adjusted_score: score,
            rank: 0,
            breakdown: ScoreBreakdown::default(),
            highlighted: None,
        }
    }

    #[test]
    fn test_sort_with_ties() {
        let mut candidates = vec![
            candidate(3, 2, 0.5),
            candidate(1, 5, 0.9),
            candidate(2, 2, 0.5),
            candidate(4, 1, 0.5),
        ];

        sort_scored(&mut candidates);
        assign_ranks(&mut candidates);

        let ids: Vec<PassageId> = candidates.iter().map(|c| c.passage.id).collect();
        assert_eq!(ids, vec![1, 4, 2, 3]);
        assert_eq!(candidates[0].rank, 1);
        assert_eq!(candidates[3].rank, 4);
    }

    #[test]
    fn test_metadata_json_shape() {
        let json = r#"{
            "id": 9,
            "source_id": "bio-101.pdf",
            "text": "Mitochondria produce ATP.",
            "position": 4,
            "metadata": {
                "section_title": "Cell Energy",
                "page_number": 12,
                "created_at": "2026-01-02T03:04:05Z",
                "extra": {"difficulty": 3, "reviewed": true, "tag": "exam"}
            }
        }"#;

        let passage: Passage = serde_json::from_str(json).unwrap();
        assert_eq!(passage.metadata.page_number, Some(12));
        assert_eq!(
            passage.metadata.extra.get("difficulty"),
            Some(&MetaValue::Int(3))
        );
        assert_eq!(
            passage.metadata.extra.get("reviewed"),
            Some(&MetaValue::Bool(true))
        );
        assert_eq!(passage.display_source(), "bio-101.pdf");
    }

    #[test]
    fn test_preview_respects_char_boundaries() {
        let passage = Passage::new(1, "doc", 0, "Größenordnung");
        assert_eq!(passage.preview(3), "Grö...");
        assert_eq!(passage.preview(50), "Größenordnung");
    }

    #[test]
    fn test_breakdown_clamps() {
        let breakdown = ScoreBreakdown {
            raw: 0.97,
            exact_match: 0.10,
            ..Default::default()
        };
        assert_eq!(breakdown.adjusted(), 1.0);
    }
}
