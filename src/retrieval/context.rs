//! RAG context window assembly
//!
//! Walks ranked candidates in order, appending attributed excerpts until the token
//! budget is reached. The first candidate that does not fit is cut at the last
//! sentence boundary that fits; the walk stops there.

use crate::config::ContextConfig;
use crate::error::{LecternError, Result};
use crate::retrieval::passage::{Passage, PassageId, RankedPassage};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

/// Token count approximation used for budgeting
pub trait TokenEstimator: Send + Sync {
    fn estimate(&self, text: &str) -> usize;

    /// Largest UTF-8 byte length that can estimate to at most `tokens`, when known.
    ///
    /// Lets truncation skip text that can never fit. Estimates must not decrease
    /// as text grows.
    fn max_bytes(&self, _tokens: usize) -> Option<usize> {
        None
    }
}

/// `ceil(len / chars_per_token)` over UTF-8 bytes.
///
/// A fixed approximation, not a tokenizer. Callers that need exact counts
/// supply their own `TokenEstimator`.
#[derive(Debug, Clone, Copy)]
pub struct CharRatioEstimator {
    chars_per_token: usize,
}

impl CharRatioEstimator {
    pub fn new(chars_per_token: usize) -> Self {
        Self {
            chars_per_token: chars_per_token.max(1),
        }
    }
}

impl Default for CharRatioEstimator {
    fn default() -> Self {
        Self::new(4)
    }
}

impl TokenEstimator for CharRatioEstimator {
    fn estimate(&self, text: &str) -> usize {
        text.len().div_ceil(self.chars_per_token)
    }

    fn max_bytes(&self, tokens: usize) -> Option<usize> {
        Some(tokens.saturating_mul(self.chars_per_token))
    }
}

/// Source attribution for one included passage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub passage_id: PassageId,
    pub source_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_number: Option<u32>,
}

impl Citation {
    fn from_passage(passage: &Passage) -> Self {
        Self {
            passage_id: passage.id,
            source_id: passage.source_id.clone(),
            source_title: passage.metadata.source_title.clone(),
            section_title: passage.metadata.section_title.clone(),
            page_number: passage.metadata.page_number,
        }
    }
}

/// Bounded text handed to a generator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextBlock {
    pub text: String,
    pub included_passage_ids: Vec<PassageId>,
    /// The last included passage was cut to fit the budget
    pub truncated: bool,
    pub token_estimate: usize,
    pub citations: Vec<Citation>,
}

impl ContextBlock {
    pub fn is_empty(&self) -> bool {
        self.included_passage_ids.is_empty()
    }
}

/// Builds context blocks under a token budget
pub struct ContextAssembler {
    config: ContextConfig,
    estimator: Arc<dyn TokenEstimator>,
}

impl ContextAssembler {
    pub fn new(config: ContextConfig) -> Self {
        let estimator = Arc::new(CharRatioEstimator::new(config.chars_per_token));
        Self { config, estimator }
    }

    pub fn with_estimator(config: ContextConfig, estimator: Arc<dyn TokenEstimator>) -> Self {
        Self { config, estimator }
    }

    pub fn estimator(&self) -> &dyn TokenEstimator {
        self.estimator.as_ref()
    }

    /// Assemble ranked candidates into a context block of at most `token_budget` tokens
    pub fn assemble<T: RankedPassage>(
        &self,
        ranked_candidates: &[T],
        token_budget: usize,
    ) -> Result<ContextBlock> {
        if token_budget == 0 {
            return Err(LecternError::InvalidBudget {
                budget: token_budget,
            });
        }

        let mut block = ContextBlock::default();
        let mut seen: HashSet<PassageId> = HashSet::new();

        for candidate in ranked_candidates {
            let passage = candidate.passage();
            if !seen.insert(passage.id) {
                continue;
            }

            let prefix = self.entry_prefix(passage, block.is_empty());
            let full = format!("{}{}", prefix, passage.text);
            let full_tokens = self.estimator.estimate(&full);

            if block.token_estimate + full_tokens <= token_budget {
                self.push(&mut block, passage, full, full_tokens);
                continue;
            }

            if block.token_estimate < token_budget {
                let remaining = token_budget - block.token_estimate;
                match self.truncate(&prefix, &passage.text, remaining) {
                    Some((entry, tokens)) => {
                        self.push(&mut block, passage, entry, tokens);
                        block.truncated = true;
                    }
                    None => {
                        tracing::debug!(
                            passage_id = passage.id,
                            remaining,
                            "Skipping partial excerpt below minimum fragment size"
                        );
                    }
                }
            }
            break;
        }

        Ok(block)
    }

    fn push(&self, block: &mut ContextBlock, passage: &Passage, entry: String, tokens: usize) {
        block.text.push_str(&entry);
        block.token_estimate += tokens;
        block.included_passage_ids.push(passage.id);
        block.citations.push(Citation::from_passage(passage));
    }

    /// Separator (for all but the first entry) plus attribution header
    fn entry_prefix(&self, passage: &Passage, first: bool) -> String {
        let separator = if first { "" } else { self.config.separator.as_str() };
        match passage.metadata.page_number {
            Some(page) => format!(
                "{}[Source: {}, p. {}]\n",
                separator,
                passage.display_source(),
                page
            ),
            None => format!("{}[Source: {}]\n", separator, passage.display_source()),
        }
    }

    /// Longest excerpt ending on a sentence boundary (or, failing that, a word
    /// boundary) whose entry fits in `remaining` tokens
    fn truncate(&self, prefix: &str, body: &str, remaining: usize) -> Option<(String, usize)> {
        // Boundaries past `limit` can never fit
        let limit = match self.estimator.max_bytes(remaining) {
            Some(bytes) => floor_char_boundary(body, bytes.saturating_sub(prefix.len())),
            None => body.len(),
        };
        // One extra char so a trailing '.' can see what follows it
        let window_end = body[limit..]
            .chars()
            .next()
            .map_or(limit, |c| limit + c.len_utf8());
        let window = &body[..window_end];

        let within = |boundaries: Vec<usize>| -> Vec<usize> {
            boundaries.into_iter().filter(|cut| *cut <= limit).collect()
        };

        self.longest_fit(prefix, body, &within(sentence_boundaries(window)), remaining)
            .or_else(|| self.longest_fit(prefix, body, &within(word_boundaries(window)), remaining))
    }

    /// Binary search over ascending cut offsets for the last one whose entry fits
    fn longest_fit(
        &self,
        prefix: &str,
        body: &str,
        cuts: &[usize],
        remaining: usize,
    ) -> Option<(String, usize)> {
        let entry_for = |cut: usize| format!("{}{}", prefix, body[..cut].trim_end());

        let fitting = cuts.partition_point(|cut| self.estimator.estimate(&entry_for(*cut)) <= remaining);
        let cut = *cuts[..fitting].last()?;

        if body[..cut].trim_end().chars().count() < self.config.min_fragment_chars {
            return None;
        }
        let entry = entry_for(cut);
        let tokens = self.estimator.estimate(&entry);
        Some((entry, tokens))
    }
}

fn floor_char_boundary(text: &str, index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    let mut index = index;
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

/// Byte offsets just past sentence-ending punctuation or before a line break
fn sentence_boundaries(text: &str) -> Vec<usize> {
    let mut boundaries = Vec::new();
    let mut chars = text.char_indices().peekable();
    while let Some((index, c)) = chars.next() {
        let next_is_break = chars.peek().map_or(true, |(_, n)| n.is_whitespace());
        if matches!(c, '.' | '!' | '?') && next_is_break {
            boundaries.push(index + c.len_utf8());
        } else if c == '\n' && index > 0 && boundaries.last() != Some(&index) {
            boundaries.push(index);
        }
    }
    boundaries
}

/// Byte offsets of whitespace between words
fn word_boundaries(text: &str) -> Vec<usize> {
    text.char_indices()
        .filter(|(index, c)| *index > 0 && c.is_whitespace())
        .map(|(index, _)| index)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::passage::{PassageMetadata, ScoreBreakdown, ScoredCandidate};

    fn candidate(id: PassageId, source: &str, text: &str) -> ScoredCandidate {
        ScoredCandidate {
            passage: Arc::new(Passage::new(id, source, id as u32, text)),
            raw_score: 0.5,
            adjusted_score: 0.5,
            rank: id as usize,
            breakdown: ScoreBreakdown::default(),
            highlighted: None,
        }
    }

    fn assembler() -> ContextAssembler {
        ContextAssembler::new(ContextConfig::default())
    }

    #[test]
    fn test_empty_candidates() {
        let block = assembler().assemble::<ScoredCandidate>(&[], 100).unwrap();
        assert_eq!(block.text, "");
        assert!(block.included_passage_ids.is_empty());
        assert!(!block.truncated);
        assert_eq!(block.token_estimate, 0);
    }

    #[test]
    fn test_zero_budget_rejected() {
        let candidates = vec![candidate(1, "notes", "Some text.")];
        assert!(matches!(
            assembler().assemble(&candidates, 0),
            Err(LecternError::InvalidBudget { budget: 0 })
        ));
    }

    #[test]
    fn test_truncates_long_passage_at_sentence() {
        let sentence = "Photosynthesis converts light into chemical energy. ";
        let text: String = sentence.repeat(6);
        assert!(text.len() >= 300);

        let block = assembler()
            .assemble(&[candidate(1, "notes", text.trim_end())], 50)
            .unwrap();

        assert!(block.truncated);
        assert!(block.token_estimate <= 50);
        assert_eq!(block.included_passage_ids, vec![1]);
        assert!(block.text.starts_with("[Source: notes]\n"));
        assert!(block.text.ends_with("energy."));
    }

    #[test]
    fn test_full_entries_with_attribution() {
        let mut first = candidate(1, "bio.pdf", "Cells divide by mitosis.");
        Arc::make_mut(&mut first.passage).metadata = PassageMetadata {
            source_title: Some("Biology 101".to_string()),
            page_number: Some(4),
            ..Default::default()
        };
        let second = candidate(2, "chem.pdf", "Acids donate protons.");

        let block = assembler().assemble(&[first, second], 500).unwrap();

        assert_eq!(
            block.text,
            "[Source: Biology 101, p. 4]\nCells divide by mitosis.\n\n[Source: chem.pdf]\nAcids donate protons."
        );
        assert!(!block.truncated);
        assert_eq!(block.citations.len(), 2);
        assert_eq!(block.citations[0].page_number, Some(4));
    }

    #[test]
    fn test_skips_tiny_fragment() {
        let first = candidate(1, "a", &"word ".repeat(30));
        let second = candidate(2, "b", &"Another long sentence here. ".repeat(10));

        let first_tokens = assembler()
            .estimator()
            .estimate(&format!("[Source: a]\n{}", first.passage.text));
        // Leave room for the second header and a handful of characters only
        let budget = first_tokens + 8;

        let block = assembler().assemble(&[first, second], budget).unwrap();
        assert_eq!(block.included_passage_ids, vec![1]);
        assert!(!block.truncated);
        assert!(block.token_estimate <= budget);
    }

    #[test]
    fn test_duplicates_included_once() {
        let candidates = vec![
            candidate(1, "a", "First passage."),
            candidate(1, "a", "First passage."),
            candidate(2, "b", "Second passage."),
        ];
        let block = assembler().assemble(&candidates, 1000).unwrap();
        assert_eq!(block.included_passage_ids, vec![1, 2]);
    }

    #[test]
    fn test_header_larger_than_budget() {
        let block = assembler()
            .assemble(&[candidate(1, "a-very-long-source-name.pdf", "Text here.")], 2)
            .unwrap();
        assert!(block.is_empty());
        assert_eq!(block.token_estimate, 0);
    }

    #[test]
    fn test_word_boundary_fallback() {
        let text = "a ".repeat(20) + &"b".repeat(200);
        let boundaries = word_boundaries(&text);
        assert!(!boundaries.is_empty());

        let run_on = "x".repeat(30) + " " + &"y ".repeat(200);
        let block = assembler().assemble(&[candidate(1, "s", &run_on)], 30).unwrap();
        assert!(block.truncated);
        assert!(block.token_estimate <= 30);
    }

    #[test]
    fn test_megabyte_passage_truncates_quickly() {
        let sentences = "Cells need energy. ".repeat(60_000);
        let words = "word ".repeat(250_000);
        assert!(sentences.len() >= 1_000_000 && words.len() >= 1_000_000);

        let started = std::time::Instant::now();
        let by_sentence = assembler()
            .assemble(&[candidate(1, "notes", &sentences)], 50)
            .unwrap();
        let by_word = assembler().assemble(&[candidate(2, "notes", &words)], 50).unwrap();
        assert!(started.elapsed() < std::time::Duration::from_secs(2));

        assert!(by_sentence.truncated);
        assert!(by_sentence.token_estimate <= 50);
        assert!(by_sentence.text.ends_with("energy."));
        assert!(by_word.truncated);
        assert!(by_word.token_estimate <= 50);
        assert!(by_word.text.ends_with("word"));
    }

    struct WordCount;

    impl TokenEstimator for WordCount {
        fn estimate(&self, text: &str) -> usize {
            text.split_whitespace().count()
        }
    }

    #[test]
    fn test_estimator_without_byte_bound() {
        let assembler = ContextAssembler::with_estimator(ContextConfig::default(), Arc::new(WordCount));
        let text = "Alpha beta gamma. ".repeat(20);

        // Header is two words, leaving room for six three-word sentences
        let block = assembler.assemble(&[candidate(1, "notes", &text)], 20).unwrap();

        assert!(block.truncated);
        assert_eq!(block.token_estimate, 20);
        assert!(block.text.ends_with("gamma."));
    }

    #[test]
    fn test_sentence_boundaries() {
        let text = "One. Two? Three!\nFour 3.5 five.";
        assert_eq!(sentence_boundaries(text), vec![4, 9, 16, 31]);
    }
}
