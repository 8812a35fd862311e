//! Query autocompletion from previously seen queries
//!
//! Independent of the ranking pipeline: entries come from query history or a
//! static vocabulary, never from passage content.

use crate::retrieval::text;
use ahash::AHashMap;
use parking_lot::RwLock;
use std::cmp::Ordering;

/// Frequency-ordered prefix index over normalized query strings
pub struct SuggestionIndex {
    entries: RwLock<AHashMap<String, u64>>,
    max_entries: usize,
}

impl SuggestionIndex {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(AHashMap::new()),
            max_entries,
        }
    }

    /// Seed with a static vocabulary, one use per term
    pub fn with_vocabulary<I, S>(max_entries: usize, vocabulary: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let index = Self::new(max_entries);
        for term in vocabulary {
            index.record(term.as_ref());
        }
        index
    }

    /// Seed from stored `(query, count)` history
    pub fn from_history<I>(max_entries: usize, history: I) -> Self
    where
        I: IntoIterator<Item = (String, u64)>,
    {
        let index = Self::new(max_entries);
        for (query, count) in history {
            index.record_n(&query, count);
        }
        index
    }

    /// Count one use of `query`
    pub fn record(&self, query: &str) {
        self.record_n(query, 1);
    }

    fn record_n(&self, query: &str, count: u64) {
        let key = text::normalize(query);
        if key.is_empty() || count == 0 || self.max_entries == 0 {
            return;
        }

        let mut entries = self.entries.write();
        if let Some(existing) = entries.get_mut(&key) {
            *existing = existing.saturating_add(count);
            return;
        }

        if entries.len() >= self.max_entries {
            if let Some(victim) = least_used(&entries) {
                entries.remove(&victim);
            }
        }
        entries.insert(key, count);
    }

    /// Case-insensitive prefix matches, most used first, then alphabetical
    pub fn suggest(&self, prefix: &str, limit: usize) -> Vec<String> {
        let prefix = text::normalize(prefix);
        if prefix.is_empty() || limit == 0 {
            return Vec::new();
        }

        let entries = self.entries.read();
        let mut matches: Vec<(&String, u64)> = entries
            .iter()
            .filter(|(query, _)| query.starts_with(&prefix))
            .map(|(query, count)| (query, *count))
            .collect();

        matches.sort_by(|a, b| by_usage(a, b));
        matches
            .into_iter()
            .take(limit)
            .map(|(query, _)| query.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

fn by_usage(a: &(&String, u64), b: &(&String, u64)) -> Ordering {
    b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0))
}

/// Entry that would sort last in suggestion order
fn least_used(entries: &AHashMap<String, u64>) -> Option<String> {
    entries
        .iter()
        .map(|(query, count)| (query, *count))
        .max_by(by_usage)
        .map(|(query, _)| query.clone())
}
