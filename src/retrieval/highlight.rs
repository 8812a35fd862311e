//! Query term highlighting for display
//!
//! Wraps whole-word, case-insensitive matches of query terms with a pair of
//! sentinel markers. The presentation layer maps the sentinels to its own markup.

use crate::retrieval::text;
use regex::{Regex, RegexBuilder};

/// Default opening sentinel (STX)
pub const MARK_START: &str = "\u{2}";
/// Default closing sentinel (ETX)
pub const MARK_END: &str = "\u{3}";

/// Marks query terms inside passage text
#[derive(Debug, Clone)]
pub struct Highlighter {
    open: String,
    close: String,
}

impl Default for Highlighter {
    fn default() -> Self {
        Self::new(MARK_START, MARK_END)
    }
}

impl Highlighter {
    pub fn new(open: impl Into<String>, close: impl Into<String>) -> Self {
        Self {
            open: open.into(),
            close: close.into(),
        }
    }

    /// Annotate `text`; returns it unchanged when nothing matches
    pub fn highlight(&self, text: &str, query: &str) -> String {
        let patterns = term_patterns(query);
        if patterns.is_empty() {
            return text.to_string();
        }

        let mut ranges: Vec<(usize, usize)> = patterns
            .iter()
            .flat_map(|re| re.find_iter(text).map(|m| (m.start(), m.end())))
            .collect();
        if ranges.is_empty() {
            return text.to_string();
        }

        let merged = merge_ranges(&mut ranges);

        let mut out = String::with_capacity(text.len() + merged.len() * (self.open.len() + self.close.len()));
        let mut cursor = 0;
        for (start, end) in merged {
            out.push_str(&text[cursor..start]);
            out.push_str(&self.open);
            out.push_str(&text[start..end]);
            out.push_str(&self.close);
            cursor = end;
        }
        out.push_str(&text[cursor..]);
        out
    }

    /// Replace the sentinels with presentation markup
    pub fn render(&self, highlighted: &str, open: &str, close: &str) -> String {
        highlighted.replace(&self.open, open).replace(&self.close, close)
    }

    /// Remove the sentinels, restoring the original text
    pub fn strip(&self, highlighted: &str) -> String {
        self.render(highlighted, "", "")
    }
}

fn term_patterns(query: &str) -> Vec<Regex> {
    text::tokenize(query)
        .iter()
        .filter_map(|term| {
            RegexBuilder::new(&format!(r"\b{}\b", regex::escape(term)))
                .case_insensitive(true)
                .build()
                .ok()
        })
        .collect()
}

/// Sort and merge overlapping or touching byte ranges
fn merge_ranges(ranges: &mut [(usize, usize)]) -> Vec<(usize, usize)> {
    ranges.sort_unstable();

    let mut merged: Vec<(usize, usize)> = Vec::with_capacity(ranges.len());
    for &(start, end) in ranges.iter() {
        match merged.last_mut() {
            Some(last) if start <= last.1 => last.1 = last.1.max(end),
            _ => merged.push((start, end)),
        }
    }
    merged
}
