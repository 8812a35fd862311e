//! Query normalization and tokenization shared by scoring, highlighting and lexical search

/// Lowercase and collapse runs of whitespace to a single space
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Split on anything that is not alphanumeric, lowercase, drop duplicates (first occurrence wins)
pub fn tokenize(text: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for term in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
    {
        if !terms.contains(&term) {
            terms.push(term);
        }
    }
    terms
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("  The   Krebs\tCycle \n"), "the krebs cycle");
        assert_eq!(normalize("   "), "");
    }

    #[test]
    fn test_tokenize() {
        assert_eq!(
            tokenize("What is ATP-synthase? atp!"),
            vec!["what", "is", "atp", "synthase"]
        );
        assert!(tokenize("?!...").is_empty());
    }

    #[test]
    fn test_tokenize_unicode() {
        assert_eq!(tokenize("Größe, café"), vec!["größe", "café"]);
    }
}
