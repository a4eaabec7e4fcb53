// =============================================================================
// matcher.rs - WATCHLIST KEYWORD SCANNING
// =============================================================================
//
// One Aho-Corasick automaton per run, built from the keyword file. A paste is
// scanned once for every keyword simultaneously, ASCII case-insensitive, and
// we report which keywords hit (each at most once, in watchlist order).
// =============================================================================

use aho_corasick::{AhoCorasick, MatchKind};

use crate::error::{ReactorError, Result};

#[derive(Debug, Clone)]
pub struct KeywordMatcher {
    automaton: AhoCorasick,
    keywords: Vec<String>,
}

impl KeywordMatcher {
    pub fn new(keywords: &[String]) -> Result<Self> {
        let automaton = AhoCorasick::builder()
            .ascii_case_insensitive(true)
            .match_kind(MatchKind::Standard)
            .build(keywords)
            .map_err(|e| ReactorError::Config(format!("invalid keyword list: {}", e)))?;
        Ok(Self {
            automaton,
            keywords: keywords.to_vec(),
        })
    }

    /// Keywords that occur in `text`, deduplicated, in watchlist order.
    /// Overlapping occurrences count, so "password" and "pass" both hit on
    /// "password123".
    pub fn matches(&self, text: &str) -> Vec<&str> {
        let mut hit = vec![false; self.keywords.len()];
        for m in self.automaton.find_overlapping_iter(text) {
            hit[m.pattern().as_usize()] = true;
        }
        self.keywords
            .iter()
            .zip(hit)
            .filter_map(|(keyword, hit)| hit.then_some(keyword.as_str()))
            .collect()
    }
}
