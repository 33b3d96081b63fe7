// 🧹 Name Normalizer - raw payer string → key tokens + simplified form
//
// "Delta Dental of California, Inc." → ["delta", "california"], "delta california"

use crate::config::MatchConfig;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::OnceLock;

/// Legal-entity suffixes as whole words, plus the punctuation we drop
fn suffix_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\b(inc|llc|corp)\b|[.,()]").expect("suffix pattern is a valid regex")
    })
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedName {
    /// Key terms in original order
    pub tokens: Vec<String>,

    /// Tokens joined with single spaces
    pub simplified: String,
}

impl NormalizedName {
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

pub struct Normalizer {
    ignored_words: HashSet<String>,
}

impl Normalizer {
    pub fn new(config: &MatchConfig) -> Self {
        Normalizer {
            ignored_words: config
                .ignored_words
                .iter()
                .map(|w| w.to_lowercase())
                .collect(),
        }
    }

    /// Lower-case, strip suffixes and punctuation, drop stop-words and
    /// tokens of two characters or fewer.
    pub fn normalize(&self, raw: &str) -> NormalizedName {
        let lowered = raw.trim().to_lowercase();
        if lowered.is_empty() {
            return NormalizedName::default();
        }

        let stripped = suffix_pattern().replace_all(&lowered, "");

        let tokens: Vec<String> = stripped
            .split_whitespace()
            .filter(|word| word.chars().count() > 2)
            .filter(|word| !self.ignored_words.contains(*word))
            .map(str::to_string)
            .collect();

        let simplified = tokens.join(" ");
        NormalizedName { tokens, simplified }
    }

    /// Absent names normalize to the empty form
    pub fn normalize_field(&self, raw: Option<&str>) -> NormalizedName {
        match raw {
            Some(value) => self.normalize(value),
            None => NormalizedName::default(),
        }
    }
}

/// Capitalize the first letter of every word, lower-case the rest
///
/// Example: "zephyr regional trust" → "Zephyr Regional Trust", "3m care" → "3M Care"
pub fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_cased = false;

    for c in s.chars() {
        if prev_cased {
            out.extend(c.to_lowercase());
        } else {
            out.extend(c.to_uppercase());
        }
        prev_cased = c.is_alphabetic();
    }

    out
}

// ============================================================================
// TESTS
// ============================================================================
