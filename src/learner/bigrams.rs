//! Adjacent-word pairs from conversation text. Pairs are staged until they
//! have been seen often enough, then promoted into the persisted state.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

use super::Learner;

/// Staged count at which a pair is promoted.
pub const BIGRAM_THRESHOLD: u32 = 6;

static WORD_RE: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\b[a-z][a-z0-9_]+\b").ok());

/// English function words that carry no domain signal.
const STOP_WORDS: &[&str] = &[
    // auxiliaries
    "are", "was", "were", "been", "being", "have", "has", "had", "does", "did",
    // modals
    "will", "would", "could", "should", "might", "shall", "can",
    // determiners
    "the", "this", "that", "these", "those", "which", "what", "when", "where", "who", "whom",
    "whose", "how",
    // conjunctions and prepositions
    "and", "but", "not", "nor", "for", "with", "from", "into", "about", "than", "onto", "over",
    "is", "it", "in", "on", "to", "as", "at", "by", "or", "if", "so", "no", "do", "up", "an",
    // adverbs
    "also", "just", "only", "very", "more", "most", "then", "here", "there",
    // pronouns
    "you", "your", "they", "them", "their", "our", "its", "she", "her", "his", "him",
    // quantifiers
    "some", "such", "each", "every", "all", "both", "few", "other",
];

fn bigram_words(text: &str) -> Vec<String> {
    let Some(re) = WORD_RE.as_ref() else {
        return Vec::new();
    };
    let lower = text.to_lowercase();
    re.find_iter(&lower)
        .map(|m| m.as_str())
        .filter(|w| !STOP_WORDS.contains(w))
        .map(str::to_string)
        .collect()
}

/// `"w1:w2"` → occurrences within `text`.
pub fn extract_bigrams(text: &str) -> BTreeMap<String, u32> {
    let words = bigram_words(text);
    let mut out = BTreeMap::new();
    for pair in words.windows(2) {
        *out.entry(format!("{}:{}", pair[0], pair[1])).or_insert(0) += 1;
    }
    out
}

impl Learner {
    /// Count the pairs of `text`. Promoted pairs grow directly; the rest
    /// accumulate in staging until they reach [`BIGRAM_THRESHOLD`].
    pub fn process_bigrams(&mut self, text: &str) {
        for (bigram, count) in extract_bigrams(text) {
            if let Some(v) = self.state.bigrams.get_mut(&bigram) {
                *v = v.saturating_add(count);
                continue;
            }
            let staged = self.staging.entry(bigram.clone()).or_insert(0);
            *staged = staged.saturating_add(count);
            if *staged >= BIGRAM_THRESHOLD {
                let promoted = *staged;
                self.staging.remove(&bigram);
                self.state.bigrams.insert(bigram, promoted);
            }
        }
    }

    /// Pairs still below the promotion threshold.
    pub fn staged_bigrams(&self) -> usize {
        self.staging.len()
    }
}
