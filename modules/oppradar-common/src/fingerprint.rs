//! Shingled content fingerprints for duplicate detection and topic matching.
//!
//! A fingerprint is the set of hashed word k-shingles of the folded text.
//! Similarity is Jaccard overlap on the shingle sets. Hashing uses FNV-1a
//! with a fixed seed so fingerprints are stable across process restarts.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Shingle width in words. Three-word shingles tolerate small edits while
/// still separating genuinely different texts.
pub const SHINGLE_WIDTH: usize = 3;

const FNV_OFFSET: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// A normalized topic descriptor: the hashed shingle set, the content word
/// set, and the most frequent terms.
///
/// The two similarity notions are deliberately different. Shingle overlap
/// ([`similarity`](Self::similarity)) is order-sensitive and strict, which
/// suits duplicate detection. Word overlap
/// ([`topic_similarity`](Self::topic_similarity)) is loose, which suits
/// grouping distinct signals about the same underlying topic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicFingerprint {
    shingles: BTreeSet<u64>,
    #[serde(default)]
    words: BTreeSet<u64>,
    terms: Vec<String>,
}

impl TopicFingerprint {
    /// Fingerprint folded (already lowercased/trimmed) text.
    pub fn from_folded(folded: &str) -> Self {
        let words: Vec<&str> = folded.split_whitespace().collect();
        let mut shingles = BTreeSet::new();
        if words.len() < SHINGLE_WIDTH {
            // Short text: hash whole words so tiny signals still compare.
            for w in &words {
                shingles.insert(fnv1a(w.as_bytes()));
            }
        } else {
            for window in words.windows(SHINGLE_WIDTH) {
                shingles.insert(fnv1a(window.join(" ").as_bytes()));
            }
        }

        let mut word_set: BTreeSet<u64> = words
            .iter()
            .filter(|w| w.len() >= 3 && !STOPWORDS.contains(w))
            .map(|w| fnv1a(w.as_bytes()))
            .collect();
        if word_set.is_empty() {
            // All-stopword or very short text: fall back to every word.
            word_set = words.iter().map(|w| fnv1a(w.as_bytes())).collect();
        }

        let terms = top_terms(&words, 8);
        Self {
            shingles,
            words: word_set,
            terms,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.shingles.is_empty()
    }

    pub fn shingle_count(&self) -> usize {
        self.shingles.len()
    }

    pub fn terms(&self) -> &[String] {
        &self.terms
    }

    /// Shingle Jaccard similarity in [0, 1]. Order-sensitive and strict;
    /// this is the duplicate-detection metric. Empty fingerprints never match.
    pub fn similarity(&self, other: &Self) -> f64 {
        jaccard(&self.shingles, &other.shingles)
    }

    /// Word-set Jaccard similarity in [0, 1]. Looser than shingle overlap;
    /// this is the clustering/topic metric.
    pub fn topic_similarity(&self, other: &Self) -> f64 {
        jaccard(&self.words, &other.words)
    }

    /// Merge another fingerprint into this one, capping the hashed sets so a
    /// growing cluster's fingerprint stays bounded.
    pub fn absorb(&mut self, other: &Self, cap: usize) {
        for h in &other.shingles {
            if self.shingles.len() >= cap {
                break;
            }
            self.shingles.insert(*h);
        }
        for h in &other.words {
            if self.words.len() >= cap {
                break;
            }
            self.words.insert(*h);
        }
        for term in &other.terms {
            if self.terms.len() >= 16 {
                break;
            }
            if !self.terms.contains(term) {
                self.terms.push(term.clone());
            }
        }
    }
}

fn jaccard(a: &BTreeSet<u64>, b: &BTreeSet<u64>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    intersection as f64 / union as f64
}

const STOPWORDS: [&str; 24] = [
    "the", "a", "an", "and", "or", "but", "is", "are", "was", "were", "to", "of", "in", "on",
    "for", "with", "it", "this", "that", "i", "we", "you", "they", "be",
];

/// Most frequent non-stopword terms, ties broken by first occurrence.
fn top_terms(words: &[&str], limit: usize) -> Vec<String> {
    let mut counts: Vec<(&str, u32)> = Vec::new();
    for w in words {
        if w.len() < 3 || STOPWORDS.contains(w) {
            continue;
        }
        match counts.iter_mut().find(|(term, _)| term == w) {
            Some((_, c)) => *c += 1,
            None => counts.push((w, 1)),
        }
    }
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    counts
        .into_iter()
        .take(limit)
        .map(|(term, _)| term.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_text_similarity_is_one() {
        let a = TopicFingerprint::from_folded("csv export times out on large datasets");
        let b = TopicFingerprint::from_folded("csv export times out on large datasets");
        assert!((a.similarity(&b) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn unrelated_text_similarity_is_low() {
        let a = TopicFingerprint::from_folded("csv export times out on large datasets");
        let b = TopicFingerprint::from_folded("dark mode toggle missing from settings page");
        assert!(a.similarity(&b) < 0.1);
    }

    #[test]
    fn near_duplicate_scores_high() {
        let a = TopicFingerprint::from_folded(
            "csv export times out on large datasets over ten thousand rows every single time",
        );
        let b = TopicFingerprint::from_folded(
            "csv export times out on large datasets over ten thousand rows every time",
        );
        assert!(a.similarity(&b) > 0.6, "near-duplicates should score high");
    }

    #[test]
    fn empty_text_never_matches() {
        let a = TopicFingerprint::from_folded("");
        let b = TopicFingerprint::from_folded("anything at all here");
        assert_eq!(a.similarity(&b), 0.0);
        assert_eq!(a.similarity(&a), 0.0);
    }

    #[test]
    fn short_text_still_fingerprints() {
        let a = TopicFingerprint::from_folded("slow exports");
        let b = TopicFingerprint::from_folded("slow exports");
        assert!(!a.is_empty());
        assert!((a.similarity(&b) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn topic_similarity_is_looser_than_shingle_similarity() {
        // Same words, different order: same topic, not a duplicate.
        let a = TopicFingerprint::from_folded("csv export times out on large datasets");
        let b = TopicFingerprint::from_folded("large csv datasets export times out often");
        assert!(a.topic_similarity(&b) >= 0.7, "shared vocabulary should cluster");
        assert!(a.similarity(&b) < 0.5, "reordered text is not a near-duplicate");
    }

    #[test]
    fn topic_similarity_ignores_stopwords() {
        let a = TopicFingerprint::from_folded("the export is slow for the team");
        let b = TopicFingerprint::from_folded("export slow team");
        assert!((a.topic_similarity(&b) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn fingerprints_are_stable_across_instances() {
        let a = TopicFingerprint::from_folded("billing page shows stale invoices");
        let b = TopicFingerprint::from_folded("billing page shows stale invoices");
        assert_eq!(a, b);
    }

    #[test]
    fn absorb_respects_cap() {
        let mut a = TopicFingerprint::from_folded("alpha beta gamma delta epsilon zeta");
        let before = a.shingle_count();
        let b = TopicFingerprint::from_folded("one two three four five six seven eight nine ten");
        a.absorb(&b, before + 2);
        assert!(a.shingle_count() <= before + 2);
    }

    #[test]
    fn top_terms_skip_stopwords() {
        let fp = TopicFingerprint::from_folded("the export export export is slow and the queue");
        assert_eq!(fp.terms().first().map(String::as_str), Some("export"));
        assert!(!fp.terms().iter().any(|t| t == "the"));
    }
}
