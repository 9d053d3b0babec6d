//! Duplicate detection against a bounded recent-window index.
//!
//! Two match layers, checked in priority order:
//! 1. Exact `(source_id, external_id)` match: the same item seen again from
//!    its own source.
//! 2. Cross-source fingerprint similarity at or above the configured
//!    threshold: the same underlying content surfacing elsewhere.
//!
//! Near-duplicates from the *same* source with different external ids are NOT
//! duplicates: forums legitimately host many similar threads. Duplicates are
//! linked to the canonical signal, never dropped.

use std::collections::{HashMap, VecDeque};

use uuid::Uuid;

use oppradar_common::{Signal, TopicFingerprint};

/// The dedup outcome for one signal.
#[derive(Debug, Clone, PartialEq)]
pub enum DedupVerdict {
    Canonical,
    DuplicateOf { canonical_id: Uuid, similarity: f64 },
}

/// Pure decision function over the two match layers.
pub(crate) fn dedup_verdict(
    exact_match: Option<Uuid>,
    best_cross_source: Option<(Uuid, f64)>,
    threshold: f64,
) -> DedupVerdict {
    if let Some(canonical_id) = exact_match {
        return DedupVerdict::DuplicateOf {
            canonical_id,
            similarity: 1.0,
        };
    }
    if let Some((canonical_id, similarity)) = best_cross_source {
        if similarity >= threshold {
            return DedupVerdict::DuplicateOf {
                canonical_id,
                similarity,
            };
        }
    }
    DedupVerdict::Canonical
}

struct IndexEntry {
    signal_id: Uuid,
    source_id: String,
    external_id: String,
    fingerprint: TopicFingerprint,
}

/// Bounded recent-window fingerprint index. Single-writer: only the pipeline
/// mutates it; other components see data by value, never this structure.
pub struct RecentIndex {
    capacity: usize,
    entries: VecDeque<IndexEntry>,
    by_key: HashMap<(String, String), Uuid>,
}

impl RecentIndex {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::new(),
            by_key: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Decide whether `signal` duplicates anything in the window.
    pub fn check(
        &self,
        signal: &Signal,
        fingerprint: &TopicFingerprint,
        threshold: f64,
    ) -> DedupVerdict {
        let exact = self
            .by_key
            .get(&(signal.source_id.clone(), signal.external_id.clone()))
            .copied();

        let mut best: Option<(Uuid, f64)> = None;
        for entry in &self.entries {
            if entry.source_id == signal.source_id {
                continue;
            }
            let sim = fingerprint.similarity(&entry.fingerprint);
            if best.as_ref().is_none_or(|(_, b)| sim > *b) {
                best = Some((entry.signal_id, sim));
            }
        }

        dedup_verdict(exact, best, threshold)
    }

    /// Record a canonical signal, evicting the oldest entry past capacity.
    pub fn insert(&mut self, signal: &Signal, fingerprint: TopicFingerprint) {
        if self.entries.len() >= self.capacity {
            if let Some(evicted) = self.entries.pop_front() {
                self.by_key
                    .remove(&(evicted.source_id, evicted.external_id));
            }
        }
        self.by_key.insert(
            (signal.source_id.clone(), signal.external_id.clone()),
            signal.id,
        );
        self.entries.push_back(IndexEntry {
            signal_id: signal.id,
            source_id: signal.source_id.clone(),
            external_id: signal.external_id.clone(),
            fingerprint,
        });
    }
}
