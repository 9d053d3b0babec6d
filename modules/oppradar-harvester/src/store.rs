//! Persistence collaborator interface.
//!
//! Storage engine internals live outside this core; everything here talks to
//! the [`SignalStore`] trait. Writes are at-least-once, so implementations
//! must be idempotent on `(source_id, external_id)`. The in-memory store is
//! the reference implementation used by tests and single-process runs.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use oppradar_common::{
    EventSink, OpportunityCandidate, PersistenceError, Signal, SystemEvent,
};

use crate::backoff::{retry_with_backoff, RetryPolicy};

#[async_trait]
pub trait SignalStore: Send + Sync {
    async fn save_signal(&self, signal: &Signal) -> Result<(), PersistenceError>;

    async fn save_candidate(&self, candidate: &OpportunityCandidate)
        -> Result<(), PersistenceError>;

    /// All signals captured at or after `since`.
    async fn signals_in_window(&self, since: DateTime<Utc>)
        -> Result<Vec<Signal>, PersistenceError>;
}

// ---------------------------------------------------------------------------
// In-memory reference store
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryStore {
    signals: Mutex<HashMap<(String, String), Signal>>,
    candidates: Mutex<Vec<OpportunityCandidate>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signal_count(&self) -> usize {
        self.signals.lock().expect("store lock poisoned").len()
    }

    pub fn candidates(&self) -> Vec<OpportunityCandidate> {
        self.candidates
            .lock()
            .expect("store lock poisoned")
            .clone()
    }

    /// Candidates for one cluster, the key the validation collaborator
    /// correlates on.
    pub fn candidates_for_cluster(&self, cluster_id: Uuid) -> Vec<OpportunityCandidate> {
        self.candidates
            .lock()
            .expect("store lock poisoned")
            .iter()
            .filter(|c| c.source_cluster_id == cluster_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl SignalStore for InMemoryStore {
    async fn save_signal(&self, signal: &Signal) -> Result<(), PersistenceError> {
        let key = (signal.source_id.clone(), signal.external_id.clone());
        let mut signals = self.signals.lock().expect("store lock poisoned");
        // Signals are immutable once persisted: a redelivery of the same key
        // is acknowledged, never overwritten.
        signals.entry(key).or_insert_with(|| signal.clone());
        Ok(())
    }

    async fn save_candidate(
        &self,
        candidate: &OpportunityCandidate,
    ) -> Result<(), PersistenceError> {
        self.candidates
            .lock()
            .expect("store lock poisoned")
            .push(candidate.clone());
        Ok(())
    }

    async fn signals_in_window(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<Signal>, PersistenceError> {
        Ok(self
            .signals
            .lock()
            .expect("store lock poisoned")
            .values()
            .filter(|s| s.captured_at >= since)
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Dead letters
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub signal: Signal,
    pub attempts: u32,
    pub error: String,
    pub at: DateTime<Utc>,
}

/// Holding area for signals that exhausted persistence retries. Nothing is
/// lost: an operator process drains and requeues.
#[derive(Default)]
pub struct DeadLetterQueue {
    entries: Mutex<Vec<DeadLetter>>,
}

impl DeadLetterQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, letter: DeadLetter) {
        self.entries
            .lock()
            .expect("dead letter lock poisoned")
            .push(letter);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("dead letter lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn drain(&self) -> Vec<DeadLetter> {
        std::mem::take(&mut self.entries.lock().expect("dead letter lock poisoned"))
    }
}

// ---------------------------------------------------------------------------
// Write-through with retry
// ---------------------------------------------------------------------------

pub struct PersistingWriter {
    store: Arc<dyn SignalStore>,
    policy: RetryPolicy,
    dead_letters: Arc<DeadLetterQueue>,
    events: Arc<dyn EventSink>,
}

impl PersistingWriter {
    pub fn new(
        store: Arc<dyn SignalStore>,
        policy: RetryPolicy,
        dead_letters: Arc<DeadLetterQueue>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            store,
            policy,
            dead_letters,
            events,
        }
    }

    /// Write-through with backoff. Returns whether the signal was durably
    /// stored; on exhaustion it is dead-lettered, never dropped.
    pub async fn save(&self, signal: &Signal) -> bool {
        let result = retry_with_backoff(self.policy, PersistenceError::is_retriable, || {
            self.store.save_signal(signal)
        })
        .await;

        match result {
            Ok(()) => true,
            Err(err) => {
                let attempts = self.policy.max_retries + 1;
                warn!(
                    source_id = signal.source_id.as_str(),
                    external_id = signal.external_id.as_str(),
                    attempts,
                    error = %err,
                    "persistence exhausted, dead-lettering signal"
                );
                self.events.emit(SystemEvent::SignalDeadLettered {
                    signal_id: signal.id,
                    source_id: signal.source_id.clone(),
                    external_id: signal.external_id.clone(),
                    attempts,
                    error: err.to_string(),
                });
                self.dead_letters.push(DeadLetter {
                    signal: signal.clone(),
                    attempts,
                    error: err.to_string(),
                    at: Utc::now(),
                });
                false
            }
        }
    }
}
