//! Structured observability events.
//!
//! Every variant describes a decision this core made that an operator needs
//! to see: adapter health transitions, dead-lettered signals, duplicate
//! links, cluster publishes, synthesis mode switches. Events flow through an
//! injected [`EventSink`] so they survive the process via the external
//! observability collaborator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{AdapterHealth, GenerationMode};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SystemEvent {
    // -----------------------------------------------------------------------
    // Adapter health
    // -----------------------------------------------------------------------
    AdapterHealthChanged {
        source_id: String,
        from: AdapterHealth,
        to: AdapterHealth,
        reason: String,
    },

    AdapterExcluded {
        source_id: String,
        until_tick: u64,
    },

    // -----------------------------------------------------------------------
    // Pipeline decisions
    // -----------------------------------------------------------------------
    DuplicateDetected {
        signal_id: Uuid,
        canonical_id: Uuid,
        similarity: f64,
        source_id: String,
    },

    SignalDeadLettered {
        signal_id: Uuid,
        source_id: String,
        external_id: String,
        attempts: u32,
        error: String,
    },

    // -----------------------------------------------------------------------
    // Clustering / synthesis
    // -----------------------------------------------------------------------
    ClusterPublished {
        cluster_id: Uuid,
        density_score: f64,
        member_count: usize,
    },

    SynthesisModeSwitched {
        cluster_id: Uuid,
        from: GenerationMode,
        to: GenerationMode,
        reason: String,
    },

    SynthesisCompleted {
        cluster_id: Uuid,
        candidate_id: Uuid,
        mode: GenerationMode,
        overall_confidence: f64,
    },

    SynthesisFailed {
        cluster_id: Uuid,
        reason: String,
    },

    // -----------------------------------------------------------------------
    // Scheduler
    // -----------------------------------------------------------------------
    SchedulerBackpressure {
        in_flight: usize,
        capacity: usize,
    },
}

impl SystemEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            SystemEvent::AdapterHealthChanged { .. } => "adapter_health_changed",
            SystemEvent::AdapterExcluded { .. } => "adapter_excluded",
            SystemEvent::DuplicateDetected { .. } => "duplicate_detected",
            SystemEvent::SignalDeadLettered { .. } => "signal_dead_lettered",
            SystemEvent::ClusterPublished { .. } => "cluster_published",
            SystemEvent::SynthesisModeSwitched { .. } => "synthesis_mode_switched",
            SystemEvent::SynthesisCompleted { .. } => "synthesis_completed",
            SystemEvent::SynthesisFailed { .. } => "synthesis_failed",
            SystemEvent::SchedulerBackpressure { .. } => "scheduler_backpressure",
        }
    }

    pub fn to_payload(&self) -> serde_json::Value {
        serde_json::to_value(self).expect("SystemEvent serialization should never fail")
    }

    /// Wrap into the generic envelope the observability collaborator consumes.
    pub fn envelope(&self) -> EventEnvelope {
        EventEnvelope {
            kind: self.event_type().to_string(),
            timestamp: Utc::now(),
            payload: self.to_payload(),
        }
    }
}

/// The generic event shape: `kind`, `timestamp`, `payload`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub kind: String,
    pub timestamp: DateTime<Utc>,
    pub payload: serde_json::Value,
}

/// Destination for system events. Implementations must be cheap to call from
/// hot paths; anything slow should queue internally.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: SystemEvent);
}

/// Default sink: structured tracing output.
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: SystemEvent) {
        tracing::info!(
            kind = event.event_type(),
            payload = %event.to_payload(),
            "system event"
        );
    }
}

/// Discards everything. For wiring where events are irrelevant.
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn emit(&self, _event: SystemEvent) {}
}

/// Collects envelopes in memory so tests can assert on emissions.
#[derive(Default)]
pub struct MemoryEventSink {
    events: std::sync::Mutex<Vec<EventEnvelope>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain(&self) -> Vec<EventEnvelope> {
        std::mem::take(&mut self.events.lock().expect("event sink lock poisoned"))
    }

    pub fn count_of(&self, kind: &str) -> usize {
        self.events
            .lock()
            .expect("event sink lock poisoned")
            .iter()
            .filter(|e| e.kind == kind)
            .count()
    }
}

impl EventSink for MemoryEventSink {
    fn emit(&self, event: SystemEvent) {
        self.events
            .lock()
            .expect("event sink lock poisoned")
            .push(event.envelope());
    }
}
