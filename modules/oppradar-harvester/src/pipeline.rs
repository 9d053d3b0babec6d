//! The per-signal processing pipeline: normalize → dedup → quality → persist.
//!
//! Each signal is processed independently; one bad signal never aborts the
//! batch. The recent-fingerprint index is the only cross-signal state and is
//! mutated exclusively here (single-writer).

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::debug;

use oppradar_common::{
    EventSink, MetricsSink, Signal, SystemEvent, TopicFingerprint,
};
use oppradar_sources::Calibrations;

use crate::dedup::{DedupVerdict, RecentIndex};
use crate::normalize;
use crate::quality::QualityPolicy;
use crate::store::PersistingWriter;

/// A signal that made it through the pipeline, with the fingerprint the
/// clusterer needs.
pub struct ProcessedSignal {
    pub signal: Signal,
    pub fingerprint: TopicFingerprint,
}

#[derive(Debug, Default)]
pub struct PipelineStats {
    pub processed: u32,
    pub duplicates_linked: u32,
    pub low_quality: u32,
    pub persisted: u32,
    pub dead_lettered: u32,
}

pub struct Pipeline {
    calibrations: Calibrations,
    index: RecentIndex,
    policy: QualityPolicy,
    trust_weights: HashMap<String, f64>,
    dedup_threshold: f64,
    writer: PersistingWriter,
    events: Arc<dyn EventSink>,
    metrics: Arc<dyn MetricsSink>,
}

impl Pipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        calibrations: Calibrations,
        index: RecentIndex,
        policy: QualityPolicy,
        trust_weights: HashMap<String, f64>,
        dedup_threshold: f64,
        writer: PersistingWriter,
        events: Arc<dyn EventSink>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            calibrations,
            index,
            policy,
            trust_weights,
            dedup_threshold,
            writer,
            events,
            metrics,
        }
    }

    fn trust(&self, source_id: &str) -> f64 {
        self.trust_weights.get(source_id).copied().unwrap_or(0.5)
    }

    /// Run one signal through all stages. Returns the processed signal when
    /// it was durably stored; `None` means it was dead-lettered (and is
    /// recoverable from the dead-letter queue, not lost).
    pub async fn process(
        &mut self,
        mut signal: Signal,
        now: DateTime<Utc>,
        stats: &mut PipelineStats,
    ) -> Option<ProcessedSignal> {
        stats.processed += 1;

        // 1. Normalize
        normalize::normalize(&mut signal, &self.calibrations);
        let fingerprint = TopicFingerprint::from_folded(&signal.content.folded);

        // 2. Duplicate detection. Duplicates link to the canonical signal
        //    and are persisted with full provenance, never dropped.
        match self.index.check(&signal, &fingerprint, self.dedup_threshold) {
            DedupVerdict::Canonical => {}
            DedupVerdict::DuplicateOf {
                canonical_id,
                similarity,
            } => {
                signal.duplicate_of = Some(canonical_id);
                stats.duplicates_linked += 1;
                self.metrics.counter(
                    "signals_duplicate_linked",
                    1,
                    &[("source", &signal.source_id)],
                );
                self.events.emit(SystemEvent::DuplicateDetected {
                    signal_id: signal.id,
                    canonical_id,
                    similarity,
                    source_id: signal.source_id.clone(),
                });
            }
        }

        // 3. Quality scoring. Below-floor signals are flagged, not dropped,
        //    so later corroborating signals can still reference them.
        let quality = self.policy.score(&signal, self.trust(&signal.source_id), now);
        signal.low_quality = self.policy.is_low_quality(&quality);
        if signal.low_quality {
            stats.low_quality += 1;
        }
        self.metrics
            .histogram("signal_quality", quality.score, &[("source", &signal.source_id)]);
        signal.quality = Some(quality);

        // 4. Persist (write-through, retry, dead-letter on exhaustion)
        if !self.writer.save(&signal).await {
            stats.dead_lettered += 1;
            return None;
        }
        stats.persisted += 1;

        if signal.is_canonical() {
            self.index.insert(&signal, fingerprint.clone());
        }

        debug!(
            source_id = signal.source_id.as_str(),
            external_id = signal.external_id.as_str(),
            duplicate = !signal.is_canonical(),
            low_quality = signal.low_quality,
            "signal processed"
        );

        Some(ProcessedSignal {
            signal,
            fingerprint,
        })
    }

    /// Drain a tick's fan-in channel until the senders hang up, processing
    /// signals as they arrive rather than waiting for the whole tick.
    pub async fn drain(
        &mut self,
        mut rx: mpsc::Receiver<Signal>,
        now: DateTime<Utc>,
    ) -> (Vec<ProcessedSignal>, PipelineStats) {
        let mut stats = PipelineStats::default();
        let mut processed = Vec::new();
        while let Some(signal) = rx.recv().await {
            if let Some(output) = self.process(signal, now, &mut stats).await {
                processed.push(output);
            }
        }
        (processed, stats)
    }
}
