//! Top-level wiring: one harvester owns the scheduler, pipeline, clusterer,
//! and synthesis orchestrator, and drives them tick by tick.
//!
//! Data flows one direction: adapters, scheduler, pipeline, clusterer,
//! orchestrator, persistence. Components exchange values, never shared
//! mutable state.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use oppradar_common::{EventSink, Signal, SystemEvent};
use oppradar_synthesis::{Orchestrator, SynthesisError};

use crate::cluster::Clusterer;
use crate::pipeline::Pipeline;
use crate::scheduler::Scheduler;
use crate::stats::HarvestStats;
use crate::store::SignalStore;

pub struct Harvester {
    scheduler: Scheduler,
    pipeline: Pipeline,
    clusterer: Clusterer,
    orchestrator: Arc<Orchestrator>,
    store: Arc<dyn SignalStore>,
    events: Arc<dyn EventSink>,
    stats: HarvestStats,
    channel_capacity: usize,
    max_concurrent_synthesis: usize,
    tick: u64,
}

impl Harvester {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        scheduler: Scheduler,
        pipeline: Pipeline,
        clusterer: Clusterer,
        orchestrator: Arc<Orchestrator>,
        store: Arc<dyn SignalStore>,
        events: Arc<dyn EventSink>,
        channel_capacity: usize,
        max_concurrent_synthesis: usize,
    ) -> Self {
        Self {
            scheduler,
            pipeline,
            clusterer,
            orchestrator,
            store,
            events,
            stats: HarvestStats::default(),
            channel_capacity,
            max_concurrent_synthesis,
            tick: 0,
        }
    }

    pub fn stats(&self) -> &HarvestStats {
        &self.stats
    }

    /// One full tick: fetch → process → cluster → synthesize. Returns whether
    /// the tick saw backpressure, so the caller can stretch its cadence.
    pub async fn run_tick(&mut self, now: DateTime<Utc>, shutdown: watch::Receiver<bool>) -> bool {
        self.tick += 1;
        self.stats.ticks = self.tick;

        // Fetch and process concurrently: the pipeline consumes signals as
        // adapters produce them, not after all fetches complete.
        let (tx, rx) = mpsc::channel::<Signal>(self.channel_capacity);
        let (tick_report, (processed, pipeline_stats)) = tokio::join!(
            self.scheduler.run_tick(self.tick, now, tx, shutdown.clone()),
            self.pipeline.drain(rx, now),
        );

        self.stats.signals_fetched += tick_report.signals_fetched;
        self.stats.fetch_failures += tick_report.fetch_failures;
        self.stats.signals_persisted += pipeline_stats.persisted;
        self.stats.duplicates_linked += pipeline_stats.duplicates_linked;
        self.stats.low_quality += pipeline_stats.low_quality;
        self.stats.dead_lettered += pipeline_stats.dead_lettered;

        // Canonical signals feed the clusterer; duplicates already corroborate
        // their canonical signal through the link.
        for item in &processed {
            self.stats.record_kind(item.signal.kind);
            if item.signal.is_canonical() {
                self.clusterer.add(&item.signal, &item.fingerprint, now);
            }
        }
        self.stats.clusters_open = self.clusterer.open_cluster_count();

        // Once per tick: re-evaluate clusters and synthesize the dense ones.
        let digests = self.clusterer.re_evaluate(now);
        for digest in &digests {
            self.events.emit(SystemEvent::ClusterPublished {
                cluster_id: digest.cluster_id,
                density_score: digest.density_score,
                member_count: digest.member_count,
            });
        }
        self.stats.clusters_published += digests.len() as u32;

        let orchestrator = Arc::clone(&self.orchestrator);
        let attempts: Vec<_> = stream::iter(digests.into_iter().map(|digest| {
            let orchestrator = Arc::clone(&orchestrator);
            async move { orchestrator.synthesize(digest).await }
        }))
        .buffer_unordered(self.max_concurrent_synthesis.max(1))
        .collect()
        .await;

        for attempt in attempts {
            match attempt {
                Ok(candidate) => {
                    // The cool-down starts only when a candidate actually
                    // exists; a failed attempt retries next tick.
                    self.clusterer.record_candidate(candidate.source_cluster_id, now);
                    self.stats.record_candidate(candidate.generation_mode);
                    if let Err(e) = self.store.save_candidate(&candidate).await {
                        warn!(
                            candidate_id = %candidate.id,
                            error = %e,
                            "candidate persist failed; next publish window retries the cluster"
                        );
                    }
                }
                Err(SynthesisError::LockHeld) => {
                    // Another attempt is mid-flight; this tick simply skips.
                }
                Err(e @ SynthesisError::LockTimeout) => {
                    warn!(error = %e, "synthesis attempt failed");
                }
            }
        }

        info!(
            tick = self.tick,
            fetched = tick_report.signals_fetched,
            persisted = pipeline_stats.persisted,
            duplicates = pipeline_stats.duplicates_linked,
            open_clusters = self.stats.clusters_open,
            backpressure = tick_report.backpressure,
            "tick complete"
        );

        tick_report.backpressure
    }

    /// Continuous loop with graceful shutdown. Backpressure stretches the
    /// cadence by half an interval rather than crashing or shedding signals.
    pub async fn run(
        &mut self,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
        max_ticks: Option<u64>,
    ) {
        loop {
            if *shutdown.borrow() {
                info!("shutdown observed, stopping harvest loop");
                break;
            }

            let backpressure = self.run_tick(Utc::now(), shutdown.clone()).await;

            if max_ticks.is_some_and(|limit| self.tick >= limit) {
                break;
            }

            let sleep = if backpressure {
                interval + interval / 2
            } else {
                interval
            };
            tokio::select! {
                _ = tokio::time::sleep(sleep) => {}
                changed = shutdown.changed() => {
                    // A dropped sender can never signal shutdown; fall back
                    // to plain pacing instead of spinning.
                    if changed.is_err() {
                        tokio::time::sleep(sleep).await;
                    }
                }
            }
        }
    }
}
