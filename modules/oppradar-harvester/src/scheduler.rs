//! Tick scheduler: runs every enabled adapter on a bounded worker pool and
//! fans fetched signals into the pipeline channel as pages complete.
//!
//! Concurrency bounds: total in-flight fetches are capped by the pool size,
//! and each adapter gets exactly one task per tick which walks its pages
//! sequentially. Per-adapter concurrency is one, which also preserves
//! source-reported signal order and respects non-stateless adapters.
//!
//! Failure isolation is the point. Each adapter's outcome is handled on its
//! own: transient errors retry with backoff inside the tick, rate limits
//! push the adapter's next eligibility out, and auth/permanent failures
//! degrade the adapter for a configurable number of ticks with a single
//! health-transition event. One broken source never blocks the rest.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use oppradar_common::{AdapterHealth, EventSink, MetricsSink, Signal, SourceError, SystemEvent};
use oppradar_sources::SourceAdapter;

use crate::backoff::{retry_with_backoff, RetryPolicy};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub max_concurrent_fetches: usize,
    pub max_pages_per_tick: u32,
    pub retry: RetryPolicy,
    /// Ticks an adapter sits out after degradation.
    pub degraded_exclusion_ticks: u64,
    /// Consecutive auth failures before the adapter is degraded.
    pub auth_failure_threshold: u32,
    /// Rate-limit reschedule delay when the source gave no Retry-After.
    pub default_rate_limit_backoff: Duration,
}

struct AdapterState {
    health: AdapterHealth,
    /// Continuation token carried across ticks until the source drains.
    cursor: Option<String>,
    /// Lower bound for the next fetch window.
    watermark: DateTime<Utc>,
    consecutive_auth_failures: u32,
    excluded_until_tick: Option<u64>,
    not_before: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
pub struct TickReport {
    pub adapters_run: usize,
    pub adapters_excluded: usize,
    pub adapters_deferred: usize,
    pub signals_fetched: u32,
    pub fetch_failures: u32,
    /// The pipeline channel filled up during the tick; the caller should
    /// stretch its cadence instead of piling on.
    pub backpressure: bool,
}

struct FetchOutcome {
    pages: u32,
    sent: u32,
    cursor: Option<String>,
    error: Option<SourceError>,
    rate_limit_hint: Option<Duration>,
    saw_full_channel: bool,
}

pub struct Scheduler {
    adapters: Vec<Arc<dyn SourceAdapter>>,
    states: HashMap<&'static str, AdapterState>,
    config: SchedulerConfig,
    events: Arc<dyn EventSink>,
    metrics: Arc<dyn MetricsSink>,
}

impl Scheduler {
    pub fn new(
        adapters: Vec<Arc<dyn SourceAdapter>>,
        config: SchedulerConfig,
        initial_since: DateTime<Utc>,
        events: Arc<dyn EventSink>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        let states = adapters
            .iter()
            .map(|a| {
                (
                    a.descriptor().source_id,
                    AdapterState {
                        health: AdapterHealth::Healthy,
                        cursor: None,
                        watermark: initial_since,
                        consecutive_auth_failures: 0,
                        excluded_until_tick: None,
                        not_before: None,
                    },
                )
            })
            .collect();
        Self {
            adapters,
            states,
            config,
            events,
            metrics,
        }
    }

    pub fn adapter_health(&self, source_id: &str) -> Option<&AdapterHealth> {
        self.states.get(source_id).map(|s| &s.health)
    }

    /// Run one scheduling tick. Signals stream into `tx` as each adapter's
    /// pages arrive; fast sources reach the pipeline while slow ones are
    /// still fetching. The sender is consumed so the pipeline's drain ends
    /// when the last fetch task finishes.
    pub async fn run_tick(
        &mut self,
        tick: u64,
        now: DateTime<Utc>,
        tx: mpsc::Sender<Signal>,
        shutdown: watch::Receiver<bool>,
    ) -> TickReport {
        let mut report = TickReport::default();

        let mut eligible: Vec<usize> = Vec::new();
        for (idx, adapter) in self.adapters.iter().enumerate() {
            let source_id = adapter.descriptor().source_id;
            let state = &self.states[source_id];
            if state.excluded_until_tick.is_some_and(|until| tick <= until) {
                report.adapters_excluded += 1;
                continue;
            }
            if state.not_before.is_some_and(|t| now < t) {
                report.adapters_deferred += 1;
                continue;
            }
            eligible.push(idx);
        }
        report.adapters_run = eligible.len();

        let mut fetches = Vec::with_capacity(eligible.len());
        for idx in eligible {
            let adapter = Arc::clone(&self.adapters[idx]);
            let source_id = adapter.descriptor().source_id;
            let state = &self.states[source_id];
            let since = state.watermark;
            let cursor = state.cursor.clone();
            let tx = tx.clone();
            let shutdown = shutdown.clone();
            let retry = self.config.retry;
            let max_pages = self.config.max_pages_per_tick;
            fetches.push(async move {
                let outcome =
                    fetch_into_channel(adapter, since, cursor, max_pages, retry, tx, shutdown)
                        .await;
                (source_id, outcome)
            });
        }

        // Drop our own sender so the pipeline sees EOF once tasks finish.
        drop(tx);

        let outcomes: Vec<(&'static str, FetchOutcome)> = stream::iter(fetches)
            .buffer_unordered(self.config.max_concurrent_fetches.max(1))
            .collect()
            .await;

        for (source_id, outcome) in outcomes {
            self.apply_outcome(source_id, outcome, tick, now, &mut report);
        }

        if report.backpressure {
            self.events.emit(SystemEvent::SchedulerBackpressure {
                in_flight: report.adapters_run,
                capacity: self.config.max_concurrent_fetches,
            });
        }
        self.metrics
            .counter("signals_fetched", u64::from(report.signals_fetched), &[]);

        report
    }

    fn apply_outcome(
        &mut self,
        source_id: &'static str,
        outcome: FetchOutcome,
        tick: u64,
        now: DateTime<Utc>,
        report: &mut TickReport,
    ) {
        report.signals_fetched += outcome.sent;
        report.backpressure |= outcome.saw_full_channel;

        let state = self
            .states
            .get_mut(source_id)
            .expect("state exists for every registered adapter");

        match outcome.error {
            None => {
                // Zero items with a valid cursor is a success like any other.
                state.consecutive_auth_failures = 0;
                state.cursor = outcome.cursor;
                if state.cursor.is_none() {
                    // Source fully drained: advance the window.
                    state.watermark = now;
                }
                if let Some(hint) = outcome.rate_limit_hint {
                    state.not_before = Some(
                        now + chrono::Duration::from_std(hint)
                            .unwrap_or_else(|_| chrono::Duration::zero()),
                    );
                } else {
                    state.not_before = None;
                }
                if state.health != AdapterHealth::Healthy {
                    let from = state.health.clone();
                    state.health = AdapterHealth::Healthy;
                    state.excluded_until_tick = None;
                    info!(source_id, "adapter recovered");
                    self.events.emit(SystemEvent::AdapterHealthChanged {
                        source_id: source_id.to_string(),
                        from,
                        to: AdapterHealth::Healthy,
                        reason: "fetch succeeded".to_string(),
                    });
                }
            }
            Some(SourceError::RateLimited { retry_after }) => {
                let delay = retry_after.unwrap_or(self.config.default_rate_limit_backoff);
                state.not_before = Some(
                    now + chrono::Duration::from_std(delay)
                        .unwrap_or_else(|_| chrono::Duration::zero()),
                );
                info!(source_id, delay_secs = delay.as_secs(), "adapter rate limited, rescheduled");
                self.metrics.counter("adapter_rate_limited", 1, &[("source", source_id)]);
            }
            Some(SourceError::Auth) => {
                report.fetch_failures += 1;
                state.consecutive_auth_failures += 1;
                if state.consecutive_auth_failures >= self.config.auth_failure_threshold {
                    self.degrade(source_id, AdapterHealth::Unauthenticated, tick);
                }
            }
            Some(SourceError::Permanent(cause)) => {
                report.fetch_failures += 1;
                self.degrade(
                    source_id,
                    AdapterHealth::Degraded {
                        reason: cause.clone(),
                    },
                    tick,
                );
            }
            Some(err @ SourceError::Transient(_)) => {
                // Already retried with backoff inside the tick; counted and
                // left healthy so the next tick tries again.
                report.fetch_failures += 1;
                warn!(source_id, error = %err, "adapter fetch failed after retries");
                self.metrics.counter("adapter_fetch_failed", 1, &[("source", source_id)]);
            }
        }
    }

    fn degrade(&mut self, source_id: &'static str, to: AdapterHealth, tick: u64) {
        let until_tick = tick + self.config.degraded_exclusion_ticks;
        let state = self
            .states
            .get_mut(source_id)
            .expect("state exists for every registered adapter");
        state.excluded_until_tick = Some(until_tick);

        // The health-transition event fires exactly once at degradation; an
        // adapter that keeps failing stays degraded without re-emitting.
        if state.health != to {
            let from = std::mem::replace(&mut state.health, to.clone());
            warn!(source_id, from = %from, to = %to, until_tick, "adapter degraded");
            self.events.emit(SystemEvent::AdapterHealthChanged {
                source_id: source_id.to_string(),
                from,
                to,
                reason: "fetch failures crossed the degradation threshold".to_string(),
            });
            self.events.emit(SystemEvent::AdapterExcluded {
                source_id: source_id.to_string(),
                until_tick,
            });
        }
    }
}

/// Fetch up to `max_pages` pages and forward signals in source order. The
/// channel send suspends when the pipeline is behind, which is exactly the
/// backpressure we want; a closed channel (shutdown) ends the task quietly.
async fn fetch_into_channel(
    adapter: Arc<dyn SourceAdapter>,
    since: DateTime<Utc>,
    mut cursor: Option<String>,
    max_pages: u32,
    retry: RetryPolicy,
    tx: mpsc::Sender<Signal>,
    shutdown: watch::Receiver<bool>,
) -> FetchOutcome {
    let mut outcome = FetchOutcome {
        pages: 0,
        sent: 0,
        cursor: None,
        error: None,
        rate_limit_hint: None,
        saw_full_channel: false,
    };

    loop {
        if *shutdown.borrow() {
            outcome.cursor = cursor;
            return outcome;
        }

        let page = retry_with_backoff(retry, SourceError::is_retriable, || {
            adapter.fetch(since, cursor.as_deref())
        })
        .await;

        match page {
            Ok(page) => {
                outcome.pages += 1;
                if page.rate_limit_hint.is_some() {
                    outcome.rate_limit_hint = page.rate_limit_hint;
                }
                for signal in page.signals {
                    if tx.capacity() == 0 {
                        outcome.saw_full_channel = true;
                    }
                    if tx.send(signal).await.is_err() {
                        outcome.cursor = cursor;
                        return outcome;
                    }
                    outcome.sent += 1;
                }
                cursor = page.next_cursor;
                if cursor.is_none() || outcome.pages >= max_pages {
                    outcome.cursor = cursor;
                    return outcome;
                }
            }
            Err(err) => {
                outcome.cursor = cursor;
                outcome.error = Some(err);
                return outcome;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use oppradar_common::{Engagement, MemoryEventSink, NullMetricsSink, SignalContent, SignalKind};
    use oppradar_sources::{AdapterDescriptor, FetchPage};

    fn test_signal(source_id: &'static str, external_id: &str) -> Signal {
        Signal::new(
            source_id,
            external_id,
            Utc::now(),
            SignalContent::new(format!("item {external_id}"), "body"),
            Engagement::new(1, 0, 10),
            SignalKind::Discussion,
        )
    }

    /// Pops one scripted result per fetch call; empty script means success
    /// with no items.
    struct ScriptedAdapter {
        source_id: &'static str,
        script: Mutex<VecDeque<Result<FetchPage, SourceError>>>,
        calls: std::sync::atomic::AtomicU32,
    }

    impl ScriptedAdapter {
        fn new(source_id: &'static str) -> Self {
            Self {
                source_id,
                script: Mutex::new(VecDeque::new()),
                calls: std::sync::atomic::AtomicU32::new(0),
            }
        }

        fn push(&self, result: Result<FetchPage, SourceError>) {
            self.script.lock().unwrap().push_back(result);
        }

        fn call_count(&self) -> u32 {
            self.calls.load(std::sync::atomic::Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SourceAdapter for ScriptedAdapter {
        fn descriptor(&self) -> AdapterDescriptor {
            AdapterDescriptor {
                source_id: self.source_id,
                display_name: "scripted",
                stateless: true,
            }
        }

        async fn fetch(
            &self,
            _since: DateTime<Utc>,
            _cursor: Option<&str>,
        ) -> Result<FetchPage, SourceError> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(FetchPage::default()))
        }

        async fn health_check(&self) -> AdapterHealth {
            AdapterHealth::Healthy
        }
    }

    fn config() -> SchedulerConfig {
        SchedulerConfig {
            max_concurrent_fetches: 4,
            max_pages_per_tick: 5,
            retry: RetryPolicy::new(0, Duration::from_millis(0)),
            degraded_exclusion_ticks: 3,
            auth_failure_threshold: 3,
            default_rate_limit_backoff: Duration::from_secs(60),
        }
    }

    fn scheduler_with(
        adapters: Vec<Arc<ScriptedAdapter>>,
        events: Arc<MemoryEventSink>,
    ) -> Scheduler {
        let adapters = adapters
            .into_iter()
            .map(|a| a as Arc<dyn SourceAdapter>)
            .collect();
        Scheduler::new(
            adapters,
            config(),
            Utc::now() - chrono::Duration::hours(72),
            events,
            Arc::new(NullMetricsSink),
        )
    }

    fn channel() -> (mpsc::Sender<Signal>, mpsc::Receiver<Signal>) {
        mpsc::channel(64)
    }

    fn shutdown_rx() -> watch::Receiver<bool> {
        // The sender drops immediately; the receiver keeps yielding `false`.
        let (_tx, rx) = watch::channel(false);
        rx
    }

    #[tokio::test]
    async fn signals_preserve_source_order_per_adapter() {
        let adapter = Arc::new(ScriptedAdapter::new("forum"));
        adapter.push(Ok(FetchPage {
            signals: vec![test_signal("forum", "a"), test_signal("forum", "b")],
            next_cursor: Some("1".to_string()),
            rate_limit_hint: None,
        }));
        adapter.push(Ok(FetchPage {
            signals: vec![test_signal("forum", "c")],
            next_cursor: None,
            rate_limit_hint: None,
        }));

        let events = Arc::new(MemoryEventSink::new());
        let mut scheduler = scheduler_with(vec![adapter.clone()], events);
        let (tx, mut rx) = channel();
        let report = scheduler.run_tick(1, Utc::now(), tx, shutdown_rx()).await;

        assert_eq!(report.signals_fetched, 3);
        let mut ids = Vec::new();
        while let Some(s) = rx.recv().await {
            ids.push(s.external_id);
        }
        assert_eq!(ids, vec!["a", "b", "c"], "source order preserved");
        assert_eq!(adapter.call_count(), 2, "cursor page fetched in same tick");
    }

    #[tokio::test]
    async fn zero_items_with_cursor_is_success() {
        let adapter = Arc::new(ScriptedAdapter::new("forum"));
        adapter.push(Ok(FetchPage {
            signals: vec![],
            next_cursor: Some("7".to_string()),
            rate_limit_hint: None,
        }));
        adapter.push(Ok(FetchPage::default()));

        let events = Arc::new(MemoryEventSink::new());
        let mut scheduler = scheduler_with(vec![adapter], events.clone());
        let (tx, _rx) = channel();
        let report = scheduler.run_tick(1, Utc::now(), tx, shutdown_rx()).await;

        assert_eq!(report.fetch_failures, 0);
        assert_eq!(report.signals_fetched, 0);
        assert_eq!(events.count_of("adapter_health_changed"), 0);
    }

    #[tokio::test]
    async fn auth_failures_degrade_after_threshold_with_one_event() {
        let adapter = Arc::new(ScriptedAdapter::new("forum"));
        for _ in 0..5 {
            adapter.push(Err(SourceError::Auth));
        }

        let events = Arc::new(MemoryEventSink::new());
        let mut scheduler = scheduler_with(vec![adapter.clone()], events.clone());

        let now = Utc::now();
        for tick in 1..=3 {
            let (tx, _rx) = channel();
            scheduler.run_tick(tick, now, tx, shutdown_rx()).await;
        }
        assert_eq!(adapter.call_count(), 3);
        assert_eq!(
            events.count_of("adapter_health_changed"),
            1,
            "exactly one transition event at degradation"
        );
        assert_eq!(events.count_of("adapter_excluded"), 1);
        assert_eq!(
            scheduler.adapter_health("forum"),
            Some(&AdapterHealth::Unauthenticated)
        );

        // Ticks 4-6: excluded, adapter not called.
        for tick in 4..=6 {
            let (tx, _rx) = channel();
            let report = scheduler.run_tick(tick, now, tx, shutdown_rx()).await;
            assert_eq!(report.adapters_excluded, 1);
        }
        assert_eq!(adapter.call_count(), 3, "excluded adapter is not fetched");

        // Tick 7: eligible again.
        let (tx, _rx) = channel();
        let report = scheduler.run_tick(7, now, tx, shutdown_rx()).await;
        assert_eq!(report.adapters_run, 1);
        assert_eq!(adapter.call_count(), 4);
    }

    #[tokio::test]
    async fn recovery_emits_transition_back_to_healthy() {
        let adapter = Arc::new(ScriptedAdapter::new("forum"));
        for _ in 0..3 {
            adapter.push(Err(SourceError::Auth));
        }
        // Post-exclusion fetch succeeds.
        adapter.push(Ok(FetchPage::default()));

        let events = Arc::new(MemoryEventSink::new());
        let mut scheduler = scheduler_with(vec![adapter], events.clone());
        let now = Utc::now();
        for tick in 1..=7 {
            let (tx, _rx) = channel();
            scheduler.run_tick(tick, now, tx, shutdown_rx()).await;
        }
        assert_eq!(
            events.count_of("adapter_health_changed"),
            2,
            "degradation plus recovery"
        );
        assert_eq!(
            scheduler.adapter_health("forum"),
            Some(&AdapterHealth::Healthy)
        );
    }

    #[tokio::test]
    async fn rate_limited_adapter_defers_until_retry_after() {
        let adapter = Arc::new(ScriptedAdapter::new("forum"));
        adapter.push(Err(SourceError::RateLimited {
            retry_after: Some(Duration::from_secs(300)),
        }));

        let events = Arc::new(MemoryEventSink::new());
        let mut scheduler = scheduler_with(vec![adapter.clone()], events.clone());
        let now = Utc::now();

        let (tx, _rx) = channel();
        scheduler.run_tick(1, now, tx, shutdown_rx()).await;
        assert_eq!(adapter.call_count(), 1);

        // 2 minutes later: still deferred.
        let (tx, _rx) = channel();
        let report = scheduler
            .run_tick(2, now + chrono::Duration::minutes(2), tx, shutdown_rx())
            .await;
        assert_eq!(report.adapters_deferred, 1);
        assert_eq!(adapter.call_count(), 1);

        // 6 minutes later: eligible again. Rate limits never degrade health.
        let (tx, _rx) = channel();
        scheduler
            .run_tick(3, now + chrono::Duration::minutes(6), tx, shutdown_rx())
            .await;
        assert_eq!(adapter.call_count(), 2);
        assert_eq!(events.count_of("adapter_health_changed"), 0);
    }

    #[tokio::test]
    async fn one_broken_adapter_does_not_block_others() {
        let broken = Arc::new(ScriptedAdapter::new("forum"));
        broken.push(Err(SourceError::Permanent("endpoint gone (404)".into())));
        let healthy = Arc::new(ScriptedAdapter::new("launch_feed"));
        healthy.push(Ok(FetchPage {
            signals: vec![test_signal("launch_feed", "x")],
            next_cursor: None,
            rate_limit_hint: None,
        }));

        let events = Arc::new(MemoryEventSink::new());
        let mut scheduler = scheduler_with(vec![broken, healthy], events.clone());
        let (tx, mut rx) = channel();
        let report = scheduler.run_tick(1, Utc::now(), tx, shutdown_rx()).await;

        assert_eq!(report.signals_fetched, 1);
        assert_eq!(report.fetch_failures, 1);
        assert_eq!(rx.recv().await.unwrap().source_id, "launch_feed");
        assert!(matches!(
            scheduler.adapter_health("forum"),
            Some(AdapterHealth::Degraded { .. })
        ));
        assert_eq!(
            scheduler.adapter_health("launch_feed"),
            Some(&AdapterHealth::Healthy)
        );
    }

    #[tokio::test]
    async fn transient_failure_leaves_adapter_healthy() {
        let adapter = Arc::new(ScriptedAdapter::new("forum"));
        adapter.push(Err(SourceError::Transient("connection reset".into())));

        let events = Arc::new(MemoryEventSink::new());
        let mut scheduler = scheduler_with(vec![adapter.clone()], events.clone());
        let (tx, _rx) = channel();
        let report = scheduler.run_tick(1, Utc::now(), tx, shutdown_rx()).await;

        assert_eq!(report.fetch_failures, 1);
        assert_eq!(events.count_of("adapter_health_changed"), 0);
        assert_eq!(
            scheduler.adapter_health("forum"),
            Some(&AdapterHealth::Healthy)
        );

        // Next tick retries normally.
        let (tx, _rx) = channel();
        scheduler.run_tick(2, Utc::now(), tx, shutdown_rx()).await;
        assert_eq!(adapter.call_count(), 2);
    }
}
