use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ai_client::{ClaudeInference, InferenceClient, UnconfiguredInference};
use oppradar_common::{Config, EventSink, MetricsSink, TracingEventSink, TracingMetricsSink};
use oppradar_harvester::backoff::RetryPolicy;
use oppradar_harvester::dedup::RecentIndex;
use oppradar_harvester::quality::QualityPolicy;
use oppradar_harvester::{
    Clusterer, DeadLetterQueue, Harvester, InMemoryStore, PersistingWriter, Pipeline, Scheduler,
    SchedulerConfig,
};
use oppradar_sources::{AdapterRegistry, Calibrations};
use oppradar_synthesis::{ClusterLocks, Orchestrator};

#[derive(Parser, Debug)]
#[command(name = "oppradar-harvester", about = "Market signal harvesting and synthesis core")]
struct Cli {
    /// Run a single tick and exit instead of looping.
    #[arg(long)]
    once: bool,

    /// Stop after this many ticks (loop mode).
    #[arg(long)]
    ticks: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("oppradar=info".parse()?))
        .init();

    info!("Opportunity Radar harvester starting...");

    let cli = Cli::parse();
    let config = Config::from_env();
    config.log_redacted();

    let events: Arc<dyn EventSink> = Arc::new(TracingEventSink);
    let metrics: Arc<dyn MetricsSink> = Arc::new(TracingMetricsSink);

    let registry = AdapterRegistry::from_config(&config);
    if registry.is_empty() {
        anyhow::bail!("no source adapters configured; set at least one endpoint");
    }

    let inference: Arc<dyn InferenceClient> = match &config.anthropic_api_key {
        Some(key) => Arc::new(ClaudeInference::new(
            key,
            config.inference_model.clone(),
            Duration::from_secs(config.inference_timeout_secs),
        )),
        None => {
            warn!("no inference credentials; all candidates will be fallback mode");
            Arc::new(UnconfiguredInference)
        }
    };

    // The in-memory store stands in for the external persistence
    // collaborator in single-process deployments.
    let store = Arc::new(InMemoryStore::new());
    let dead_letters = Arc::new(DeadLetterQueue::new());

    let scheduler = Scheduler::new(
        registry.adapters().to_vec(),
        SchedulerConfig {
            max_concurrent_fetches: config.max_concurrent_fetches,
            max_pages_per_tick: config.max_pages_per_tick,
            retry: RetryPolicy::new(
                config.retry_max_attempts,
                Duration::from_millis(config.backoff_base_ms),
            ),
            degraded_exclusion_ticks: config.degraded_exclusion_ticks,
            auth_failure_threshold: config.auth_failure_threshold,
            default_rate_limit_backoff: Duration::from_secs(60),
        },
        chrono::Utc::now() - chrono::Duration::hours(config.cluster_window_hours),
        Arc::clone(&events),
        Arc::clone(&metrics),
    );

    let pipeline = Pipeline::new(
        Calibrations::builtin(),
        RecentIndex::new(config.dedup_index_capacity),
        QualityPolicy::new(config.quality_policy_version, config.quality_floor),
        config.trust_weights.clone(),
        config.dedup_similarity_threshold,
        PersistingWriter::new(
            store.clone(),
            RetryPolicy::new(
                config.persist_retry_max_attempts,
                Duration::from_millis(config.backoff_base_ms),
            ),
            dead_letters.clone(),
            Arc::clone(&events),
        ),
        Arc::clone(&events),
        Arc::clone(&metrics),
    );

    let clusterer = Clusterer::new(
        config.cluster_join_threshold,
        config.cluster_publish_threshold,
        config.cluster_window_hours,
        config.synthesis_cooldown_hours,
    );

    let orchestrator = Arc::new(Orchestrator::new(
        inference,
        Arc::new(ClusterLocks::new(Duration::from_secs(
            config.cluster_lock_timeout_secs,
        ))),
        Arc::clone(&events),
        Arc::clone(&metrics),
    ));

    let mut harvester = Harvester::new(
        scheduler,
        pipeline,
        clusterer,
        orchestrator,
        store.clone(),
        Arc::clone(&events),
        config.channel_capacity,
        config.max_concurrent_synthesis,
    );

    // Shutdown propagates to every worker through one watch channel.
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received, shutting down after the current tick");
            let _ = shutdown_tx.send(true);
        }
    });

    let max_ticks = if cli.once { Some(1) } else { cli.ticks };
    harvester
        .run(
            Duration::from_secs(config.tick_interval_secs),
            shutdown_rx,
            max_ticks,
        )
        .await;

    if !dead_letters.is_empty() {
        warn!(count = dead_letters.len(), "dead-lettered signals awaiting requeue");
    }
    info!("{}", harvester.stats());

    Ok(())
}
