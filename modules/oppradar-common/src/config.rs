use std::collections::HashMap;
use std::env;

use tracing::info;

/// Application configuration loaded from environment variables. All
/// thresholds and limits live here; nothing is hard-coded at use sites.
#[derive(Debug, Clone)]
pub struct Config {
    // Inference provider
    pub anthropic_api_key: Option<String>,
    pub inference_model: String,
    pub inference_timeout_secs: u64,

    // Source adapters (an adapter is enabled when its endpoint is set)
    pub forum_base_url: Option<String>,
    pub issue_tracker_base_url: Option<String>,
    pub issue_tracker_token: Option<String>,
    pub issue_tracker_query: String,
    pub launch_feed_url: Option<String>,
    pub directory_base_url: Option<String>,

    /// Per-source trust weight in [0, 1], keyed by source id.
    pub trust_weights: HashMap<String, f64>,

    // Scheduling
    pub tick_interval_secs: u64,
    pub max_concurrent_fetches: usize,
    pub max_pages_per_tick: u32,
    pub retry_max_attempts: u32,
    pub backoff_base_ms: u64,
    pub degraded_exclusion_ticks: u64,
    pub auth_failure_threshold: u32,
    pub channel_capacity: usize,

    // Processing pipeline
    pub dedup_similarity_threshold: f64,
    pub dedup_index_capacity: usize,
    pub quality_floor: f64,
    pub quality_policy_version: u32,
    pub persist_retry_max_attempts: u32,

    // Clustering
    pub cluster_join_threshold: f64,
    pub cluster_publish_threshold: f64,
    pub cluster_window_hours: i64,
    pub synthesis_cooldown_hours: i64,

    // Synthesis
    pub max_concurrent_synthesis: usize,
    pub cluster_lock_timeout_secs: u64,
}

impl Config {
    /// Load configuration from environment variables. Panics with a clear
    /// message when a value is present but unparseable.
    pub fn from_env() -> Self {
        Self {
            anthropic_api_key: optional_env("ANTHROPIC_API_KEY"),
            inference_model: env::var("INFERENCE_MODEL")
                .unwrap_or_else(|_| "claude-sonnet-4-5".to_string()),
            inference_timeout_secs: parsed_env("INFERENCE_TIMEOUT_SECS", 60),

            forum_base_url: optional_env("FORUM_BASE_URL"),
            issue_tracker_base_url: optional_env("ISSUE_TRACKER_BASE_URL"),
            issue_tracker_token: optional_env("ISSUE_TRACKER_TOKEN"),
            issue_tracker_query: env::var("ISSUE_TRACKER_QUERY")
                .unwrap_or_else(|_| "is:issue is:open".to_string()),
            launch_feed_url: optional_env("LAUNCH_FEED_URL"),
            directory_base_url: optional_env("DIRECTORY_BASE_URL"),

            trust_weights: parse_trust_weights(
                &env::var("SOURCE_TRUST_WEIGHTS").unwrap_or_default(),
            ),

            tick_interval_secs: parsed_env("TICK_INTERVAL_SECS", 300),
            max_concurrent_fetches: parsed_env("MAX_CONCURRENT_FETCHES", 8),
            max_pages_per_tick: parsed_env("MAX_PAGES_PER_TICK", 5),
            retry_max_attempts: parsed_env("RETRY_MAX_ATTEMPTS", 3),
            backoff_base_ms: parsed_env("BACKOFF_BASE_MS", 500),
            degraded_exclusion_ticks: parsed_env("DEGRADED_EXCLUSION_TICKS", 3),
            auth_failure_threshold: parsed_env("AUTH_FAILURE_THRESHOLD", 3),
            channel_capacity: parsed_env("PIPELINE_CHANNEL_CAPACITY", 256),

            dedup_similarity_threshold: parsed_env("DEDUP_SIMILARITY_THRESHOLD", 0.85),
            dedup_index_capacity: parsed_env("DEDUP_INDEX_CAPACITY", 4096),
            quality_floor: parsed_env("QUALITY_FLOOR", 0.6),
            quality_policy_version: parsed_env("QUALITY_POLICY_VERSION", 1),
            persist_retry_max_attempts: parsed_env("PERSIST_RETRY_MAX_ATTEMPTS", 3),

            cluster_join_threshold: parsed_env("CLUSTER_JOIN_THRESHOLD", 0.7),
            cluster_publish_threshold: parsed_env("CLUSTER_PUBLISH_THRESHOLD", 0.75),
            cluster_window_hours: parsed_env("CLUSTER_WINDOW_HOURS", 72).clamp(24, 168),
            synthesis_cooldown_hours: parsed_env("SYNTHESIS_COOLDOWN_HOURS", 72),

            max_concurrent_synthesis: parsed_env("MAX_CONCURRENT_SYNTHESIS", 4),
            cluster_lock_timeout_secs: parsed_env("CLUSTER_LOCK_TIMEOUT_SECS", 600),
        }
    }

    /// Trust weight for a source, defaulting to a neutral 0.5.
    pub fn trust_weight(&self, source_id: &str) -> f64 {
        self.trust_weights
            .get(source_id)
            .copied()
            .unwrap_or(0.5)
            .clamp(0.0, 1.0)
    }

    /// Log the effective configuration without leaking secrets.
    pub fn log_redacted(&self) {
        info!(
            inference_key = if self.anthropic_api_key.is_some() { "set" } else { "unset" },
            model = self.inference_model.as_str(),
            forum = self.forum_base_url.is_some(),
            issue_tracker = self.issue_tracker_base_url.is_some(),
            launch_feed = self.launch_feed_url.is_some(),
            directory = self.directory_base_url.is_some(),
            tick_interval_secs = self.tick_interval_secs,
            max_concurrent_fetches = self.max_concurrent_fetches,
            dedup_threshold = self.dedup_similarity_threshold,
            quality_floor = self.quality_floor,
            join_threshold = self.cluster_join_threshold,
            publish_threshold = self.cluster_publish_threshold,
            cooldown_hours = self.synthesis_cooldown_hours,
            "Configuration loaded"
        );
    }
}

fn optional_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn parsed_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .unwrap_or_else(|_| panic!("{key} must parse, got: {raw}")),
        Err(_) => default,
    }
}

/// Parse "forum=0.8,issue_tracker=0.9" into a weight map. Malformed entries
/// are skipped rather than failing startup.
fn parse_trust_weights(raw: &str) -> HashMap<String, f64> {
    raw.split(',')
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            let weight: f64 = value.trim().parse().ok()?;
            Some((key.trim().to_string(), weight.clamp(0.0, 1.0)))
        })
        .collect()
}
