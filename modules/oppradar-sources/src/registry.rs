//! Static adapter registry.
//!
//! Every adapter implementation is known at compile time; configuration
//! selects which ones run. Each construction reports a typed init state so
//! a missing endpoint or bad URL reaches the operator instead of being
//! swallowed at startup.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use oppradar_common::{Config, InitState};

use crate::adapter::SourceAdapter;
use crate::directory::DirectoryAdapter;
use crate::forum::ForumAdapter;
use crate::issue_tracker::IssueTrackerAdapter;
use crate::launch_feed::LaunchFeedAdapter;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

pub struct AdapterRegistry {
    adapters: Vec<Arc<dyn SourceAdapter>>,
    init_report: Vec<(String, InitState)>,
}

impl AdapterRegistry {
    /// Construct every configured adapter. Adapters with no endpoint
    /// configured are reported `Unavailable` and skipped; a malformed
    /// endpoint is also `Unavailable` (never a panic or a silent drop).
    pub fn from_config(config: &Config) -> Self {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_default();

        let mut adapters: Vec<Arc<dyn SourceAdapter>> = Vec::new();
        let mut init_report = Vec::new();

        match checked_url("forum", config.forum_base_url.as_deref()) {
            Ok(base) => {
                adapters.push(Arc::new(ForumAdapter::new(http.clone(), base)));
                init_report.push(("forum".to_string(), InitState::Ready));
            }
            Err(state) => init_report.push(("forum".to_string(), state)),
        }

        match checked_url("issue_tracker", config.issue_tracker_base_url.as_deref()) {
            Ok(base) => {
                let state = if config.issue_tracker_token.is_some() {
                    InitState::Ready
                } else {
                    InitState::Degraded {
                        reason: "no token configured; unauthenticated quota applies".to_string(),
                    }
                };
                adapters.push(Arc::new(IssueTrackerAdapter::new(
                    http.clone(),
                    base,
                    config.issue_tracker_token.clone(),
                    config.issue_tracker_query.clone(),
                )));
                init_report.push(("issue_tracker".to_string(), state));
            }
            Err(state) => init_report.push(("issue_tracker".to_string(), state)),
        }

        match checked_url("launch_feed", config.launch_feed_url.as_deref()) {
            Ok(feed) => {
                adapters.push(Arc::new(LaunchFeedAdapter::new(http.clone(), feed)));
                init_report.push(("launch_feed".to_string(), InitState::Ready));
            }
            Err(state) => init_report.push(("launch_feed".to_string(), state)),
        }

        match checked_url("directory", config.directory_base_url.as_deref()) {
            Ok(base) => {
                adapters.push(Arc::new(DirectoryAdapter::new(http, base)));
                init_report.push(("directory".to_string(), InitState::Ready));
            }
            Err(state) => init_report.push(("directory".to_string(), state)),
        }

        for (source_id, state) in &init_report {
            match state {
                InitState::Ready => info!(source_id, "adapter ready"),
                InitState::Degraded { reason } => warn!(source_id, reason, "adapter degraded"),
                InitState::Unavailable { reason } => {
                    warn!(source_id, reason, "adapter unavailable")
                }
            }
        }

        Self {
            adapters,
            init_report,
        }
    }

    pub fn adapters(&self) -> &[Arc<dyn SourceAdapter>] {
        &self.adapters
    }

    pub fn init_report(&self) -> &[(String, InitState)] {
        &self.init_report
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

fn checked_url(source_id: &str, configured: Option<&str>) -> Result<String, InitState> {
    let raw = configured.ok_or_else(|| InitState::Unavailable {
        reason: format!("no endpoint configured for {source_id}"),
    })?;
    let parsed = url::Url::parse(raw).map_err(|e| InitState::Unavailable {
        reason: format!("endpoint for {source_id} did not parse: {e}"),
    })?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(InitState::Unavailable {
            reason: format!("endpoint for {source_id} must be http(s), got {}", parsed.scheme()),
        });
    }
    Ok(raw.to_string())
}
