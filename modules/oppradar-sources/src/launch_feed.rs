//! Product-launch feed adapter (RSS/Atom).
//!
//! Launch feeds carry trend signals: new products, releases, and launches.
//! Feeds have no pagination, so every fetch is a single page with no cursor.
//! Vote counts, when the feed embeds them in extensions, are best-effort.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use oppradar_common::{AdapterHealth, Engagement, Signal, SignalContent, SignalKind, SourceError};

use crate::adapter::{
    classify_status, classify_transport, get_checked, AdapterDescriptor, FetchPage, SourceAdapter,
};

pub const SOURCE_ID: &str = "launch_feed";

pub struct LaunchFeedAdapter {
    http: reqwest::Client,
    feed_url: String,
}

impl LaunchFeedAdapter {
    pub fn new(http: reqwest::Client, feed_url: impl Into<String>) -> Self {
        Self {
            http,
            feed_url: feed_url.into(),
        }
    }
}

#[async_trait]
impl SourceAdapter for LaunchFeedAdapter {
    fn descriptor(&self) -> AdapterDescriptor {
        AdapterDescriptor {
            source_id: SOURCE_ID,
            display_name: "Launch feed",
            stateless: true,
        }
    }

    async fn fetch(
        &self,
        since: DateTime<Utc>,
        _cursor: Option<&str>,
    ) -> Result<FetchPage, SourceError> {
        let response = get_checked(&self.http, &self.feed_url).await?;
        let bytes = response.bytes().await.map_err(classify_transport)?;
        let signals = parse_feed(&bytes, since)?;
        Ok(FetchPage {
            signals,
            next_cursor: None,
            rate_limit_hint: None,
        })
    }

    async fn health_check(&self) -> AdapterHealth {
        match self.http.head(&self.feed_url).send().await {
            Ok(response) if response.status().is_success() => AdapterHealth::Healthy,
            Ok(response) => match classify_status(response.status(), None) {
                SourceError::Auth => AdapterHealth::Unauthenticated,
                err => AdapterHealth::Degraded {
                    reason: err.to_string(),
                },
            },
            Err(e) => AdapterHealth::Degraded {
                reason: e.to_string(),
            },
        }
    }
}

/// Parse feed bytes into trend signals, newest entries in feed order.
fn parse_feed(bytes: &[u8], since: DateTime<Utc>) -> Result<Vec<Signal>, SourceError> {
    let feed = feed_rs::parser::parse(bytes)
        .map_err(|e| SourceError::Permanent(format!("feed did not parse: {e}")))?;

    let signals = feed
        .entries
        .into_iter()
        .filter_map(|entry| {
            let published = entry.published.or(entry.updated)?;
            if published < since {
                return None;
            }
            let title = entry.title.map(|t| t.content).unwrap_or_default();
            if title.is_empty() {
                return None;
            }
            let body = entry
                .summary
                .map(|s| s.content)
                .unwrap_or_default();

            let mut signal = Signal::new(
                SOURCE_ID,
                entry.id,
                published,
                SignalContent::new(title, body),
                Engagement::new(0, 0, 0),
                SignalKind::Trend,
            );
            if let Some(link) = entry.links.first() {
                signal
                    .raw_metadata
                    .insert("url".to_string(), serde_json::json!(link.href));
            }
            Some(signal)
        })
        .collect();

    Ok(signals)
}
