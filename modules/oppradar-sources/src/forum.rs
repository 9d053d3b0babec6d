//! Discourse-style forum adapter.
//!
//! Reads the public `latest.json` topic listing, one page per fetch call,
//! and maps topics to signals. Pain points and feature requests are inferred
//! from topic tags first, title/excerpt keywords second.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use oppradar_common::{AdapterHealth, Engagement, Signal, SignalContent, SignalKind, SourceError};

use crate::adapter::{
    classify_kind, classify_status, classify_transport, get_checked, parse_retry_after,
    AdapterDescriptor, FetchPage, SourceAdapter,
};

pub const SOURCE_ID: &str = "forum";

pub struct ForumAdapter {
    http: reqwest::Client,
    base_url: String,
}

impl ForumAdapter {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn page_url(&self, page: u32) -> String {
        format!("{}/latest.json?page={page}", self.base_url)
    }
}

#[async_trait]
impl SourceAdapter for ForumAdapter {
    fn descriptor(&self) -> AdapterDescriptor {
        AdapterDescriptor {
            source_id: SOURCE_ID,
            display_name: "Community forum",
            stateless: true,
        }
    }

    async fn fetch(
        &self,
        since: DateTime<Utc>,
        cursor: Option<&str>,
    ) -> Result<FetchPage, SourceError> {
        let page: u32 = match cursor {
            Some(raw) => raw
                .parse()
                .map_err(|_| SourceError::Permanent(format!("bad cursor: {raw}")))?,
            None => 0,
        };

        let response = get_checked(&self.http, &self.page_url(page)).await?;
        let rate_limit_hint = parse_retry_after(response.headers());
        let body = response.text().await.map_err(classify_transport)?;

        let (signals, has_more) = parse_topic_page(&body, since)?;
        Ok(FetchPage {
            signals,
            next_cursor: has_more.then(|| (page + 1).to_string()),
            rate_limit_hint,
        })
    }

    async fn health_check(&self) -> AdapterHealth {
        match self.http.get(self.page_url(0)).send().await {
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

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct TopicListing {
    topic_list: TopicList,
}

#[derive(Debug, Deserialize)]
struct TopicList {
    topics: Vec<Topic>,
    more_topics_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Topic {
    id: u64,
    title: String,
    #[serde(default)]
    excerpt: String,
    created_at: DateTime<Utc>,
    #[serde(default)]
    like_count: u32,
    #[serde(default)]
    posts_count: u32,
    #[serde(default)]
    views: u32,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    slug: String,
}

fn kind_for_topic(topic: &Topic) -> SignalKind {
    for tag in &topic.tags {
        match tag.as_str() {
            "bug" | "problem" | "support" => return SignalKind::PainPoint,
            "feature" | "idea" | "wishlist" => return SignalKind::FeatureRequest,
            _ => {}
        }
    }
    classify_kind(&topic.title, &topic.excerpt, SignalKind::Discussion)
}

/// Parse one topic listing page into signals, preserving source order.
/// Topics older than `since` are skipped, not errors.
fn parse_topic_page(
    body: &str,
    since: DateTime<Utc>,
) -> Result<(Vec<Signal>, bool), SourceError> {
    let listing: TopicListing = serde_json::from_str(body)
        .map_err(|e| SourceError::Permanent(format!("topic listing did not parse: {e}")))?;

    let has_more = listing.topic_list.more_topics_url.is_some();
    let signals = listing
        .topic_list
        .topics
        .into_iter()
        .filter(|t| t.created_at >= since)
        .map(|topic| {
            let kind = kind_for_topic(&topic);
            // First post is the topic body itself, not a reply.
            let replies = topic.posts_count.saturating_sub(1);
            let mut signal = Signal::new(
                SOURCE_ID,
                topic.id.to_string(),
                topic.created_at,
                SignalContent::new(topic.title, topic.excerpt),
                Engagement::new(topic.like_count, replies, topic.views),
                kind,
            );
            signal
                .raw_metadata
                .insert("slug".to_string(), serde_json::json!(topic.slug));
            signal
                .raw_metadata
                .insert("tags".to_string(), serde_json::json!(topic.tags));
            signal
        })
        .collect();

    Ok((signals, has_more))
}
