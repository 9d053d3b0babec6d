//! Issue tracker adapter (GitHub-compatible search API).
//!
//! Searches open issues matching the configured query, newest-first with
//! page-number cursors. Reactions and comment counts feed engagement; label
//! names drive kind classification. Rate-limit headers are surfaced as a
//! pacing hint before the source starts rejecting calls.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use oppradar_common::{AdapterHealth, Engagement, Signal, SignalContent, SignalKind, SourceError};

use crate::adapter::{
    classify_kind, classify_status, classify_transport, parse_retry_after, AdapterDescriptor,
    FetchPage, SourceAdapter,
};

pub const SOURCE_ID: &str = "issue_tracker";

const PER_PAGE: u32 = 50;
/// Start pacing when fewer than this many calls remain in the quota window.
const RATE_REMAINING_FLOOR: u64 = 5;

pub struct IssueTrackerAdapter {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
    query: String,
}

impl IssueTrackerAdapter {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        token: Option<String>,
        query: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            query: query.into(),
        }
    }

    fn request(&self, url: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .http
            .get(url)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .header(reqwest::header::USER_AGENT, "oppradar-harvester");
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }
        builder
    }

    fn search_url(&self, since: DateTime<Utc>, page: u32) -> String {
        let query = format!("{} created:>={}", self.query, since.format("%Y-%m-%d"));
        format!(
            "{}/search/issues?q={}&sort=created&order=asc&per_page={PER_PAGE}&page={page}",
            self.base_url,
            urlencode(&query),
        )
    }
}

#[async_trait]
impl SourceAdapter for IssueTrackerAdapter {
    fn descriptor(&self) -> AdapterDescriptor {
        AdapterDescriptor {
            source_id: SOURCE_ID,
            display_name: "Issue tracker",
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
            None => 1,
        };

        let response = self
            .request(&self.search_url(since, page))
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            return Err(classify_status(status, retry_after));
        }

        let rate_limit_hint = rate_limit_hint(response.headers());
        let body = response.text().await.map_err(classify_transport)?;
        let (signals, total_count) = parse_search_page(&body, since)?;

        let seen_so_far = u64::from(page) * u64::from(PER_PAGE);
        let next_cursor = (seen_so_far < total_count).then(|| (page + 1).to_string());

        Ok(FetchPage {
            signals,
            next_cursor,
            rate_limit_hint,
        })
    }

    async fn health_check(&self) -> AdapterHealth {
        if self.token.is_none() {
            return AdapterHealth::Unauthenticated;
        }
        match self.request(&format!("{}/rate_limit", self.base_url)).send().await {
            Ok(response) if response.status().is_success() => AdapterHealth::Healthy,
            Ok(response) if response.status().as_u16() == 401 => AdapterHealth::Unauthenticated,
            Ok(response) => AdapterHealth::Degraded {
                reason: format!("rate_limit endpoint returned {}", response.status()),
            },
            Err(e) => AdapterHealth::Degraded {
                reason: e.to_string(),
            },
        }
    }
}

/// Derive a pacing hint from quota headers: when the remaining quota is
/// nearly gone, wait out the reset window.
fn rate_limit_hint(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    let remaining: u64 = headers.get("x-ratelimit-remaining")?.to_str().ok()?.parse().ok()?;
    if remaining > RATE_REMAINING_FLOOR {
        return None;
    }
    let reset: i64 = headers.get("x-ratelimit-reset")?.to_str().ok()?.parse().ok()?;
    let wait = reset - Utc::now().timestamp();
    (wait > 0).then(|| Duration::from_secs(wait as u64))
}

fn urlencode(raw: &str) -> String {
    raw.replace(' ', "+").replace(':', "%3A").replace('>', "%3E")
}

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SearchPage {
    total_count: u64,
    items: Vec<Issue>,
}

#[derive(Debug, Deserialize)]
struct Issue {
    number: u64,
    title: String,
    #[serde(default)]
    body: Option<String>,
    created_at: DateTime<Utc>,
    #[serde(default)]
    comments: u32,
    #[serde(default)]
    reactions: Reactions,
    #[serde(default)]
    labels: Vec<Label>,
    #[serde(default)]
    html_url: String,
}

#[derive(Debug, Default, Deserialize)]
struct Reactions {
    #[serde(rename = "+1", default)]
    plus_one: u32,
    #[serde(default)]
    total_count: u32,
}

#[derive(Debug, Deserialize)]
struct Label {
    name: String,
}

fn kind_for_issue(issue: &Issue) -> SignalKind {
    for label in &issue.labels {
        match label.name.as_str() {
            "bug" | "regression" => return SignalKind::PainPoint,
            "enhancement" | "feature" | "feature-request" => return SignalKind::FeatureRequest,
            "question" | "discussion" => return SignalKind::Discussion,
            _ => {}
        }
    }
    classify_kind(
        &issue.title,
        issue.body.as_deref().unwrap_or(""),
        SignalKind::PainPoint,
    )
}

fn parse_search_page(
    body: &str,
    since: DateTime<Utc>,
) -> Result<(Vec<Signal>, u64), SourceError> {
    let page: SearchPage = serde_json::from_str(body)
        .map_err(|e| SourceError::Permanent(format!("issue search did not parse: {e}")))?;

    let total_count = page.total_count;
    let signals = page
        .items
        .into_iter()
        .filter(|i| i.created_at >= since)
        .map(|issue| {
            let kind = kind_for_issue(&issue);
            let upvotes = issue.reactions.plus_one.max(issue.reactions.total_count);
            let mut signal = Signal::new(
                SOURCE_ID,
                issue.number.to_string(),
                issue.created_at,
                SignalContent::new(issue.title, issue.body.unwrap_or_default()),
                Engagement::new(upvotes, issue.comments, 0),
                kind,
            );
            signal
                .raw_metadata
                .insert("url".to_string(), serde_json::json!(issue.html_url));
            signal.raw_metadata.insert(
                "labels".to_string(),
                serde_json::json!(issue.labels.iter().map(|l| &l.name).collect::<Vec<_>>()),
            );
            signal
        })
        .collect();

    Ok((signals, total_count))
}
