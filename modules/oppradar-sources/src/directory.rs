//! Company directory adapter.
//!
//! Walks a paged JSON directory of companies (new entrants and profile
//! updates). Directory entries are weak individually but corroborate trend
//! clusters: several new companies in one niche is a market signal.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use oppradar_common::{AdapterHealth, Engagement, Signal, SignalContent, SignalKind, SourceError};

use crate::adapter::{
    classify_status, classify_transport, get_checked, parse_retry_after, AdapterDescriptor,
    FetchPage, SourceAdapter,
};

pub const SOURCE_ID: &str = "directory";

pub struct DirectoryAdapter {
    http: reqwest::Client,
    base_url: String,
}

impl DirectoryAdapter {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn page_url(&self, since: DateTime<Utc>, page: u32) -> String {
        format!(
            "{}/companies?listed_after={}&page={page}",
            self.base_url,
            since.format("%Y-%m-%dT%H:%M:%SZ"),
        )
    }
}

#[async_trait]
impl SourceAdapter for DirectoryAdapter {
    fn descriptor(&self) -> AdapterDescriptor {
        AdapterDescriptor {
            source_id: SOURCE_ID,
            display_name: "Company directory",
            // The directory backend keys pagination to server-side session
            // state, so overlapping fetches can skip or repeat pages.
            stateless: false,
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

        let response = get_checked(&self.http, &self.page_url(since, page)).await?;
        let rate_limit_hint = parse_retry_after(response.headers());
        let body = response.text().await.map_err(classify_transport)?;

        let (signals, has_more) = parse_directory_page(&body, since)?;
        Ok(FetchPage {
            signals,
            next_cursor: has_more.then(|| (page + 1).to_string()),
            rate_limit_hint,
        })
    }

    async fn health_check(&self) -> AdapterHealth {
        match self.http.get(self.page_url(Utc::now(), 1)).send().await {
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
struct DirectoryPage {
    companies: Vec<Company>,
    #[serde(default)]
    has_more: bool,
}

#[derive(Debug, Deserialize)]
struct Company {
    id: String,
    name: String,
    #[serde(default)]
    tagline: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    followers: u32,
    listed_at: DateTime<Utc>,
}

fn parse_directory_page(
    body: &str,
    since: DateTime<Utc>,
) -> Result<(Vec<Signal>, bool), SourceError> {
    let page: DirectoryPage = serde_json::from_str(body)
        .map_err(|e| SourceError::Permanent(format!("directory page did not parse: {e}")))?;

    let has_more = page.has_more;
    let signals = page
        .companies
        .into_iter()
        .filter(|c| c.listed_at >= since)
        .map(|company| {
            let title = if company.tagline.is_empty() {
                company.name.clone()
            } else {
                format!("{} — {}", company.name, company.tagline)
            };
            let mut signal = Signal::new(
                SOURCE_ID,
                company.id,
                company.listed_at,
                SignalContent::new(title, company.description),
                Engagement::new(0, 0, company.followers),
                SignalKind::Trend,
            );
            signal
                .raw_metadata
                .insert("name".to_string(), serde_json::json!(company.name));
            if let Some(category) = company.category {
                signal
                    .raw_metadata
                    .insert("category".to_string(), serde_json::json!(category));
            }
            signal
        })
        .collect();

    Ok((signals, has_more))
}
