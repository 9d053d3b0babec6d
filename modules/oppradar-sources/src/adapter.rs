//! The source adapter contract.
//!
//! An adapter translates one external source's native representation into
//! [`Signal`] values. It performs no dedup, no scoring, and no persistence;
//! all failures surface as typed [`SourceError`] variants so the scheduler
//! can apply differentiated handling.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use oppradar_common::{AdapterHealth, Signal, SignalKind, SourceError};

/// Static identity and capabilities of an adapter.
#[derive(Debug, Clone)]
pub struct AdapterDescriptor {
    /// Stable source id, stamped onto every signal ("forum", ...).
    pub source_id: &'static str,
    pub display_name: &'static str,
    /// Whether concurrent `fetch` calls against the same instance are safe.
    /// The scheduler serializes fetches for adapters that report `false`.
    pub stateless: bool,
}

/// One page of fetched signals.
#[derive(Debug, Default)]
pub struct FetchPage {
    /// Signals in source-reported order.
    pub signals: Vec<Signal>,
    /// Opaque continuation token; `None` when the source is exhausted.
    pub next_cursor: Option<String>,
    /// Source-provided pacing hint, if any.
    pub rate_limit_hint: Option<Duration>,
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn descriptor(&self) -> AdapterDescriptor;

    /// Fetch items newer than `since`, resuming from `cursor` when given.
    /// Zero items with a valid cursor is a success, not a failure.
    async fn fetch(
        &self,
        since: DateTime<Utc>,
        cursor: Option<&str>,
    ) -> Result<FetchPage, SourceError>;

    async fn health_check(&self) -> AdapterHealth;
}

// ---------------------------------------------------------------------------
// Shared HTTP error mapping
// ---------------------------------------------------------------------------

/// Map an HTTP response status to the typed failure taxonomy. `retry_after`
/// comes from the Retry-After header when the source sent one.
pub(crate) fn classify_status(
    status: reqwest::StatusCode,
    retry_after: Option<Duration>,
) -> SourceError {
    match status.as_u16() {
        401 | 403 => SourceError::Auth,
        429 => SourceError::RateLimited { retry_after },
        404 | 410 => SourceError::Permanent(format!("endpoint gone ({status})")),
        code if code >= 500 => SourceError::Transient(format!("server error ({status})")),
        _ => SourceError::Permanent(format!("unexpected status ({status})")),
    }
}

/// Network-level reqwest failures are transient by definition; only request
/// construction bugs are permanent.
pub(crate) fn classify_transport(err: reqwest::Error) -> SourceError {
    if err.is_builder() {
        SourceError::Permanent(err.to_string())
    } else {
        SourceError::Transient(err.to_string())
    }
}

/// Parse a Retry-After header value (delta-seconds form only).
pub(crate) fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Issue a GET and surface non-success statuses as typed errors.
pub(crate) async fn get_checked(
    http: &reqwest::Client,
    url: &str,
) -> Result<reqwest::Response, SourceError> {
    let response = http.get(url).send().await.map_err(classify_transport)?;
    let status = response.status();
    if !status.is_success() {
        let retry_after = parse_retry_after(response.headers());
        return Err(classify_status(status, retry_after));
    }
    Ok(response)
}

// ---------------------------------------------------------------------------
// Kind classification
// ---------------------------------------------------------------------------

/// Keyword heuristic for sources that don't label their items. Checks the
/// title first, then the body, falling back to `default`.
pub(crate) fn classify_kind(title: &str, body: &str, default: SignalKind) -> SignalKind {
    const PAIN_MARKERS: [&str; 8] = [
        "bug", "broken", "fails", "crash", "error", "can't", "doesn't work", "frustrat",
    ];
    const FEATURE_MARKERS: [&str; 6] = [
        "feature request", "would be great", "please add", "support for", "wish", "enhancement",
    ];

    let haystack = format!("{} {}", title.to_lowercase(), body.to_lowercase());
    if PAIN_MARKERS.iter().any(|m| haystack.contains(m)) {
        SignalKind::PainPoint
    } else if FEATURE_MARKERS.iter().any(|m| haystack.contains(m)) {
        SignalKind::FeatureRequest
    } else {
        default
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn auth_statuses_map_to_auth() {
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, None),
            SourceError::Auth
        ));
        assert!(matches!(
            classify_status(StatusCode::FORBIDDEN, None),
            SourceError::Auth
        ));
    }

    #[test]
    fn rate_limit_carries_retry_after() {
        let err = classify_status(
            StatusCode::TOO_MANY_REQUESTS,
            Some(Duration::from_secs(120)),
        );
        match err {
            SourceError::RateLimited { retry_after } => {
                assert_eq!(retry_after, Some(Duration::from_secs(120)));
            }
            other => panic!("expected RateLimited, got {other}"),
        }
    }

    #[test]
    fn server_errors_are_transient() {
        assert!(classify_status(StatusCode::BAD_GATEWAY, None).is_retriable());
        assert!(classify_status(StatusCode::INTERNAL_SERVER_ERROR, None).is_retriable());
    }

    #[test]
    fn gone_endpoints_are_permanent() {
        assert!(matches!(
            classify_status(StatusCode::NOT_FOUND, None),
            SourceError::Permanent(_)
        ));
    }

    #[test]
    fn retry_after_parses_delta_seconds() {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(reqwest::header::RETRY_AFTER, "90".parse().unwrap());
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(90)));

        headers.insert(
            reqwest::header::RETRY_AFTER,
            "Wed, 21 Oct 2026 07:28:00 GMT".parse().unwrap(),
        );
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[test]
    fn classify_kind_spots_pain_markers() {
        assert_eq!(
            classify_kind("App crashes on upload", "", SignalKind::Discussion),
            SignalKind::PainPoint
        );
        assert_eq!(
            classify_kind("Export", "the export fails every time", SignalKind::Discussion),
            SignalKind::PainPoint
        );
    }

    #[test]
    fn classify_kind_spots_feature_markers() {
        assert_eq!(
            classify_kind("Please add webhook retries", "", SignalKind::Discussion),
            SignalKind::FeatureRequest
        );
    }

    #[test]
    fn classify_kind_falls_back_to_default() {
        assert_eq!(
            classify_kind("Weekly community thread", "general chat", SignalKind::Discussion),
            SignalKind::Discussion
        );
        assert_eq!(
            classify_kind("New release roundup", "", SignalKind::Trend),
            SignalKind::Trend
        );
    }
}
