//! Deterministic fallback summarizer.
//!
//! When the structured pipeline cannot complete, the attempt still produces
//! a candidate derived purely from the cluster's aggregated statistics: no
//! inference call, no randomness. A dense, evidently interesting cluster is
//! never silently dropped.

use oppradar_common::{ClusterDigest, SignalKind};

/// Fallback candidates must always score below any primary candidate on an
/// equivalent cluster; primary confidence starts at [`PRIMARY_CONFIDENCE_BASE`].
pub const FALLBACK_CONFIDENCE_CAP: f64 = 0.45;
pub const PRIMARY_CONFIDENCE_BASE: f64 = 0.5;

#[derive(Debug, Clone)]
pub struct FallbackSummary {
    pub title: String,
    pub thesis: String,
    pub confidence: f64,
}

/// Summarize a cluster from its statistics alone.
pub fn summarize(digest: &ClusterDigest) -> FallbackSummary {
    let topic = if digest.top_terms.is_empty() {
        digest
            .sample_titles
            .first()
            .cloned()
            .unwrap_or_else(|| "unlabeled cluster".to_string())
    } else {
        digest.top_terms.iter().take(4).cloned().collect::<Vec<_>>().join(" ")
    };

    let dominant = digest.dominant_kind().unwrap_or(SignalKind::Discussion);
    let framing = match dominant {
        SignalKind::PainPoint => "recurring pain around",
        SignalKind::FeatureRequest => "repeated requests for",
        SignalKind::Trend => "an emerging trend around",
        SignalKind::Discussion => "sustained discussion around",
    };

    let thesis = format!(
        "{} signals across sources indicate {} {} (mean quality {:.2}, mean engagement \
{:.0}/100, density {:.2}). Leading signals: {}.",
        digest.member_count,
        framing,
        topic,
        digest.quality_mean,
        digest.engagement_mean,
        digest.density_score,
        digest.sample_titles.join("; "),
    );

    FallbackSummary {
        title: format!("Cluster signal: {topic}"),
        thesis,
        confidence: confidence(digest),
    }
}

/// Monotone in member count, quality, and engagement; capped strictly below
/// the primary-mode confidence floor.
pub fn confidence(digest: &ClusterDigest) -> f64 {
    let members = (digest.member_count.min(8)) as f64;
    let raw = 0.15 + 0.02 * members + 0.15 * digest.quality_mean
        + digest.engagement_mean / 1000.0;
    raw.min(FALLBACK_CONFIDENCE_CAP)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeMap;
    use uuid::Uuid;

    fn digest(members: usize, quality: f64, engagement: f64) -> ClusterDigest {
        let mut by_kind = BTreeMap::new();
        by_kind.insert(SignalKind::PainPoint, members as u32);
        ClusterDigest {
            cluster_id: Uuid::new_v4(),
            member_count: members,
            density_score: 0.8,
            quality_mean: quality,
            engagement_mean: engagement,
            by_kind,
            sample_titles: vec!["CSV export times out".to_string()],
            top_terms: vec!["csv".to_string(), "export".to_string(), "timeout".to_string()],
            first_seen: Utc::now(),
            last_updated: Utc::now(),
        }
    }

    #[test]
    fn summary_is_deterministic() {
        let d = digest(6, 0.75, 60.0);
        let a = summarize(&d);
        let b = summarize(&d);
        assert_eq!(a.title, b.title);
        assert_eq!(a.thesis, b.thesis);
        assert_eq!(a.confidence, b.confidence);
    }

    #[test]
    fn confidence_never_reaches_primary_floor() {
        let huge = digest(500, 1.0, 100.0);
        assert!(confidence(&huge) <= FALLBACK_CONFIDENCE_CAP);
        assert!(FALLBACK_CONFIDENCE_CAP < PRIMARY_CONFIDENCE_BASE);
    }

    #[test]
    fn confidence_grows_with_cluster_strength() {
        let weak = confidence(&digest(2, 0.4, 10.0));
        let strong = confidence(&digest(8, 0.9, 80.0));
        assert!(strong > weak);
    }

    #[test]
    fn thesis_mentions_statistics_and_framing() {
        let summary = summarize(&digest(6, 0.75, 60.0));
        assert!(summary.thesis.contains("6 signals"));
        assert!(summary.thesis.contains("recurring pain around"));
        assert!(summary.title.contains("csv export timeout"));
    }
}
