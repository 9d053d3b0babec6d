//! Quality scoring stage.
//!
//! Score = weighted combination of content-length adequacy, engagement
//! percentile, source trust weight, and recency decay. Scores are computed
//! once per signal at ingestion; the policy version is stamped onto the
//! score so a future policy bump can recompute without ambiguity.

use chrono::{DateTime, Utc};

use oppradar_common::{QualityScore, Signal};

/// Content shorter than this contributes nothing to length adequacy.
const LENGTH_FLOOR_CHARS: f64 = 40.0;
/// Content at or beyond this length earns full adequacy.
const LENGTH_CEIL_CHARS: f64 = 400.0;

#[derive(Debug, Clone)]
pub struct QualityPolicy {
    pub version: u32,
    /// Scores below this mark the signal `low_quality` (still persisted).
    pub floor: f64,
    pub length_weight: f64,
    pub engagement_weight: f64,
    pub trust_weight: f64,
    pub recency_weight: f64,
    pub recency_half_life_hours: f64,
}

impl QualityPolicy {
    pub fn new(version: u32, floor: f64) -> Self {
        Self {
            version,
            floor,
            length_weight: 0.3,
            engagement_weight: 0.3,
            trust_weight: 0.2,
            recency_weight: 0.2,
            recency_half_life_hours: 48.0,
        }
    }

    /// Score a signal. Deterministic given identical signal, trust, `as_of`,
    /// and policy version.
    pub fn score(&self, signal: &Signal, source_trust: f64, as_of: DateTime<Utc>) -> QualityScore {
        let chars = signal.content.combined().chars().count() as f64;
        let length = ((chars - LENGTH_FLOOR_CHARS) / (LENGTH_CEIL_CHARS - LENGTH_FLOOR_CHARS))
            .clamp(0.0, 1.0);

        let engagement = (signal.engagement.percentile / 100.0).clamp(0.0, 1.0);
        let trust = source_trust.clamp(0.0, 1.0);

        let age_hours = (as_of - signal.captured_at).num_minutes() as f64 / 60.0;
        let recency = if age_hours <= 0.0 {
            1.0
        } else {
            0.5_f64.powf(age_hours / self.recency_half_life_hours)
        };

        let mut factors = [
            ("content_length", length, self.length_weight),
            ("engagement_percentile", engagement, self.engagement_weight),
            ("source_trust", trust, self.trust_weight),
            ("recency", recency, self.recency_weight),
        ];

        let score: f64 = factors.iter().map(|(_, value, weight)| value * weight).sum();

        // Reasons ordered by contribution, largest first.
        factors.sort_by(|a, b| (b.1 * b.2).total_cmp(&(a.1 * a.2)));
        let reasons = factors
            .iter()
            .map(|(name, value, weight)| format!("{name} {value:.2} (weight {weight:.2})"))
            .collect();

        QualityScore {
            score: score.clamp(0.0, 1.0),
            reasons,
            policy_version: self.version,
        }
    }

    pub fn is_low_quality(&self, score: &QualityScore) -> bool {
        score.score < self.floor
    }
}
