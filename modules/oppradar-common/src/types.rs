use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::fingerprint::TopicFingerprint;

// --- Signal Kinds ---

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    PainPoint,
    FeatureRequest,
    Discussion,
    Trend,
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalKind::PainPoint => write!(f, "pain_point"),
            SignalKind::FeatureRequest => write!(f, "feature_request"),
            SignalKind::Discussion => write!(f, "discussion"),
            SignalKind::Trend => write!(f, "trend"),
        }
    }
}

impl SignalKind {
    pub fn from_str_loose(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "pain_point" | "pain" | "complaint" => Self::PainPoint,
            "feature_request" | "feature" | "enhancement" => Self::FeatureRequest,
            "trend" | "launch" => Self::Trend,
            _ => Self::Discussion,
        }
    }

    pub const ALL: [SignalKind; 4] = [
        SignalKind::PainPoint,
        SignalKind::FeatureRequest,
        SignalKind::Discussion,
        SignalKind::Trend,
    ];
}

// --- Engagement ---

/// Raw engagement counters as reported by the source, plus the normalized
/// 0-100 percentile computed during pipeline normalization. Counter semantics
/// vary by source; only `percentile` is comparable across sources.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Engagement {
    pub upvotes: u32,
    pub comments: u32,
    pub views: u32,
    /// Source-calibrated percentile on the common 0-100 scale.
    pub percentile: f64,
}

impl Engagement {
    pub fn new(upvotes: u32, comments: u32, views: u32) -> Self {
        Self {
            upvotes,
            comments,
            views,
            percentile: 0.0,
        }
    }
}

// --- Signal Content ---

/// Title + body text of a signal. `folded` is the comparison form (trimmed,
/// casefolded, whitespace-collapsed); the original casing is kept for display.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalContent {
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub folded: String,
}

impl SignalContent {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            folded: String::new(),
        }
    }

    /// The full display text, title first.
    pub fn combined(&self) -> String {
        if self.body.is_empty() {
            self.title.clone()
        } else {
            format!("{}\n{}", self.title, self.body)
        }
    }
}

// --- Signal ---

/// One external observation ingested from a source. Immutable once persisted;
/// corrections create a new version rather than mutating in place.
///
/// `(source_id, external_id)` is unique across the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub id: Uuid,
    /// Adapter identity (e.g. "forum", "issue_tracker").
    pub source_id: String,
    /// Source-native identifier, unique per source.
    pub external_id: String,
    pub captured_at: DateTime<Utc>,
    pub content: SignalContent,
    pub engagement: Engagement,
    pub kind: SignalKind,
    /// Opaque bag for source-specific fields.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub raw_metadata: HashMap<String, serde_json::Value>,
    /// Set once by the pipeline at ingestion time.
    pub quality: Option<QualityScore>,
    /// When set, this signal is a duplicate linked to the canonical signal.
    pub duplicate_of: Option<Uuid>,
    /// Quality score fell below the configured floor. Persisted regardless.
    #[serde(default)]
    pub low_quality: bool,
}

impl Signal {
    pub fn new(
        source_id: impl Into<String>,
        external_id: impl Into<String>,
        captured_at: DateTime<Utc>,
        content: SignalContent,
        engagement: Engagement,
        kind: SignalKind,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_id: source_id.into(),
            external_id: external_id.into(),
            captured_at,
            content,
            engagement,
            kind,
            raw_metadata: HashMap::new(),
            quality: None,
            duplicate_of: None,
            low_quality: false,
        }
    }

    /// Identity key: unique per source.
    pub fn dedup_key(&self) -> (&str, &str) {
        (&self.source_id, &self.external_id)
    }

    pub fn is_canonical(&self) -> bool {
        self.duplicate_of.is_none()
    }
}

// --- Quality ---

/// Derived quality assessment, attached to a signal at ingestion time.
/// Recomputed only when the scoring policy version changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityScore {
    /// In [0, 1].
    pub score: f64,
    /// Contributing factors, ordered by contribution (largest first).
    pub reasons: Vec<String>,
    pub policy_version: u32,
}

// --- Clusters ---

/// A set of signals judged topically related, carrying an aggregate density
/// score. A signal belongs to at most one cluster per clustering run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalCluster {
    pub cluster_id: Uuid,
    /// Non-empty by construction.
    pub member_signal_ids: Vec<Uuid>,
    pub density_score: f64,
    pub topic_fingerprint: TopicFingerprint,
    pub first_seen: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

/// By-value snapshot of a cluster's aggregated signals, handed to the
/// synthesis orchestrator. No references back into clusterer state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterDigest {
    pub cluster_id: Uuid,
    pub member_count: usize,
    pub density_score: f64,
    /// Mean quality score across members, in [0, 1].
    pub quality_mean: f64,
    /// Mean normalized engagement percentile across members, in [0, 100].
    pub engagement_mean: f64,
    pub by_kind: BTreeMap<SignalKind, u32>,
    /// Representative member titles, highest quality first.
    pub sample_titles: Vec<String>,
    /// Normalized topic descriptor terms.
    pub top_terms: Vec<String>,
    pub first_seen: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl ClusterDigest {
    pub fn dominant_kind(&self) -> Option<SignalKind> {
        self.by_kind
            .iter()
            .max_by_key(|(_, count)| **count)
            .map(|(kind, _)| *kind)
    }
}

// --- Synthesis ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    MarketResearch,
    CompetitiveAnalysis,
    Synthesis,
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageKind::MarketResearch => write!(f, "market_research"),
            StageKind::CompetitiveAnalysis => write!(f, "competitive_analysis"),
            StageKind::Synthesis => write!(f, "synthesis"),
        }
    }
}

impl StageKind {
    pub const ALL: [StageKind; 3] = [
        StageKind::MarketResearch,
        StageKind::CompetitiveAnalysis,
        StageKind::Synthesis,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Completed,
    Failed,
    Skipped,
}

/// Outcome of one orchestrator stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    pub stage: StageKind,
    pub status: StageStatus,
    pub confidence: f64,
    /// Short stage summary on completion, failure cause otherwise.
    pub detail: Option<String>,
}

impl StageResult {
    pub fn completed(stage: StageKind, confidence: f64, detail: impl Into<String>) -> Self {
        Self {
            stage,
            status: StageStatus::Completed,
            confidence,
            detail: Some(detail.into()),
        }
    }

    pub fn failed(stage: StageKind, cause: impl Into<String>) -> Self {
        Self {
            stage,
            status: StageStatus::Failed,
            confidence: 0.0,
            detail: Some(cause.into()),
        }
    }

    pub fn skipped(stage: StageKind) -> Self {
        Self {
            stage,
            status: StageStatus::Skipped,
            confidence: 0.0,
            detail: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationMode {
    Primary,
    Fallback,
}

impl std::fmt::Display for GenerationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GenerationMode::Primary => write!(f, "primary"),
            GenerationMode::Fallback => write!(f, "fallback"),
        }
    }
}

/// Output of one synthesis attempt over a dense cluster. Created once per
/// attempt, never mutated; a re-run produces a new candidate and the external
/// opportunity store decides promotion/merge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpportunityCandidate {
    pub id: Uuid,
    pub source_cluster_id: Uuid,
    pub title: String,
    pub thesis: String,
    /// One result per pipeline stage, in stage order.
    pub stage_results: Vec<StageResult>,
    pub overall_confidence: f64,
    pub generation_mode: GenerationMode,
    pub created_at: DateTime<Utc>,
}

// --- Adapter Health ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterHealth {
    Healthy,
    Degraded { reason: String },
    Unauthenticated,
}

impl std::fmt::Display for AdapterHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdapterHealth::Healthy => write!(f, "healthy"),
            AdapterHealth::Degraded { reason } => write!(f, "degraded: {reason}"),
            AdapterHealth::Unauthenticated => write!(f, "unauthenticated"),
        }
    }
}

/// Typed initialization outcome, surfaced to the operator instead of being
/// swallowed at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitState {
    Ready,
    Degraded { reason: String },
    Unavailable { reason: String },
}

impl std::fmt::Display for InitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InitState::Ready => write!(f, "ready"),
            InitState::Degraded { reason } => write!(f, "degraded: {reason}"),
            InitState::Unavailable { reason } => write!(f, "unavailable: {reason}"),
        }
    }
}
