//! The three-stage synthesis orchestrator.
//!
//! Per-attempt state machine: `Pending → MarketResearch → CompetitiveAnalysis
//! → Synthesis → {Completed | Failed}`. Every stage is a structured inference
//! call; a failed stage is retried once with the relaxed prompt strategy, and
//! a second failure switches the whole attempt to fallback mode, which
//! derives a lower-confidence candidate from cluster statistics alone. An
//! attempt therefore always yields exactly one candidate, unless the
//! cluster's hard lock timeout fires, which fails the attempt and frees the
//! cluster for the next tick.

use std::sync::Arc;

use chrono::Utc;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use ai_client::{invoke_typed, InferenceClient};
use oppradar_common::{
    ClusterDigest, EventSink, GenerationMode, MetricsSink, OpportunityCandidate, StageKind,
    StageResult, SystemEvent,
};

use crate::fallback::{self, PRIMARY_CONFIDENCE_BASE};
use crate::locks::ClusterLocks;
use crate::stages::{
    competitive_analysis_input, competitive_analysis_system, market_research_input,
    market_research_system, synthesis_input, synthesis_system, CompetitiveAnalysisOutput,
    MarketResearchOutput, PromptStrategy, SynthesisOutput,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    Pending,
    MarketResearch,
    CompetitiveAnalysis,
    Synthesis,
    Completed,
    Failed,
}

impl std::fmt::Display for AttemptState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttemptState::Pending => write!(f, "pending"),
            AttemptState::MarketResearch => write!(f, "market_research"),
            AttemptState::CompetitiveAnalysis => write!(f, "competitive_analysis"),
            AttemptState::Synthesis => write!(f, "synthesis"),
            AttemptState::Completed => write!(f, "completed"),
            AttemptState::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Error, Debug)]
pub enum SynthesisError {
    #[error("another synthesis attempt holds this cluster's lock")]
    LockHeld,

    #[error("cluster lock hard timeout elapsed mid-attempt")]
    LockTimeout,
}

/// Strict-call temperature; the relaxed retry runs slightly warmer.
const STRICT_TEMPERATURE: f32 = 0.2;
const RELAXED_TEMPERATURE: f32 = 0.5;

trait StageConfidence {
    fn confidence(&self) -> f64;
}

impl StageConfidence for MarketResearchOutput {
    fn confidence(&self) -> f64 {
        self.confidence
    }
}

impl StageConfidence for CompetitiveAnalysisOutput {
    fn confidence(&self) -> f64 {
        self.confidence
    }
}

impl StageConfidence for SynthesisOutput {
    fn confidence(&self) -> f64 {
        self.confidence
    }
}

pub struct Orchestrator {
    inference: Arc<dyn InferenceClient>,
    locks: Arc<ClusterLocks>,
    events: Arc<dyn EventSink>,
    metrics: Arc<dyn MetricsSink>,
}

impl Orchestrator {
    pub fn new(
        inference: Arc<dyn InferenceClient>,
        locks: Arc<ClusterLocks>,
        events: Arc<dyn EventSink>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            inference,
            locks,
            events,
            metrics,
        }
    }

    /// Run one synthesis attempt over a dense cluster. At most one attempt
    /// per cluster is in flight; the per-cluster lock is held for the
    /// attempt's lifetime and carries a hard timeout as a safety net against
    /// a wedged inference call.
    pub async fn synthesize(
        &self,
        digest: ClusterDigest,
    ) -> Result<OpportunityCandidate, SynthesisError> {
        let _guard = self
            .locks
            .try_acquire(digest.cluster_id)
            .ok_or(SynthesisError::LockHeld)?;

        match tokio::time::timeout(self.locks.hard_timeout(), self.run_attempt(&digest)).await {
            Ok(candidate) => {
                info!(
                    cluster_id = %digest.cluster_id,
                    candidate_id = %candidate.id,
                    mode = %candidate.generation_mode,
                    confidence = candidate.overall_confidence,
                    state = %AttemptState::Completed,
                    "synthesis attempt finished"
                );
                self.events.emit(SystemEvent::SynthesisCompleted {
                    cluster_id: digest.cluster_id,
                    candidate_id: candidate.id,
                    mode: candidate.generation_mode,
                    overall_confidence: candidate.overall_confidence,
                });
                Ok(candidate)
            }
            Err(_) => {
                warn!(
                    cluster_id = %digest.cluster_id,
                    state = %AttemptState::Failed,
                    "synthesis attempt hit the cluster lock hard timeout"
                );
                self.events.emit(SystemEvent::SynthesisFailed {
                    cluster_id: digest.cluster_id,
                    reason: "cluster lock hard timeout".to_string(),
                });
                Err(SynthesisError::LockTimeout)
            }
        }
    }

    /// The attempt body. Infallible by design: either all three stages
    /// complete in primary mode, or the attempt switches to fallback and the
    /// candidate is derived from cluster statistics.
    async fn run_attempt(&self, digest: &ClusterDigest) -> OpportunityCandidate {
        let mut state = AttemptState::Pending;
        debug!(cluster_id = %digest.cluster_id, state = %state, "attempt starting");

        state = AttemptState::MarketResearch;
        debug!(cluster_id = %digest.cluster_id, state = %state, "stage starting");
        let research: MarketResearchOutput = match self
            .run_stage(
                StageKind::MarketResearch,
                market_research_system(PromptStrategy::Strict),
                market_research_system(PromptStrategy::Relaxed),
                market_research_input(digest),
            )
            .await
        {
            Ok(output) => output,
            Err(failed) => {
                return self.fallback_candidate(
                    digest,
                    vec![
                        failed,
                        StageResult::skipped(StageKind::CompetitiveAnalysis),
                        StageResult::skipped(StageKind::Synthesis),
                    ],
                    StageKind::MarketResearch,
                );
            }
        };

        state = AttemptState::CompetitiveAnalysis;
        debug!(cluster_id = %digest.cluster_id, state = %state, "stage starting");
        let research_result = StageResult::completed(
            StageKind::MarketResearch,
            research.confidence(),
            research.problem_statement.clone(),
        );
        let competition: CompetitiveAnalysisOutput = match self
            .run_stage(
                StageKind::CompetitiveAnalysis,
                competitive_analysis_system(PromptStrategy::Strict),
                competitive_analysis_system(PromptStrategy::Relaxed),
                competitive_analysis_input(digest, &research),
            )
            .await
        {
            Ok(output) => output,
            Err(failed) => {
                return self.fallback_candidate(
                    digest,
                    vec![
                        research_result,
                        failed,
                        StageResult::skipped(StageKind::Synthesis),
                    ],
                    StageKind::CompetitiveAnalysis,
                );
            }
        };

        state = AttemptState::Synthesis;
        debug!(cluster_id = %digest.cluster_id, state = %state, "stage starting");
        let competition_result = StageResult::completed(
            StageKind::CompetitiveAnalysis,
            competition.confidence(),
            competition.whitespace.clone(),
        );
        let synthesis: SynthesisOutput = match self
            .run_stage(
                StageKind::Synthesis,
                synthesis_system(PromptStrategy::Strict),
                synthesis_system(PromptStrategy::Relaxed),
                synthesis_input(digest, &research, &competition),
            )
            .await
        {
            Ok(output) => output,
            Err(failed) => {
                return self.fallback_candidate(
                    digest,
                    vec![research_result, competition_result, failed],
                    StageKind::Synthesis,
                );
            }
        };

        let synthesis_result = StageResult::completed(
            StageKind::Synthesis,
            synthesis.confidence(),
            synthesis.thesis.clone(),
        );
        let stage_results = vec![research_result, competition_result, synthesis_result];
        let overall_confidence = primary_confidence(&stage_results);

        OpportunityCandidate {
            id: Uuid::new_v4(),
            source_cluster_id: digest.cluster_id,
            title: synthesis.title,
            thesis: synthesis.thesis,
            stage_results,
            overall_confidence,
            generation_mode: GenerationMode::Primary,
            created_at: Utc::now(),
        }
    }

    /// One stage: strict call, then one relaxed retry. A second failure
    /// yields the failed stage result and the caller switches modes.
    async fn run_stage<T>(
        &self,
        stage: StageKind,
        strict_system: String,
        relaxed_system: String,
        input: serde_json::Value,
    ) -> Result<T, StageResult>
    where
        T: DeserializeOwned + JsonSchema + StageConfidence,
    {
        let stage_name = stage.to_string();
        let labels = [("stage", stage_name.as_str())];

        let strict_err = match invoke_typed::<T>(
            self.inference.as_ref(),
            stage_name.clone(),
            strict_system,
            input.clone(),
            STRICT_TEMPERATURE,
        )
        .await
        {
            Ok(output) => {
                self.metrics.counter("stage_completed", 1, &labels);
                return Ok(output);
            }
            Err(err) => err,
        };

        warn!(stage = %stage, error = %strict_err, "strict stage call failed, retrying relaxed");
        self.metrics.counter("stage_retried", 1, &labels);

        match invoke_typed::<T>(
            self.inference.as_ref(),
            stage_name.clone(),
            relaxed_system,
            input,
            RELAXED_TEMPERATURE,
        )
        .await
        {
            Ok(output) => {
                self.metrics.counter("stage_completed", 1, &labels);
                Ok(output)
            }
            Err(relaxed_err) => Err(StageResult::failed(
                stage,
                format!("strict: {strict_err}; relaxed: {relaxed_err}"),
            )),
        }
    }

    /// Build the fallback candidate and record the mode switch.
    fn fallback_candidate(
        &self,
        digest: &ClusterDigest,
        stage_results: Vec<StageResult>,
        failed_stage: StageKind,
    ) -> OpportunityCandidate {
        let reason = format!("{failed_stage} failed twice");
        warn!(
            cluster_id = %digest.cluster_id,
            failed_stage = %failed_stage,
            "switching attempt to fallback mode"
        );
        self.events.emit(SystemEvent::SynthesisModeSwitched {
            cluster_id: digest.cluster_id,
            from: GenerationMode::Primary,
            to: GenerationMode::Fallback,
            reason,
        });
        self.metrics.counter("synthesis_fallback", 1, &[]);

        let summary = fallback::summarize(digest);
        OpportunityCandidate {
            id: Uuid::new_v4(),
            source_cluster_id: digest.cluster_id,
            title: summary.title,
            thesis: summary.thesis,
            stage_results,
            overall_confidence: summary.confidence,
            generation_mode: GenerationMode::Fallback,
            created_at: Utc::now(),
        }
    }
}

/// Primary confidence: the base floor plus the mean completed-stage
/// confidence scaled into the remaining headroom. Always at or above the
/// base, hence always above any fallback candidate.
fn primary_confidence(stage_results: &[StageResult]) -> f64 {
    let mean: f64 = stage_results
        .iter()
        .map(|r| r.confidence.clamp(0.0, 1.0))
        .sum::<f64>()
        / stage_results.len().max(1) as f64;
    (PRIMARY_CONFIDENCE_BASE + 0.45 * mean).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, HashMap, VecDeque};
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use ai_client::{InferenceError, InferenceRequest};
    use oppradar_common::{MemoryEventSink, NullMetricsSink, SignalKind, StageStatus};

    enum Behavior {
        Ok(serde_json::Value),
        Timeout,
        Unavailable,
        Hang,
    }

    /// Scripted inference: pops one behavior per call, keyed by stage.
    /// Stages with no script are unavailable (the cold-capability case).
    struct MockInference {
        behaviors: Mutex<HashMap<String, VecDeque<Behavior>>>,
        calls: Mutex<Vec<String>>,
    }

    impl MockInference {
        fn new() -> Self {
            Self {
                behaviors: Mutex::new(HashMap::new()),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn script(&self, stage: &str, behavior: Behavior) {
            self.behaviors
                .lock()
                .unwrap()
                .entry(stage.to_string())
                .or_default()
                .push_back(behavior);
        }

        fn calls_for(&self, stage: &str) -> usize {
            self.calls.lock().unwrap().iter().filter(|c| *c == stage).count()
        }
    }

    #[async_trait]
    impl InferenceClient for MockInference {
        async fn invoke(
            &self,
            request: &InferenceRequest,
        ) -> Result<serde_json::Value, InferenceError> {
            self.calls.lock().unwrap().push(request.stage.clone());
            let behavior = self
                .behaviors
                .lock()
                .unwrap()
                .get_mut(&request.stage)
                .and_then(|q| q.pop_front());
            match behavior {
                Some(Behavior::Ok(value)) => Ok(value),
                Some(Behavior::Timeout) => Err(InferenceError::Timeout { limit_secs: 60 }),
                Some(Behavior::Hang) => std::future::pending().await,
                Some(Behavior::Unavailable) | None => {
                    Err(InferenceError::Unavailable("capability offline".into()))
                }
            }
        }

        fn declared_timeout(&self) -> Duration {
            Duration::from_secs(60)
        }
    }

    fn research_json() -> serde_json::Value {
        serde_json::json!({
            "problem_statement": "exports fail at scale",
            "affected_segments": ["data teams"],
            "demand_evidence": ["multiple corroborated threads"],
            "confidence": 0.8
        })
    }

    fn competition_json() -> serde_json::Value {
        serde_json::json!({
            "competitors": [{"name": "BigCo", "approach": "batch exports", "gap": "no streaming"}],
            "whitespace": "streaming exports for large datasets",
            "confidence": 0.7
        })
    }

    fn synthesis_json() -> serde_json::Value {
        serde_json::json!({
            "title": "Streaming export pipeline",
            "thesis": "Data teams need exports that survive scale",
            "target_customer": "mid-market analytics teams",
            "differentiation": "chunked resumable exports",
            "risks": ["incumbent ships a fix"],
            "confidence": 0.75
        })
    }

    fn digest() -> ClusterDigest {
        let mut by_kind = BTreeMap::new();
        by_kind.insert(SignalKind::PainPoint, 5);
        ClusterDigest {
            cluster_id: Uuid::new_v4(),
            member_count: 5,
            density_score: 0.82,
            quality_mean: 0.75,
            engagement_mean: 55.0,
            by_kind,
            sample_titles: vec!["CSV export times out".to_string()],
            top_terms: vec!["csv".to_string(), "export".to_string()],
            first_seen: Utc::now(),
            last_updated: Utc::now(),
        }
    }

    fn orchestrator(
        inference: Arc<MockInference>,
        events: Arc<MemoryEventSink>,
        lock_timeout: Duration,
    ) -> Orchestrator {
        Orchestrator::new(
            inference,
            Arc::new(ClusterLocks::new(lock_timeout)),
            events,
            Arc::new(NullMetricsSink),
        )
    }

    #[tokio::test]
    async fn all_stages_complete_in_primary_mode() {
        let inference = Arc::new(MockInference::new());
        inference.script("market_research", Behavior::Ok(research_json()));
        inference.script("competitive_analysis", Behavior::Ok(competition_json()));
        inference.script("synthesis", Behavior::Ok(synthesis_json()));

        let events = Arc::new(MemoryEventSink::new());
        let orch = orchestrator(inference, events.clone(), Duration::from_secs(600));
        let candidate = orch.synthesize(digest()).await.unwrap();

        assert_eq!(candidate.generation_mode, GenerationMode::Primary);
        assert_eq!(candidate.stage_results.len(), 3);
        assert!(candidate
            .stage_results
            .iter()
            .all(|r| r.status == StageStatus::Completed));
        assert!(candidate.overall_confidence >= PRIMARY_CONFIDENCE_BASE);
        assert_eq!(candidate.title, "Streaming export pipeline");
        assert_eq!(events.count_of("synthesis_completed"), 1);
        assert_eq!(events.count_of("synthesis_mode_switched"), 0);
    }

    #[tokio::test]
    async fn relaxed_retry_recovers_a_failed_stage() {
        let inference = Arc::new(MockInference::new());
        inference.script("market_research", Behavior::Timeout);
        inference.script("market_research", Behavior::Ok(research_json()));
        inference.script("competitive_analysis", Behavior::Ok(competition_json()));
        inference.script("synthesis", Behavior::Ok(synthesis_json()));

        let events = Arc::new(MemoryEventSink::new());
        let orch = orchestrator(inference.clone(), events, Duration::from_secs(600));
        let candidate = orch.synthesize(digest()).await.unwrap();

        assert_eq!(candidate.generation_mode, GenerationMode::Primary);
        assert_eq!(inference.calls_for("market_research"), 2, "strict + relaxed");
    }

    #[tokio::test]
    async fn second_stage_double_failure_switches_whole_attempt_to_fallback() {
        let inference = Arc::new(MockInference::new());
        inference.script("market_research", Behavior::Ok(research_json()));
        inference.script("competitive_analysis", Behavior::Timeout);
        inference.script("competitive_analysis", Behavior::Timeout);

        let events = Arc::new(MemoryEventSink::new());
        let orch = orchestrator(inference.clone(), events.clone(), Duration::from_secs(600));
        let fallback = orch.synthesize(digest()).await.unwrap();

        assert_eq!(fallback.generation_mode, GenerationMode::Fallback);
        let statuses: Vec<StageStatus> =
            fallback.stage_results.iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![StageStatus::Completed, StageStatus::Failed, StageStatus::Skipped]
        );
        assert_eq!(events.count_of("synthesis_mode_switched"), 1);
        // Stage 3 was never invoked once the attempt switched modes.
        assert_eq!(inference.calls_for("synthesis"), 0);

        // An equivalent cluster through the primary path scores higher.
        let inference2 = Arc::new(MockInference::new());
        inference2.script("market_research", Behavior::Ok(research_json()));
        inference2.script("competitive_analysis", Behavior::Ok(competition_json()));
        inference2.script("synthesis", Behavior::Ok(synthesis_json()));
        let orch2 = orchestrator(inference2, Arc::new(MemoryEventSink::new()), Duration::from_secs(600));
        let primary = orch2.synthesize(digest()).await.unwrap();
        assert!(
            fallback.overall_confidence < primary.overall_confidence,
            "fallback {} must score below primary {}",
            fallback.overall_confidence,
            primary.overall_confidence
        );
    }

    #[tokio::test]
    async fn unavailable_capability_still_emits_exactly_one_fallback_candidate() {
        // No scripts at all: every call is Unavailable.
        let inference = Arc::new(MockInference::new());
        let events = Arc::new(MemoryEventSink::new());
        let orch = orchestrator(inference, events.clone(), Duration::from_secs(600));

        let candidate = orch.synthesize(digest()).await.unwrap();
        assert_eq!(candidate.generation_mode, GenerationMode::Fallback);
        let statuses: Vec<StageStatus> =
            candidate.stage_results.iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![StageStatus::Failed, StageStatus::Skipped, StageStatus::Skipped]
        );
        assert_eq!(events.count_of("synthesis_completed"), 1);
        assert!(!candidate.thesis.is_empty());
    }

    #[tokio::test]
    async fn concurrent_attempt_on_same_cluster_is_rejected() {
        let inference = Arc::new(MockInference::new());
        let events = Arc::new(MemoryEventSink::new());
        let locks = Arc::new(ClusterLocks::new(Duration::from_secs(600)));
        let orch = Orchestrator::new(inference, locks.clone(), events, Arc::new(NullMetricsSink));

        let d = digest();
        let _held = locks.try_acquire(d.cluster_id).expect("outer lock");
        let result = orch.synthesize(d).await;
        assert!(matches!(result, Err(SynthesisError::LockHeld)));
    }

    #[tokio::test]
    async fn wedged_inference_call_hits_the_hard_timeout() {
        let inference = Arc::new(MockInference::new());
        inference.script("market_research", Behavior::Hang);

        let events = Arc::new(MemoryEventSink::new());
        let orch = orchestrator(inference, events.clone(), Duration::from_millis(20));
        let d = digest();
        let cluster_id = d.cluster_id;
        let result = orch.synthesize(d).await;

        assert!(matches!(result, Err(SynthesisError::LockTimeout)));
        assert_eq!(events.count_of("synthesis_failed"), 1);

        // The lock was released: a retry on the same orchestrator acquires
        // it (and, with no scripts left, completes via fallback).
        let mut retry_digest = digest();
        retry_digest.cluster_id = cluster_id;
        assert!(orch.synthesize(retry_digest).await.is_ok());
    }
}
