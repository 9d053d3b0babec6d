//! Stage output schemas and prompt construction.
//!
//! Each stage declares a schema the inference capability must satisfy; the
//! structured input is the cluster digest plus the outputs of earlier
//! stages. The relaxed prompt variant is the one-retry strategy after a
//! strict call fails.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use oppradar_common::ClusterDigest;

// =============================================================================
// Stage Outputs
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MarketResearchOutput {
    /// One-paragraph statement of the underlying problem the cluster points at.
    pub problem_statement: String,
    /// Customer segments the signals indicate are affected.
    pub affected_segments: Vec<String>,
    /// Concrete demand evidence drawn from the supplied signals.
    pub demand_evidence: Vec<String>,
    /// Stage confidence in [0, 1].
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Competitor {
    pub name: String,
    pub approach: String,
    /// What this competitor leaves unaddressed.
    pub gap: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CompetitiveAnalysisOutput {
    pub competitors: Vec<Competitor>,
    /// The open space none of the competitors covers.
    pub whitespace: String,
    /// Stage confidence in [0, 1].
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SynthesisOutput {
    /// Short opportunity title.
    pub title: String,
    /// The opportunity thesis: who, what pain, why now.
    pub thesis: String,
    pub target_customer: String,
    pub differentiation: String,
    pub risks: Vec<String>,
    /// Stage confidence in [0, 1].
    pub confidence: f64,
}

// =============================================================================
// Prompts
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptStrategy {
    Strict,
    Relaxed,
}

const RELAXED_SUFFIX: &str = "\nIf the signals are thin or ambiguous, still produce your best \
estimate for every field and express the uncertainty through a lower confidence value. Do not \
leave fields empty.";

pub fn market_research_system(strategy: PromptStrategy) -> String {
    let mut system = String::from(
        "You are a market researcher. You receive a cluster of related market signals \
(forum complaints, issue reports, product launches, new company listings) gathered across \
sources. Identify the underlying problem, who it affects, and what evidence of demand the \
signals carry. Ground every claim in the supplied signals; never invent sources.",
    );
    if strategy == PromptStrategy::Relaxed {
        system.push_str(RELAXED_SUFFIX);
    }
    system
}

pub fn competitive_analysis_system(strategy: PromptStrategy) -> String {
    let mut system = String::from(
        "You are a competitive analyst. Given a researched market problem and the signal \
cluster behind it, map the existing solutions: who addresses this today, how, and what gap \
each leaves. Then state the whitespace: the space no listed competitor covers.",
    );
    if strategy == PromptStrategy::Relaxed {
        system.push_str(RELAXED_SUFFIX);
    }
    system
}

pub fn synthesis_system(strategy: PromptStrategy) -> String {
    let mut system = String::from(
        "You are an opportunity synthesizer. Combine the market research and competitive \
analysis into one structured opportunity: a title, a thesis (who, what pain, why now), the \
target customer, the differentiation, and the main risks.",
    );
    if strategy == PromptStrategy::Relaxed {
        system.push_str(RELAXED_SUFFIX);
    }
    system
}

/// The structured input for stage 1: the digest alone.
pub fn market_research_input(digest: &ClusterDigest) -> serde_json::Value {
    serde_json::json!({ "cluster": digest })
}

/// Stage 2 sees the digest plus stage 1's output.
pub fn competitive_analysis_input(
    digest: &ClusterDigest,
    research: &MarketResearchOutput,
) -> serde_json::Value {
    serde_json::json!({ "cluster": digest, "market_research": research })
}

/// Stage 3 sees everything before it.
pub fn synthesis_input(
    digest: &ClusterDigest,
    research: &MarketResearchOutput,
    competition: &CompetitiveAnalysisOutput,
) -> serde_json::Value {
    serde_json::json!({
        "cluster": digest,
        "market_research": research,
        "competitive_analysis": competition,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeMap;
    use uuid::Uuid;

    fn digest() -> ClusterDigest {
        ClusterDigest {
            cluster_id: Uuid::new_v4(),
            member_count: 5,
            density_score: 0.8,
            quality_mean: 0.7,
            engagement_mean: 55.0,
            by_kind: BTreeMap::new(),
            sample_titles: vec!["CSV export times out".to_string()],
            top_terms: vec!["export".to_string(), "csv".to_string()],
            first_seen: Utc::now(),
            last_updated: Utc::now(),
        }
    }

    #[test]
    fn relaxed_prompts_differ_from_strict() {
        for (strict, relaxed) in [
            (
                market_research_system(PromptStrategy::Strict),
                market_research_system(PromptStrategy::Relaxed),
            ),
            (
                competitive_analysis_system(PromptStrategy::Strict),
                competitive_analysis_system(PromptStrategy::Relaxed),
            ),
            (
                synthesis_system(PromptStrategy::Strict),
                synthesis_system(PromptStrategy::Relaxed),
            ),
        ] {
            assert!(relaxed.starts_with(&strict));
            assert!(relaxed.contains("best"));
        }
    }

    #[test]
    fn stage_inputs_accumulate_prior_outputs() {
        let d = digest();
        let research = MarketResearchOutput {
            problem_statement: "exports fail at scale".to_string(),
            affected_segments: vec!["data teams".to_string()],
            demand_evidence: vec!["multiple forum threads".to_string()],
            confidence: 0.8,
        };
        let competition = CompetitiveAnalysisOutput {
            competitors: vec![],
            whitespace: "large-dataset exports".to_string(),
            confidence: 0.6,
        };

        let stage1 = market_research_input(&d);
        assert!(stage1.get("market_research").is_none());

        let stage2 = competitive_analysis_input(&d, &research);
        assert_eq!(stage2["market_research"]["confidence"], 0.8);

        let stage3 = synthesis_input(&d, &research, &competition);
        assert_eq!(stage3["competitive_analysis"]["confidence"], 0.6);
        assert_eq!(stage3["cluster"]["member_count"], 5);
    }

    #[test]
    fn outputs_roundtrip_through_schema_types() {
        let raw = serde_json::json!({
            "title": "Bulk export pipeline",
            "thesis": "Data teams need exports that survive scale",
            "target_customer": "mid-market analytics teams",
            "differentiation": "streaming chunked exports",
            "risks": ["incumbent fixes the bug"],
            "confidence": 0.72
        });
        let out: SynthesisOutput = serde_json::from_value(raw).unwrap();
        assert_eq!(out.title, "Bulk export pipeline");
        assert!((out.confidence - 0.72).abs() < f64::EPSILON);
    }
}
