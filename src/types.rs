//! Core data model shared across modules
//!
//! A *prompt identity* is an opaque caller-chosen name ("code_review",
//! "support_triage"). Everything else hangs off it: an append-only
//! feedback log, a numbered chain of prompt versions, and an audit log
//! of training runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Row id of a feedback event; assigned by the store, strictly increasing
/// per database.
pub type EventId = i64;

/// Kind of feedback signal attached to a prompt identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackKind {
    /// Numeric quality rating in [0.0, 1.0].
    Rating,
    /// The prompt produced a failure; detail describes it.
    Error,
    /// A successful outcome worth learning from.
    SuccessMetric,
    /// Free-text improvement suggestion from a user.
    Suggestion,
}

impl FeedbackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackKind::Rating => "rating",
            FeedbackKind::Error => "error",
            FeedbackKind::SuccessMetric => "success_metric",
            FeedbackKind::Suggestion => "suggestion",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "rating" => Some(FeedbackKind::Rating),
            "error" => Some(FeedbackKind::Error),
            "success_metric" | "success" => Some(FeedbackKind::SuccessMetric),
            "suggestion" => Some(FeedbackKind::Suggestion),
            _ => None,
        }
    }
}

impl std::fmt::Display for FeedbackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// New feedback to record. The store assigns the id and timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewFeedback {
    pub kind: FeedbackKind,
    /// Only meaningful for [`FeedbackKind::Rating`] events.
    pub rating: Option<f64>,
    /// Human-readable description of what happened.
    pub detail: String,
    /// Optional structured context (the interaction, tool output, etc).
    pub payload: Option<serde_json::Value>,
}

impl NewFeedback {
    pub fn rating(value: f64, detail: impl Into<String>) -> Self {
        Self {
            kind: FeedbackKind::Rating,
            rating: Some(value),
            detail: detail.into(),
            payload: None,
        }
    }

    pub fn error(detail: impl Into<String>) -> Self {
        Self {
            kind: FeedbackKind::Error,
            rating: None,
            detail: detail.into(),
            payload: None,
        }
    }

    pub fn success(detail: impl Into<String>) -> Self {
        Self {
            kind: FeedbackKind::SuccessMetric,
            rating: None,
            detail: detail.into(),
            payload: None,
        }
    }

    pub fn suggestion(detail: impl Into<String>) -> Self {
        Self {
            kind: FeedbackKind::Suggestion,
            rating: None,
            detail: detail.into(),
            payload: None,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// A recorded feedback event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackEvent {
    pub id: EventId,
    pub identity: String,
    pub kind: FeedbackKind,
    pub rating: Option<f64>,
    pub detail: String,
    pub payload: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Lifecycle status of a prompt version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionStatus {
    /// Produced by training, awaiting a deployment decision.
    Candidate,
    /// The version currently served for its identity.
    Deployed,
    /// Explicitly declined; kept for the audit trail.
    Rejected,
    /// Was deployed once, later replaced.
    Retired,
}

impl VersionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VersionStatus::Candidate => "candidate",
            VersionStatus::Deployed => "deployed",
            VersionStatus::Rejected => "rejected",
            VersionStatus::Retired => "retired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "candidate" => Some(VersionStatus::Candidate),
            "deployed" => Some(VersionStatus::Deployed),
            "rejected" => Some(VersionStatus::Rejected),
            "retired" => Some(VersionStatus::Retired),
            _ => None,
        }
    }
}

impl std::fmt::Display for VersionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Training strategy that produced a version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainingStrategy {
    /// Human-authored, not trained. Version 1 of every identity.
    None,
    /// Embed the best-rated interactions as worked examples.
    FewShot,
    /// Contrast recurring language in positive vs negative feedback.
    Reinforcement,
    /// Ask the generation model to rewrite the prompt.
    MetaPrompt,
    /// Harden the prompt against recorded failure patterns.
    Adversarial,
}

impl TrainingStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrainingStrategy::None => "none",
            TrainingStrategy::FewShot => "few_shot",
            TrainingStrategy::Reinforcement => "reinforcement",
            TrainingStrategy::MetaPrompt => "meta_prompt",
            TrainingStrategy::Adversarial => "adversarial",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "none" => Some(TrainingStrategy::None),
            "few_shot" | "few-shot" => Some(TrainingStrategy::FewShot),
            "reinforcement" => Some(TrainingStrategy::Reinforcement),
            "meta_prompt" | "meta-prompt" => Some(TrainingStrategy::MetaPrompt),
            "adversarial" => Some(TrainingStrategy::Adversarial),
            _ => None,
        }
    }
}

impl std::fmt::Display for TrainingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Scores produced by the evaluation battery for one prompt version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    /// Fraction of test runs that completed successfully, in [0.0, 1.0].
    pub success_rate: f64,
    /// Median response latency across test runs, milliseconds.
    pub latency_p50: f64,
    /// 95th-percentile response latency, milliseconds.
    pub latency_p95: f64,
    pub coherence: f64,
    pub relevance: f64,
    pub safety: f64,
    /// Candidate composite minus baseline composite. `None` when no
    /// baseline was evaluated.
    pub improvement_over_baseline: Option<f64>,
}

/// A numbered, immutable snapshot of a prompt body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptVersion {
    pub identity: String,
    /// 1-based, gapless per identity.
    pub version: u32,
    pub body: String,
    pub status: VersionStatus,
    pub strategy: TrainingStrategy,
    /// Latest evaluation scores, once the version has been evaluated.
    pub metrics: Option<EvaluationResult>,
    pub created_at: DateTime<Utc>,
    /// Set when the version was last deployed; survives retirement so
    /// rollback can find the version deployed immediately before the
    /// current one.
    pub deployed_at: Option<DateTime<Utc>>,
}

/// Final outcome of a training run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunDisposition {
    /// Candidate passed the deployment policy and was deployed.
    Promoted,
    /// Candidate was kept for manual review.
    Held,
    /// Candidate was auto-rejected.
    Discarded,
    /// Training or evaluation itself failed.
    Failed,
}

impl RunDisposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunDisposition::Promoted => "promoted",
            RunDisposition::Held => "held",
            RunDisposition::Discarded => "discarded",
            RunDisposition::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "promoted" => Some(RunDisposition::Promoted),
            "held" => Some(RunDisposition::Held),
            "discarded" => Some(RunDisposition::Discarded),
            "failed" => Some(RunDisposition::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for RunDisposition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Audit record of one training attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingRun {
    pub id: String,
    pub identity: String,
    pub strategy: TrainingStrategy,
    /// Lowest feedback event id in the consumed window.
    pub window_start_id: Option<EventId>,
    /// Highest feedback event id in the consumed window; the next run
    /// starts after this watermark.
    pub window_end_id: Option<EventId>,
    pub feedback_count: u32,
    /// Version number of the candidate this run produced, if it got
    /// that far.
    pub candidate_version: Option<u32>,
    pub evaluation: Option<EvaluationResult>,
    /// `None` while the run is still in progress.
    pub disposition: Option<RunDisposition>,
    pub reason: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Aggregate view of recorded feedback for one identity.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FeedbackSummary {
    pub count: u64,
    pub rating_count: u64,
    pub error_count: u64,
    pub success_count: u64,
    pub suggestion_count: u64,
    /// `None` when no rating events exist.
    pub avg_rating: Option<f64>,
    pub error_rate: f64,
    pub success_rate: f64,
}

/// Portable snapshot of an identity's full version history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptExport {
    pub identity: String,
    pub exported_at: DateTime<Utc>,
    pub versions: Vec<PromptVersion>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trip() {
        for kind in [
            FeedbackKind::Rating,
            FeedbackKind::Error,
            FeedbackKind::SuccessMetric,
            FeedbackKind::Suggestion,
        ] {
            assert_eq!(FeedbackKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(FeedbackKind::parse("bogus"), None);
    }

    #[test]
    fn test_strategy_round_trip() {
        for strategy in [
            TrainingStrategy::None,
            TrainingStrategy::FewShot,
            TrainingStrategy::Reinforcement,
            TrainingStrategy::MetaPrompt,
            TrainingStrategy::Adversarial,
        ] {
            assert_eq!(TrainingStrategy::parse(strategy.as_str()), Some(strategy));
        }
        assert_eq!(
            TrainingStrategy::parse("few-shot"),
            Some(TrainingStrategy::FewShot)
        );
    }

    #[test]
    fn test_status_display() {
        assert_eq!(VersionStatus::Deployed.to_string(), "deployed");
        assert_eq!(RunDisposition::Promoted.to_string(), "promoted");
    }

    #[test]
    fn test_new_feedback_constructors() {
        let fb = NewFeedback::rating(0.9, "great answer");
        assert_eq!(fb.kind, FeedbackKind::Rating);
        assert_eq!(fb.rating, Some(0.9));

        let fb = NewFeedback::error("timeout").with_payload(serde_json::json!({"ms": 30000}));
        assert_eq!(fb.kind, FeedbackKind::Error);
        assert!(fb.rating.is_none());
        assert!(fb.payload.is_some());
    }
}
