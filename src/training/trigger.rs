//! Trigger decisions for automatic retraining
//!
//! The decision is a pure function of a feedback snapshot and the
//! configured thresholds. It reads nothing and writes nothing, so the
//! loop can evaluate it as often as it likes and tests can probe it
//! with synthetic snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{FeedbackEvent, FeedbackKind, TrainingStrategy};

/// Strategy selection prefers adversarial above this error rate.
const ADVERSARIAL_ERROR_RATE: f64 = 0.30;
/// Reinforcement kicks in below this average rating (when adversarial
/// did not already claim the run).
const REINFORCEMENT_MAX_RATING: f64 = 0.50;

/// Thresholds that gate automatic training.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerConfig {
    /// Minimum unconsumed feedback events before training is considered.
    #[serde(default = "default_min_feedback")]
    pub min_feedback_required: u64,

    /// Minimum hours between training runs for one identity, counted
    /// from the previous run's start regardless of its outcome.
    #[serde(default = "default_interval_hours")]
    pub min_training_interval_hours: f64,

    /// Error-rate above which training fires.
    #[serde(default = "default_high_error")]
    pub high_error_threshold: f64,

    /// Average rating below which training fires.
    #[serde(default = "default_low_rating")]
    pub low_rating_threshold: f64,

    /// Unconsumed event count at which training fires on volume alone.
    #[serde(default = "default_volume")]
    pub volume_threshold: u64,

    /// Suggestion count that steers strategy selection to meta-prompt.
    #[serde(default = "default_suggestions")]
    pub suggestion_threshold: u64,
}

fn default_min_feedback() -> u64 {
    10
}

fn default_interval_hours() -> f64 {
    24.0
}

fn default_high_error() -> f64 {
    0.2
}

fn default_low_rating() -> f64 {
    0.6
}

fn default_volume() -> u64 {
    50
}

fn default_suggestions() -> u64 {
    5
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            min_feedback_required: default_min_feedback(),
            min_training_interval_hours: default_interval_hours(),
            high_error_threshold: default_high_error(),
            low_rating_threshold: default_low_rating(),
            volume_threshold: default_volume(),
            suggestion_threshold: default_suggestions(),
        }
    }
}

/// Aggregated view of one identity's unconsumed feedback window.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedbackSnapshot {
    pub feedback_count: u64,
    /// Fraction of window events that are errors.
    pub error_rate: f64,
    /// `None` when the window has no rating events; the low-rating
    /// condition then cannot hold.
    pub avg_rating: Option<f64>,
    pub suggestion_count: u64,
    /// Hours since the last training run started. `None` means the
    /// identity has never been trained, which satisfies the interval
    /// gate unconditionally.
    pub hours_since_last_run: Option<f64>,
}

/// What the trigger engine concluded for one identity.
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerDecision {
    Fire {
        strategy: TrainingStrategy,
        reason: String,
    },
    Skip {
        reason: String,
    },
}

/// Decide whether training should fire for this snapshot.
///
/// Both gates (enough feedback, enough time since the last run) must
/// pass, and then at least one trigger condition (high error rate, low
/// average rating, or sheer volume) must hold.
pub fn decide(config: &TriggerConfig, snapshot: &FeedbackSnapshot) -> TriggerDecision {
    if snapshot.feedback_count < config.min_feedback_required {
        return TriggerDecision::Skip {
            reason: format!(
                "{} of {} required feedback events",
                snapshot.feedback_count, config.min_feedback_required
            ),
        };
    }

    if let Some(hours) = snapshot.hours_since_last_run {
        if hours < config.min_training_interval_hours {
            return TriggerDecision::Skip {
                reason: format!(
                    "last run {:.1}h ago, interval is {:.0}h",
                    hours, config.min_training_interval_hours
                ),
            };
        }
    }

    let mut conditions = Vec::new();
    if snapshot.error_rate > config.high_error_threshold {
        conditions.push(format!(
            "error rate {:.2} > {:.2}",
            snapshot.error_rate, config.high_error_threshold
        ));
    }
    if let Some(avg) = snapshot.avg_rating {
        if avg < config.low_rating_threshold {
            conditions.push(format!(
                "avg rating {:.2} < {:.2}",
                avg, config.low_rating_threshold
            ));
        }
    }
    if snapshot.feedback_count >= config.volume_threshold {
        conditions.push(format!(
            "{} events >= volume threshold {}",
            snapshot.feedback_count, config.volume_threshold
        ));
    }

    if conditions.is_empty() {
        TriggerDecision::Skip {
            reason: "no trigger condition met".to_string(),
        }
    } else {
        TriggerDecision::Fire {
            strategy: choose_strategy(config, snapshot),
            reason: conditions.join(", "),
        }
    }
}

/// Pick the strategy for a firing run. Priority order: heavy errors
/// beat low ratings beat accumulated suggestions; few-shot is the
/// default when nothing stands out.
pub fn choose_strategy(config: &TriggerConfig, snapshot: &FeedbackSnapshot) -> TrainingStrategy {
    if snapshot.error_rate > ADVERSARIAL_ERROR_RATE {
        TrainingStrategy::Adversarial
    } else if snapshot
        .avg_rating
        .map_or(false, |avg| avg < REINFORCEMENT_MAX_RATING)
    {
        TrainingStrategy::Reinforcement
    } else if snapshot.suggestion_count >= config.suggestion_threshold {
        TrainingStrategy::MetaPrompt
    } else {
        TrainingStrategy::FewShot
    }
}

/// Fold a feedback window into the snapshot the trigger consumes.
pub fn snapshot_from_events(
    events: &[FeedbackEvent],
    last_run_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> FeedbackSnapshot {
    let mut rating_sum = 0.0;
    let mut rating_count = 0u64;
    let mut error_count = 0u64;
    let mut suggestion_count = 0u64;

    for event in events {
        match event.kind {
            FeedbackKind::Rating => {
                if let Some(r) = event.rating {
                    rating_sum += r;
                    rating_count += 1;
                }
            }
            FeedbackKind::Error => error_count += 1,
            FeedbackKind::Suggestion => suggestion_count += 1,
            FeedbackKind::SuccessMetric => {}
        }
    }

    let feedback_count = events.len() as u64;
    FeedbackSnapshot {
        feedback_count,
        error_rate: if feedback_count == 0 {
            0.0
        } else {
            error_count as f64 / feedback_count as f64
        },
        avg_rating: (rating_count > 0).then(|| rating_sum / rating_count as f64),
        suggestion_count,
        hours_since_last_run: last_run_at.map(|t| (now - t).num_seconds() as f64 / 3600.0),
    }
}
