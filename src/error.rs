//! Error types for the training pipeline

use crate::types::TrainingStrategy;

/// Errors surfaced by the stores, trainer, evaluator, and service.
#[derive(Debug, thiserror::Error)]
pub enum TrainError {
    /// Malformed input rejected before anything is written.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A strategy's minimum applicable-feedback floor was not met.
    #[error("insufficient feedback for {strategy} training: {reason}")]
    InsufficientFeedback {
        strategy: TrainingStrategy,
        reason: String,
    },

    /// The evaluation battery could not produce a result.
    #[error("evaluation failed: {0}")]
    Evaluation(String),

    /// A referenced record does not exist.
    #[error("{kind} not found: {key}")]
    NotFound { kind: &'static str, key: String },

    /// Rollback was requested but nothing was deployed before the
    /// current version.
    #[error("no prior deployed version for prompt '{0}'")]
    NoPriorVersion(String),

    /// The text-generation capability returned an unusable answer.
    #[error("text generation failed: {0}")]
    Generation(String),

    /// Transport-level failure talking to the generation API.
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl TrainError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn not_found(kind: &'static str, key: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            key: key.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, TrainError>;
