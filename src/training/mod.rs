//! Prompt Training Pipeline
//!
//! Decides when a prompt deserves retraining, picks a strategy from the
//! shape of its feedback, and synthesizes the candidate body. The four
//! strategies live in their own modules; `trainer` dispatches between
//! them and `trigger` holds the pure decision logic.

pub mod adversarial;
pub mod few_shot;
pub mod meta_prompt;
pub mod reinforcement;
pub mod scheduler;
pub mod trainer;
pub mod trigger;

pub use scheduler::{ScheduleConfig, TrainingLoop};
pub use trainer::{Trainer, TrainerConfig};
pub use trigger::{FeedbackSnapshot, TriggerConfig, TriggerDecision};
