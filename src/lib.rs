//! Prompt Forge - Automatic Prompt Training Library
//!
//! Closes the loop between prompt performance and prompt content:
//! - Feedback pipeline collecting ratings, errors, and suggestions per prompt
//! - Versioned prompt store with deploy, rollback, and audit history
//! - Trigger loop that decides when a prompt has earned retraining
//! - Four training strategies (few-shot, reinforcement, meta-prompt, adversarial)
//! - Evaluation harness gating deployment behind quality thresholds
//!
//! # Example
//!
//! ```ignore
//! use prompt_forge::{Config, Database, TrainingService};
//! use prompt_forge::generation::HttpTextGenerator;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let db = Database::open(&config.storage.resolve_db_path()).await?;
//!     let generator = Arc::new(HttpTextGenerator::from_config(&config.generation)?);
//!     let service = TrainingService::new(config, &db, generator);
//!
//!     let prompt = service.active_prompt("support-triage").await?;
//!     println!("{}", prompt);
//!     Ok(())
//! }
//! ```

// Core modules
pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod types;

// Pipeline modules
pub mod audit;
pub mod deploy;
pub mod evaluation;
pub mod feedback;
pub mod generation;
pub mod service;
pub mod training;
pub mod version;

// Re-export commonly used types for convenience
pub use audit::RunLog;
pub use config::Config;
pub use db::Database;
pub use deploy::{DeployDecision, DeploymentPolicy};
pub use error::{Result, TrainError};
pub use evaluation::Evaluator;
pub use feedback::FeedbackStore;
pub use generation::{HttpTextGenerator, TextGenerator};
pub use service::{TickSummary, TrainingService};
pub use training::{Trainer, TrainingLoop};
pub use types::{
    FeedbackEvent, FeedbackKind, NewFeedback, PromptVersion, TrainingRun, TrainingStrategy,
    VersionStatus,
};
pub use version::VersionStore;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Get the library info
pub fn info() -> String {
    format!("{} v{} - Automatic Prompt Training Library", NAME, VERSION)
}

/// Truncate a string to `max_len` characters, appending "..." when
/// anything was cut. Operates on characters, not bytes, so multibyte
/// input never splits mid-codepoint.
pub fn truncate_safe(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        return s.to_string();
    }
    let keep = max_len.saturating_sub(3);
    let mut out: String = s.chars().take(keep).collect();
    out.push_str("...");
    out
}
