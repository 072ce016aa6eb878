//! Strategy dispatch and shared text helpers
//!
//! Three of the four strategies are deterministic text synthesis over
//! the feedback window; only meta-prompt calls out to the generation
//! model. Every strategy returns a complete replacement prompt body,
//! never a diff.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use super::{adversarial, few_shot, meta_prompt, reinforcement};
use crate::error::{Result, TrainError};
use crate::generation::TextGenerator;
use crate::types::{FeedbackEvent, PromptVersion, TrainingStrategy};

/// Tuning for the training strategies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainerConfig {
    /// How many worked examples few-shot training embeds.
    #[serde(default = "default_few_shot_examples")]
    pub few_shot_examples: usize,

    /// Minimum rating for an event to qualify as a few-shot example.
    #[serde(default = "default_few_shot_floor")]
    pub few_shot_rating_floor: f64,

    /// Rating at or above which an event counts as positive for
    /// reinforcement.
    #[serde(default = "default_positive_floor")]
    pub positive_rating_floor: f64,

    /// Rating at or below which an event counts as negative. Error
    /// events are always negative.
    #[serde(default = "default_negative_ceiling")]
    pub negative_rating_ceiling: f64,

    /// Word-overlap ratio above which two feedback details are treated
    /// as near-duplicates.
    #[serde(default = "default_similarity")]
    pub similarity_threshold: f64,
}

fn default_few_shot_examples() -> usize {
    5
}

fn default_few_shot_floor() -> f64 {
    0.8
}

fn default_positive_floor() -> f64 {
    0.7
}

fn default_negative_ceiling() -> f64 {
    0.3
}

fn default_similarity() -> f64 {
    0.7
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            few_shot_examples: default_few_shot_examples(),
            few_shot_rating_floor: default_few_shot_floor(),
            positive_rating_floor: default_positive_floor(),
            negative_rating_ceiling: default_negative_ceiling(),
            similarity_threshold: default_similarity(),
        }
    }
}

/// Runs a training strategy over a feedback window.
pub struct Trainer {
    config: TrainerConfig,
    generator: Arc<dyn TextGenerator>,
}

impl Trainer {
    pub fn new(config: TrainerConfig, generator: Arc<dyn TextGenerator>) -> Self {
        Self { config, generator }
    }

    /// Produce a new complete prompt body from the current one and the
    /// feedback window.
    pub async fn train(
        &self,
        current: &PromptVersion,
        window: &[FeedbackEvent],
        strategy: TrainingStrategy,
    ) -> Result<String> {
        debug!(
            "Training '{}' v{} with {} over {} events",
            current.identity,
            current.version,
            strategy,
            window.len()
        );

        match strategy {
            TrainingStrategy::None => Err(TrainError::invalid(
                "strategy 'none' marks human-authored versions and cannot train",
            )),
            TrainingStrategy::FewShot => {
                few_shot::synthesize(&self.config, &current.body, window)
            }
            TrainingStrategy::Reinforcement => {
                reinforcement::synthesize(&self.config, &current.body, window)
            }
            TrainingStrategy::MetaPrompt => {
                meta_prompt::synthesize(self.generator.as_ref(), &current.body, window).await
            }
            TrainingStrategy::Adversarial => adversarial::synthesize(&current.body, window),
        }
    }
}

const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "that", "this", "with", "was", "are", "but", "not", "you", "have",
    "has", "had", "its", "when", "then", "than", "were", "been", "from", "into", "your",
    "their", "what", "which", "would", "could", "should", "about", "there", "here", "all",
    "any", "some", "can", "did", "does", "just", "more", "most", "other", "over", "such",
    "only", "same", "very", "too",
];

/// Lowercased words with surrounding punctuation stripped.
pub(crate) fn tokenize(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|w| !w.is_empty())
        .collect()
}

/// Content-bearing words: stop words and very short tokens dropped.
pub(crate) fn significant_words(text: &str) -> Vec<String> {
    tokenize(text)
        .into_iter()
        .filter(|w| w.len() >= 3 && !STOP_WORDS.contains(&w.as_str()))
        .collect()
}

/// Word-overlap similarity check for near-duplicate feedback details.
pub(crate) fn similar(a: &str, b: &str, threshold: f64) -> bool {
    let a_words: HashSet<String> = tokenize(a).into_iter().collect();
    let b_words: HashSet<String> = tokenize(b).into_iter().collect();
    if a_words.is_empty() || b_words.is_empty() {
        return a.trim() == b.trim();
    }
    let intersection = a_words.intersection(&b_words).count() as f64;
    let union = a_words.union(&b_words).count() as f64;
    intersection / union > threshold
}
