//! Few-shot training
//!
//! Selects the highest-rated feedback in the window, drops
//! near-duplicates, and appends the survivors to the current prompt as
//! worked examples.

use tracing::debug;

use super::trainer::{similar, TrainerConfig};
use crate::error::{Result, TrainError};
use crate::types::{FeedbackEvent, FeedbackKind, TrainingStrategy};

pub(crate) fn synthesize(
    config: &TrainerConfig,
    current_body: &str,
    window: &[FeedbackEvent],
) -> Result<String> {
    let mut rated: Vec<&FeedbackEvent> = window
        .iter()
        .filter(|e| {
            e.kind == FeedbackKind::Rating
                && e.rating.map_or(false, |r| r >= config.few_shot_rating_floor)
                && !e.detail.trim().is_empty()
        })
        .collect();

    if rated.is_empty() {
        return Err(TrainError::InsufficientFeedback {
            strategy: TrainingStrategy::FewShot,
            reason: format!(
                "no feedback rated at or above {:.1} in the window",
                config.few_shot_rating_floor
            ),
        });
    }

    rated.sort_by(|a, b| {
        b.rating
            .partial_cmp(&a.rating)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut kept: Vec<&FeedbackEvent> = Vec::new();
    for example in rated {
        if kept
            .iter()
            .any(|k| similar(&k.detail, &example.detail, config.similarity_threshold))
        {
            continue;
        }
        kept.push(example);
        if kept.len() >= config.few_shot_examples {
            break;
        }
    }

    debug!("Few-shot training kept {} example(s)", kept.len());

    let mut body = String::with_capacity(current_body.len() + 512);
    body.push_str(current_body.trim_end());
    body.push_str("\n\n## Reference examples\n\n");
    body.push_str(
        "These interactions received the highest ratings. Match their tone, \
         structure, and level of detail.\n",
    );
    for (i, example) in kept.iter().enumerate() {
        body.push_str(&format!("\n{}. {}\n", i + 1, example.detail.trim()));
    }

    Ok(body)
}
