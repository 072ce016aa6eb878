//! Reinforcement training
//!
//! Splits the window into positive and negative signals, finds language
//! that recurs on only one side, and rewrites the prompt to lean into
//! the positive-only patterns and countermand the negative-only ones.

use std::collections::HashMap;
use tracing::debug;

use super::trainer::{significant_words, TrainerConfig};
use crate::error::{Result, TrainError};
use crate::types::{FeedbackEvent, FeedbackKind, TrainingStrategy};

pub(crate) fn synthesize(
    config: &TrainerConfig,
    current_body: &str,
    window: &[FeedbackEvent],
) -> Result<String> {
    let positives: Vec<&FeedbackEvent> = window
        .iter()
        .filter(|e| {
            e.kind == FeedbackKind::Rating
                && e.rating.map_or(false, |r| r >= config.positive_rating_floor)
        })
        .collect();
    let negatives: Vec<&FeedbackEvent> = window
        .iter()
        .filter(|e| match e.kind {
            FeedbackKind::Error => true,
            FeedbackKind::Rating => e
                .rating
                .map_or(false, |r| r <= config.negative_rating_ceiling),
            _ => false,
        })
        .collect();

    if positives.is_empty() || negatives.is_empty() {
        return Err(TrainError::InsufficientFeedback {
            strategy: TrainingStrategy::Reinforcement,
            reason: format!(
                "needs at least one positive and one negative event ({} positive, {} negative)",
                positives.len(),
                negatives.len()
            ),
        });
    }

    let positive_terms = recurring_terms(&positives);
    let negative_terms = recurring_terms(&negatives);
    let reinforce = contrast(&positive_terms, &negative_terms);
    let avoid = contrast(&negative_terms, &positive_terms);

    debug!(
        "Reinforcement training: {} positive / {} negative events, {} reinforce / {} avoid terms",
        positives.len(),
        negatives.len(),
        reinforce.len(),
        avoid.len()
    );

    let mut body = String::with_capacity(current_body.len() + 512);
    body.push_str(current_body.trim_end());
    body.push_str("\n\n## Outcome guidance\n\n");
    body.push_str(&format!(
        "Recent feedback includes {} positive and {} negative signals.\n",
        positives.len(),
        negatives.len()
    ));
    if !reinforce.is_empty() {
        body.push_str(&format!(
            "Responses that worked well featured: {}. Lean into these.\n",
            reinforce.join(", ")
        ));
    }
    if !avoid.is_empty() {
        body.push_str(&format!(
            "Responses that failed or rated poorly featured: {}. Avoid these patterns.\n",
            avoid.join(", ")
        ));
    }
    if reinforce.is_empty() && avoid.is_empty() {
        body.push_str(
            "Prioritize the approach of the highly rated responses over anything \
             resembling the recorded failures.\n",
        );
    }

    Ok(body)
}

/// Count significant words across details; keep only terms that recur
/// (with a lower bar for tiny event sets).
fn recurring_terms(events: &[&FeedbackEvent]) -> HashMap<String, usize> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for event in events {
        for word in significant_words(&event.detail) {
            *counts.entry(word).or_insert(0) += 1;
        }
    }
    let min_count = if events.len() >= 3 { 2 } else { 1 };
    counts.retain(|_, c| *c >= min_count);
    counts
}

/// Terms in `own` that never appear in `other`, strongest first.
fn contrast(own: &HashMap<String, usize>, other: &HashMap<String, usize>) -> Vec<String> {
    let mut terms: Vec<(&String, &usize)> = own
        .iter()
        .filter(|(word, _)| !other.contains_key(*word))
        .collect();
    terms.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));
    terms.into_iter().take(8).map(|(w, _)| w.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NewFeedback;
    use chrono::Utc;

    fn event(id: i64, fb: NewFeedback) -> FeedbackEvent {
        FeedbackEvent {
            id,
            identity: "helper".into(),
            kind: fb.kind,
            rating: fb.rating,
            detail: fb.detail,
            payload: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_needs_both_sides() {
        let config = TrainerConfig::default();
        let only_positive = vec![event(1, NewFeedback::rating(0.9, "nice"))];
        let err = synthesize(&config, "Base.", &only_positive).unwrap_err();
        assert!(matches!(
            err,
            TrainError::InsufficientFeedback {
                strategy: TrainingStrategy::Reinforcement,
                ..
            }
        ));

        let only_negative = vec![event(1, NewFeedback::error("broke"))];
        assert!(synthesize(&config, "Base.", &only_negative).is_err());
    }

    #[test]
    fn test_errors_count_as_negative() {
        let config = TrainerConfig::default();
        let window = vec![
            event(1, NewFeedback::rating(0.9, "concise summary")),
            event(2, NewFeedback::error("timeout loading page")),
        ];
        let body = synthesize(&config, "Base.", &window).unwrap();
        assert!(body.contains("1 positive and 1 negative"));
    }

    #[test]
    fn test_contrast_excludes_shared_terms() {
        let config = TrainerConfig::default();
        let window = vec![
            event(1, NewFeedback::rating(0.9, "answer included concrete code examples")),
            event(2, NewFeedback::rating(0.85, "answer included helpful code walkthrough")),
            event(3, NewFeedback::rating(0.1, "answer included vague filler text")),
            event(4, NewFeedback::rating(0.2, "answer was vague filler and too general")),
        ];
        let body = synthesize(&config, "Base.", &window).unwrap();

        // "code" recurs only on the positive side, "vague"/"filler"
        // only on the negative side; "answer" appears on both and must
        // not be recommended either way
        assert!(body.contains("code"));
        assert!(body.contains("vague"));
        let guidance = body.split("## Outcome guidance").nth(1).unwrap();
        let lean = guidance.split("Lean into these").next().unwrap();
        assert!(!lean.contains("answer,"));
    }

    #[test]
    fn test_always_returns_complete_body() {
        let config = TrainerConfig::default();
        // one event per side with fully shared vocabulary: no contrast
        // terms survive, the generic guidance line is used instead
        let window = vec![
            event(1, NewFeedback::rating(0.95, "response structure format")),
            event(2, NewFeedback::rating(0.05, "response structure format")),
        ];
        let body = synthesize(&config, "Base prompt.", &window).unwrap();
        assert!(body.starts_with("Base prompt."));
        assert!(body.contains("highly rated responses"));
    }
}
