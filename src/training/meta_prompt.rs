//! Meta-prompt training
//!
//! Sends the current prompt, window statistics, and the collected
//! suggestions to the generation model and asks for a complete rewrite.
//! This is the only strategy that costs a model call.

use tracing::debug;

use crate::error::{Result, TrainError};
use crate::generation::TextGenerator;
use crate::types::{FeedbackEvent, FeedbackKind, TrainingStrategy};

const REWRITE_SYSTEM: &str = "You are an expert prompt engineer. You revise system prompts \
based on real usage feedback. Keep the original intent and constraints, incorporate the \
suggestions where they improve outcomes, and remove nothing that is load-bearing. Respond \
with the revised prompt only: no preamble, no commentary, no code fences.";

pub(crate) async fn synthesize(
    generator: &dyn TextGenerator,
    current_body: &str,
    window: &[FeedbackEvent],
) -> Result<String> {
    let suggestions: Vec<&str> = window
        .iter()
        .filter(|e| e.kind == FeedbackKind::Suggestion && !e.detail.trim().is_empty())
        .map(|e| e.detail.as_str())
        .collect();

    if suggestions.is_empty() {
        return Err(TrainError::InsufficientFeedback {
            strategy: TrainingStrategy::MetaPrompt,
            reason: "no suggestion feedback in the window".to_string(),
        });
    }

    let mut request = String::new();
    request.push_str("Current prompt:\n---\n");
    request.push_str(current_body.trim());
    request.push_str("\n---\n\n");
    request.push_str(&window_stats(window));
    request.push_str("\nUser suggestions:\n");
    for (i, suggestion) in suggestions.iter().enumerate() {
        request.push_str(&format!("{}. {}\n", i + 1, suggestion.trim()));
    }
    request.push_str("\nRewrite the prompt.");

    debug!(
        "Meta-prompt rewrite with {} suggestion(s)",
        suggestions.len()
    );

    let response = generator.generate(REWRITE_SYSTEM, &request).await?;
    let body = strip_fences(&response);
    if body.trim().is_empty() {
        return Err(TrainError::Generation(
            "model returned an empty prompt rewrite".to_string(),
        ));
    }
    Ok(body)
}

fn window_stats(window: &[FeedbackEvent]) -> String {
    let ratings: Vec<f64> = window
        .iter()
        .filter(|e| e.kind == FeedbackKind::Rating)
        .filter_map(|e| e.rating)
        .collect();
    let errors = window
        .iter()
        .filter(|e| e.kind == FeedbackKind::Error)
        .count();

    let mut line = format!(
        "Usage over the window: {} feedback events, {} errors",
        window.len(),
        errors
    );
    if !ratings.is_empty() {
        line.push_str(&format!(
            ", average rating {:.2}",
            ratings.iter().sum::<f64>() / ratings.len() as f64
        ));
    }
    line.push('\n');
    line
}

/// Strip a wrapping code fence if the model added one anyway.
fn strip_fences(text: &str) -> String {
    let trimmed = text.trim();
    if let Some(inner) = trimmed.strip_prefix("```") {
        let inner = inner.split_once('\n').map(|(_, rest)| rest).unwrap_or(inner);
        if let Some(inner) = inner.strip_suffix("```") {
            return inner.trim().to_string();
        }
    }
    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::MockTextGenerator;
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
    fn test_requires_suggestions() {
        let generator = MockTextGenerator::new();
        let window = vec![event(1, NewFeedback::rating(0.2, "bad"))];
        let err =
            tokio_test::block_on(synthesize(&generator, "Base.", &window)).unwrap_err();
        assert!(matches!(
            err,
            TrainError::InsufficientFeedback {
                strategy: TrainingStrategy::MetaPrompt,
                ..
            }
        ));
    }

    #[test]
    fn test_request_carries_prompt_and_suggestions() {
        let mut generator = MockTextGenerator::new();
        generator
            .expect_generate()
            .withf(|system, user| {
                system.contains("prompt engineer")
                    && user.contains("Base prompt body.")
                    && user.contains("add worked examples")
            })
            .returning(|_, _| Ok("Rewritten prompt.".to_string()));

        let window = vec![event(1, NewFeedback::suggestion("add worked examples"))];
        let body =
            tokio_test::block_on(synthesize(&generator, "Base prompt body.", &window)).unwrap();
        assert_eq!(body, "Rewritten prompt.");
    }

    #[test]
    fn test_strips_code_fences() {
        let mut generator = MockTextGenerator::new();
        generator
            .expect_generate()
            .returning(|_, _| Ok("```markdown\nRewritten prompt.\n```".to_string()));

        let window = vec![event(1, NewFeedback::suggestion("tighten it"))];
        let body = tokio_test::block_on(synthesize(&generator, "Base.", &window)).unwrap();
        assert_eq!(body, "Rewritten prompt.");
    }

    #[test]
    fn test_empty_rewrite_is_an_error() {
        let mut generator = MockTextGenerator::new();
        generator
            .expect_generate()
            .returning(|_, _| Ok("``` ```".to_string()));

        let window = vec![event(1, NewFeedback::suggestion("tighten it"))];
        let err = tokio_test::block_on(synthesize(&generator, "Base.", &window)).unwrap_err();
        assert!(matches!(err, TrainError::Generation(_)));
    }
}
