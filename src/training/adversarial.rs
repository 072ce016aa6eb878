//! Adversarial training
//!
//! Classifies the window's error feedback against a catalogue of known
//! failure patterns and rewrites the prompt with explicit guardrails
//! for every pattern that actually occurred, plus stress cases derived
//! from the worst recorded failures.

use tracing::debug;

use crate::error::{Result, TrainError};
use crate::types::{FeedbackEvent, FeedbackKind, TrainingStrategy};

/// (name, detail keywords, guardrail added to the prompt)
const FAILURE_PATTERNS: &[(&str, &[&str], &str)] = &[
    (
        "timeout",
        &["timeout", "timed out", "too slow", "hang", "never finished"],
        "Keep responses bounded; when a task could run long, return partial results with a clear continuation plan.",
    ),
    (
        "formatting",
        &["format", "json", "parse", "malformed", "invalid output", "schema"],
        "Emit output in exactly the structure requested and check it is well-formed before finishing.",
    ),
    (
        "accuracy",
        &["wrong", "incorrect", "made up", "inaccurate", "fabricat", "hallucinat"],
        "State only what the given context supports; say explicitly when information is missing instead of guessing.",
    ),
    (
        "refusal",
        &["refused", "declined", "won't", "cannot", "can't help"],
        "Attempt the task before declining; when declining, explain what is possible instead.",
    ),
    (
        "ambiguity",
        &["unclear", "confusing", "ambiguous", "vague", "misunderstood"],
        "When a request is ambiguous, state the interpretation chosen before answering.",
    ),
    (
        "length",
        &["too long", "too short", "verbose", "truncated", "cut off"],
        "Match the response length to the request; prefer the shortest complete answer.",
    ),
];

/// How many raw failure details become stress cases.
const MAX_STRESS_CASES: usize = 3;

pub(crate) fn synthesize(current_body: &str, window: &[FeedbackEvent]) -> Result<String> {
    let errors: Vec<&FeedbackEvent> = window
        .iter()
        .filter(|e| e.kind == FeedbackKind::Error)
        .collect();

    if errors.is_empty() {
        return Err(TrainError::InsufficientFeedback {
            strategy: TrainingStrategy::Adversarial,
            reason: "no error feedback in the window".to_string(),
        });
    }

    let mut pattern_counts = vec![0usize; FAILURE_PATTERNS.len()];
    let mut unmatched = 0usize;
    for error in &errors {
        match classify(&error.detail) {
            Some(idx) => pattern_counts[idx] += 1,
            None => unmatched += 1,
        }
    }

    debug!(
        "Adversarial training over {} error(s), {} unmatched",
        errors.len(),
        unmatched
    );

    let mut body = String::with_capacity(current_body.len() + 768);
    body.push_str(current_body.trim_end());
    body.push_str("\n\n## Failure handling\n\n");
    body.push_str("Recorded failures cluster into the patterns below. Follow each rule even under unusual inputs.\n");
    for (idx, (_, _, guardrail)) in FAILURE_PATTERNS.iter().enumerate() {
        if pattern_counts[idx] > 0 {
            body.push_str(&format!("- {} (seen {}x)\n", guardrail, pattern_counts[idx]));
        }
    }
    if unmatched > 0 {
        body.push_str(
            "- If a request resembles a previously failed case, restate the requirement back before answering.\n",
        );
    }

    body.push_str("\n## Stress cases to withstand\n\n");
    for error in errors.iter().rev().take(MAX_STRESS_CASES) {
        let detail = crate::truncate_safe(error.detail.trim(), 120);
        body.push_str(&format!(
            "- \"{}\", including when the input is empty, oversized, or contains markup\n",
            detail
        ));
    }

    Ok(body)
}

/// Index of the first failure pattern whose keywords match the detail.
fn classify(detail: &str) -> Option<usize> {
    let lowered = detail.to_lowercase();
    FAILURE_PATTERNS
        .iter()
        .position(|(_, keywords, _)| keywords.iter().any(|k| lowered.contains(k)))
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
    fn test_requires_errors() {
        let window = vec![event(1, NewFeedback::rating(0.1, "terrible"))];
        let err = synthesize("Base.", &window).unwrap_err();
        assert!(matches!(
            err,
            TrainError::InsufficientFeedback {
                strategy: TrainingStrategy::Adversarial,
                ..
            }
        ));
    }

    #[test]
    fn test_classify_known_patterns() {
        assert_eq!(classify("request timed out after 30s"), Some(0));
        assert_eq!(classify("returned malformed JSON"), Some(1));
        assert_eq!(classify("the answer was just wrong"), Some(2));
        assert_eq!(classify("something nobody has seen before"), None);
    }

    #[test]
    fn test_guardrails_match_observed_failures() {
        let window = vec![
            event(1, NewFeedback::error("response timed out")),
            event(2, NewFeedback::error("request hang forever")),
            event(3, NewFeedback::error("output was invalid output, not JSON")),
        ];
        let body = synthesize("Base prompt.", &window).unwrap();

        assert!(body.starts_with("Base prompt."));
        assert!(body.contains("## Failure handling"));
        assert!(body.contains("partial results"));
        assert!(body.contains("(seen 2x)"));
        assert!(body.contains("well-formed"));
        // no refusal failures recorded, so no refusal guardrail
        assert!(!body.contains("explain what is possible"));
    }

    #[test]
    fn test_unmatched_errors_get_generic_guardrail() {
        let window = vec![event(1, NewFeedback::error("exploded in a novel way"))];
        let body = synthesize("Base.", &window).unwrap();
        assert!(body.contains("restate the requirement"));
        assert!(body.contains("exploded in a novel way"));
    }
}
