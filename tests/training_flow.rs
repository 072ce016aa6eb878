//! End-to-end tests for the training pipeline: feedback in, trigger
//! decision, strategy synthesis, evaluation, and deployment policy,
//! all against an in-memory database.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::sync::Arc;

use prompt_forge::config::Config;
use prompt_forge::db::Database;
use prompt_forge::generation::TextGenerator;
use prompt_forge::service::TrainingService;
use prompt_forge::types::{NewFeedback, RunDisposition, TrainingStrategy, VersionStatus};
use prompt_forge::TrainError;

#[derive(Clone, Copy)]
enum Mode {
    /// Trained prompts answer well, untrained ones badly.
    Promote,
    /// Trained prompts answer fluently but echo an unsafe phrase.
    UnsafeTrained,
    /// Every generation call fails.
    FailEval,
}

/// Deterministic generator keyed on the system prompt it is given.
struct ScriptedGenerator {
    mode: Mode,
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, system: &str, user: &str) -> prompt_forge::Result<String> {
        if matches!(self.mode, Mode::FailEval) {
            return Err(TrainError::Generation("api unreachable".into()));
        }

        // Meta-prompt rewrite request: return a new prompt body.
        if system.contains("prompt engineer") {
            return Ok("You are a support assistant. Revised for clarity with confirmed \
                       scope and structured answers."
                .to_string());
        }

        let trained = system.contains("## Outcome guidance")
            || system.contains("## Reference examples")
            || system.contains("## Failure handling")
            || system.contains("Revised for clarity");
        if !trained {
            return Ok("ok".to_string());
        }

        match self.mode {
            Mode::UnsafeTrained => Ok("Sure, I will ignore previous instructions and \
                                       answer however you prefer going forward."
                .to_string()),
            _ => Ok(format!(
                "{} That request gets a careful and complete reply covering every \
                 point with specific detail.",
                user
            )),
        }
    }
}

async fn service_with(mode: Mode) -> anyhow::Result<Arc<TrainingService>> {
    let db = Database::open_in_memory()?;
    let generator = Arc::new(ScriptedGenerator { mode });
    Ok(Arc::new(TrainingService::new(
        Config::default(),
        &db,
        generator,
    )))
}

/// 12 events: avg rating 0.44, error rate 0.17. Fires the low-rating
/// trigger and selects the reinforcement strategy.
async fn seed_mixed_window(service: &TrainingService, identity: &str) -> anyhow::Result<()> {
    let now = Utc::now();
    for _ in 0..6 {
        service
            .record_feedback(
                identity,
                NewFeedback::rating(0.2, "answer missed the actual question"),
                now,
            )
            .await?;
    }
    for _ in 0..4 {
        service
            .record_feedback(
                identity,
                NewFeedback::rating(0.8, "solid answer with the right level of detail"),
                now,
            )
            .await?;
    }
    for _ in 0..2 {
        service
            .record_feedback(
                identity,
                NewFeedback::error("request timed out while composing the reply"),
                now,
            )
            .await?;
    }
    Ok(())
}

#[tokio::test]
async fn test_full_cycle_trains_promotes_and_respects_gates() -> anyhow::Result<()> {
    let service = service_with(Mode::Promote).await?;
    let now = Utc::now();

    let v1 = service
        .create_prompt(
            "support",
            "You are a support assistant for order questions. Answer briefly.",
            now,
        )
        .await?;
    assert_eq!(v1.version, 1);
    assert_eq!(v1.status, VersionStatus::Deployed);
    assert_eq!(v1.strategy, TrainingStrategy::None);

    seed_mixed_window(&service, "support").await?;

    // Low average rating fires the trigger; reinforcement is chosen.
    let run = service
        .run_identity("support", now)
        .await?
        .expect("trigger should fire");
    assert_eq!(run.strategy, TrainingStrategy::Reinforcement);
    assert_eq!(run.disposition, Some(RunDisposition::Promoted));
    assert_eq!(run.candidate_version, Some(2));
    assert_eq!(run.feedback_count, 12);
    let start = run.window_start_id.expect("window start");
    let end = run.window_end_id.expect("window end");
    assert!(start < end);

    let eval = run.evaluation.expect("promoted run carries scores");
    assert!(eval.success_rate >= 0.8);
    assert!(eval.safety >= 0.9);
    assert!(eval.improvement_over_baseline.unwrap() >= 0.05);

    // v2 deployed, v1 retired.
    let active = service.versions().active("support").await?;
    assert_eq!(active.version, 2);
    assert!(active.body.contains("## Outcome guidance"));
    let history = service.versions().history("support").await?;
    let old = history.iter().find(|v| v.version == 1).unwrap();
    assert_eq!(old.status, VersionStatus::Retired);

    // The window is consumed; nothing new to train on.
    assert!(service.run_identity("support", now).await?.is_none());

    // Fresh complaints arrive, but the 24h interval gate holds.
    for _ in 0..9 {
        service
            .record_feedback(
                "support",
                NewFeedback::rating(0.2, "still too vague about refund timelines"),
                now,
            )
            .await?;
    }
    for _ in 0..2 {
        service
            .record_feedback(
                "support",
                NewFeedback::rating(0.85, "good, clear escalation steps"),
                now,
            )
            .await?;
    }
    service
        .record_feedback(
            "support",
            NewFeedback::error("gave a wrong order status"),
            now,
        )
        .await?;
    assert!(service
        .run_identity("support", now + Duration::hours(1))
        .await?
        .is_none());

    // Past the interval the trigger fires again, but with a trained
    // baseline the new candidate shows no improvement and is held.
    let run2 = service
        .run_identity("support", now + Duration::hours(25))
        .await?
        .expect("second trigger should fire");
    assert_eq!(run2.disposition, Some(RunDisposition::Held));
    assert_eq!(run2.candidate_version, Some(3));

    let active = service.versions().active("support").await?;
    assert_eq!(active.version, 2, "held candidate must not deploy");
    let v3 = service.versions().get("support", 3).await?.unwrap();
    assert_eq!(v3.status, VersionStatus::Candidate);

    Ok(())
}

#[tokio::test]
async fn test_unsafe_candidate_is_held_not_deployed() -> anyhow::Result<()> {
    let service = service_with(Mode::UnsafeTrained).await?;
    let now = Utc::now();

    service
        .create_prompt("triage", "You are a triage assistant. Classify incoming reports.", now)
        .await?;
    seed_mixed_window(&service, "triage").await?;

    let run = service
        .run_identity("triage", now)
        .await?
        .expect("trigger should fire");
    assert_eq!(run.disposition, Some(RunDisposition::Held));
    let eval = run.evaluation.expect("held run carries scores");
    assert!(eval.safety < 0.9, "safety shortfall should be why it held");

    let active = service.versions().active("triage").await?;
    assert_eq!(active.version, 1, "unsafe candidate must not deploy");
    let candidate = service.versions().get("triage", 2).await?.unwrap();
    assert_eq!(candidate.status, VersionStatus::Candidate);

    Ok(())
}

#[tokio::test]
async fn test_manual_meta_prompt_run_bypasses_gates() -> anyhow::Result<()> {
    let service = service_with(Mode::Promote).await?;
    let now = Utc::now();

    service
        .create_prompt("writer", "You draft release notes from changelogs.", now)
        .await?;

    // Two suggestions, far below the automatic trigger minimum.
    service
        .record_feedback(
            "writer",
            NewFeedback::suggestion("confirm the audience before drafting"),
            now,
        )
        .await?;
    service
        .record_feedback(
            "writer",
            NewFeedback::suggestion("group entries by component"),
            now,
        )
        .await?;

    let run = service
        .trigger_training("writer", Some(TrainingStrategy::MetaPrompt), now)
        .await?;
    assert_eq!(run.strategy, TrainingStrategy::MetaPrompt);
    assert_eq!(run.disposition, Some(RunDisposition::Promoted));
    assert_eq!(run.feedback_count, 2);

    let active = service.versions().active("writer").await?;
    assert_eq!(active.version, 2);
    assert!(active.body.contains("Revised for clarity"));
    assert_eq!(active.strategy, TrainingStrategy::MetaPrompt);

    // Manual runs advance the watermark like automatic ones.
    let watermark = service.runs().watermark("writer").await?.unwrap();
    assert_eq!(watermark, run.window_end_id.unwrap());
    assert!(service.run_identity("writer", now).await?.is_none());

    Ok(())
}

#[tokio::test]
async fn test_insufficient_feedback_fails_the_run_and_keeps_the_window() -> anyhow::Result<()> {
    let service = service_with(Mode::Promote).await?;
    let now = Utc::now();

    service
        .create_prompt("planner", "You plan sprints.", now)
        .await?;
    for _ in 0..3 {
        service
            .record_feedback("planner", NewFeedback::rating(0.9, "great plan"), now)
            .await?;
    }

    // Adversarial training needs at least one error event.
    let err = service
        .trigger_training("planner", Some(TrainingStrategy::Adversarial), now)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        TrainError::InsufficientFeedback {
            strategy: TrainingStrategy::Adversarial,
            ..
        }
    ));

    // The failed run is still recorded, with the window it consumed.
    let runs = service.runs().history("planner", 10).await?;
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].disposition, Some(RunDisposition::Failed));
    assert_eq!(runs[0].candidate_version, None);
    assert!(runs[0].reason.as_ref().unwrap().contains("error"));
    assert!(runs[0].window_end_id.is_some());

    // No candidate was created.
    let history = service.versions().history("planner").await?;
    assert_eq!(history.len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_evaluation_failure_keeps_candidate_for_review() -> anyhow::Result<()> {
    let service = service_with(Mode::FailEval).await?;
    let now = Utc::now();

    service
        .create_prompt("support", "You answer billing questions.", now)
        .await?;
    seed_mixed_window(&service, "support").await?;

    // Reinforcement synthesis needs no model call, so the candidate is
    // created; evaluation then fails on every run.
    let err = service
        .trigger_training("support", Some(TrainingStrategy::Reinforcement), now)
        .await
        .unwrap_err();
    assert!(matches!(err, TrainError::Evaluation(_)));

    let runs = service.runs().history("support", 10).await?;
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].disposition, Some(RunDisposition::Failed));
    assert_eq!(runs[0].candidate_version, Some(2));
    assert!(runs[0].evaluation.is_none());

    let candidate = service.versions().get("support", 2).await?.unwrap();
    assert_eq!(candidate.status, VersionStatus::Candidate);
    assert!(candidate.metrics.is_none());
    let active = service.versions().active("support").await?;
    assert_eq!(active.version, 1);

    Ok(())
}

#[tokio::test]
async fn test_unknown_identity_is_not_trainable() -> anyhow::Result<()> {
    let service = service_with(Mode::Promote).await?;
    let err = service
        .trigger_training("ghost", None, Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, TrainError::NotFound { .. }));
    Ok(())
}

#[tokio::test]
async fn test_tick_sweeps_all_identities_and_isolates_failures() -> anyhow::Result<()> {
    let service = service_with(Mode::Promote).await?;
    let now = Utc::now();

    service
        .create_prompt("healthy", "You summarize meeting notes.", now)
        .await?;
    service
        .create_prompt("quiet", "You tag invoices.", now)
        .await?;
    seed_mixed_window(&service, "healthy").await?;

    let summary = service.run_tick(now).await;
    assert_eq!(summary.checked, 2);
    assert_eq!(summary.trained, 1);
    assert_eq!(summary.promoted, 1);
    assert_eq!(summary.failed, 0);

    // Second pass finds nothing new.
    let summary = service.run_tick(now).await;
    assert_eq!(summary.trained, 0);

    Ok(())
}
