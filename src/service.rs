//! Training service
//!
//! The one entry point callers use. Owns the stores, the trainer, the
//! evaluator, and the deployment policy, and serializes every mutation
//! of a prompt's version chain through a per-identity lock so manual
//! commands and the automatic loop can overlap safely.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::audit::RunLog;
use crate::config::Config;
use crate::db::Database;
use crate::deploy::{DeployDecision, DeploymentPolicy};
use crate::error::{Result, TrainError};
use crate::evaluation::Evaluator;
use crate::feedback::FeedbackStore;
use crate::generation::TextGenerator;
use crate::training::trainer::Trainer;
use crate::training::trigger::{self, TriggerDecision};
use crate::types::{
    EvaluationResult, EventId, FeedbackEvent, NewFeedback, PromptVersion, RunDisposition,
    TrainingRun, TrainingStrategy, VersionStatus,
};
use crate::version::VersionStore;

/// Where the automatic loop stands.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LoopStatus {
    pub running: bool,
    pub last_tick_at: Option<DateTime<Utc>>,
    pub next_tick_at: Option<DateTime<Utc>>,
}

/// What one loop tick did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickSummary {
    pub checked: usize,
    pub trained: usize,
    pub promoted: usize,
    pub failed: usize,
    pub pruned: usize,
}

/// Training posture of one identity.
#[derive(Debug, Clone, Serialize)]
pub struct IdentityStatus {
    pub identity: String,
    pub deployed_version: Option<u32>,
    pub version_count: usize,
    /// Feedback events past the watermark, waiting to be consumed.
    pub pending_feedback: u64,
    pub last_run: Option<TrainingRun>,
    /// What the trigger would do right now.
    pub next_action: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub identities: Vec<IdentityStatus>,
    pub loop_status: LoopStatus,
}

/// Facade over the whole training pipeline.
pub struct TrainingService {
    config: Config,
    feedback: FeedbackStore,
    versions: VersionStore,
    runs: RunLog,
    trainer: Trainer,
    evaluator: Evaluator,
    policy: DeploymentPolicy,
    identity_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    loop_status: RwLock<LoopStatus>,
}

impl TrainingService {
    pub fn new(config: Config, db: &Database, generator: Arc<dyn TextGenerator>) -> Self {
        let conn = db.connection();
        let trainer = Trainer::new(config.trainer.clone(), generator.clone());
        let evaluator = Evaluator::new(config.evaluation.clone(), generator);
        let policy = DeploymentPolicy::new(config.deployment.clone());

        Self {
            feedback: FeedbackStore::new(conn.clone()),
            versions: VersionStore::new(conn.clone()),
            runs: RunLog::new(conn),
            trainer,
            evaluator,
            policy,
            identity_locks: Mutex::new(HashMap::new()),
            loop_status: RwLock::new(LoopStatus::default()),
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn feedback(&self) -> &FeedbackStore {
        &self.feedback
    }

    pub fn versions(&self) -> &VersionStore {
        &self.versions
    }

    pub fn runs(&self) -> &RunLog {
        &self.runs
    }

    /// One lock per identity; every mutation of that identity's version
    /// chain goes through it.
    async fn identity_lock(&self, identity: &str) -> Arc<Mutex<()>> {
        let mut locks = self.identity_locks.lock().await;
        locks
            .entry(identity.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Record one feedback event. Safe to call concurrently; events are
    /// never lost or coalesced.
    pub async fn record_feedback(
        &self,
        identity: &str,
        event: NewFeedback,
        now: DateTime<Utc>,
    ) -> Result<EventId> {
        self.feedback.record(identity, event, now).await
    }

    /// Register a new prompt identity: store the human-authored body as
    /// v1 and deploy it.
    pub async fn create_prompt(
        &self,
        identity: &str,
        body: &str,
        now: DateTime<Utc>,
    ) -> Result<PromptVersion> {
        let lock = self.identity_lock(identity).await;
        let _guard = lock.lock().await;

        if !self.versions.history(identity).await?.is_empty() {
            return Err(TrainError::invalid(format!(
                "prompt '{}' already exists",
                identity
            )));
        }

        let version = self
            .versions
            .create(identity, body, TrainingStrategy::None, now)
            .await?;
        let deployed = self.versions.deploy(identity, version.version, now).await?;
        info!("Registered prompt '{}' with v1 deployed", identity);
        Ok(deployed)
    }

    /// Body of the currently deployed version.
    pub async fn active_prompt(&self, identity: &str) -> Result<String> {
        Ok(self.versions.active(identity).await?.body)
    }

    pub async fn deploy_version(
        &self,
        identity: &str,
        version: u32,
        now: DateTime<Utc>,
    ) -> Result<PromptVersion> {
        let lock = self.identity_lock(identity).await;
        let _guard = lock.lock().await;
        self.versions.deploy(identity, version, now).await
    }

    pub async fn rollback(&self, identity: &str, now: DateTime<Utc>) -> Result<PromptVersion> {
        let lock = self.identity_lock(identity).await;
        let _guard = lock.lock().await;
        self.versions.rollback(identity, now).await
    }

    pub async fn reject_version(&self, identity: &str, version: u32) -> Result<PromptVersion> {
        let lock = self.identity_lock(identity).await;
        let _guard = lock.lock().await;
        self.versions.reject(identity, version).await
    }

    /// Train now, bypassing the trigger gates. The watermark advances
    /// exactly as it would for an automatic run.
    pub async fn trigger_training(
        &self,
        identity: &str,
        strategy: Option<TrainingStrategy>,
        now: DateTime<Utc>,
    ) -> Result<TrainingRun> {
        let lock = self.identity_lock(identity).await;
        let _guard = lock.lock().await;

        if self.versions.history(identity).await?.is_empty() {
            return Err(TrainError::not_found("prompt", identity));
        }

        let watermark = self.runs.watermark(identity).await?.unwrap_or(0);
        let window = self.feedback.query_after(identity, watermark).await?;
        let strategy = match strategy {
            Some(s) => s,
            None => {
                let last_run = self.runs.last_run(identity).await?;
                let snapshot = trigger::snapshot_from_events(
                    &window,
                    last_run.map(|r| r.started_at),
                    now,
                );
                trigger::choose_strategy(&self.config.trigger, &snapshot)
            }
        };

        self.execute_run(identity, strategy, &window, now).await
    }

    /// Trigger-gated training check for one identity; the loop calls
    /// this per tick.
    pub async fn run_identity(
        &self,
        identity: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<TrainingRun>> {
        let lock = self.identity_lock(identity).await;
        let _guard = lock.lock().await;

        let watermark = self.runs.watermark(identity).await?.unwrap_or(0);
        let window = self.feedback.query_after(identity, watermark).await?;
        let last_run = self.runs.last_run(identity).await?;
        let snapshot =
            trigger::snapshot_from_events(&window, last_run.map(|r| r.started_at), now);

        match trigger::decide(&self.config.trigger, &snapshot) {
            TriggerDecision::Skip { reason } => {
                debug!("No training for '{}': {}", identity, reason);
                Ok(None)
            }
            TriggerDecision::Fire { strategy, reason } => {
                info!("Training triggered for '{}' via {}: {}", identity, strategy, reason);
                let run = self.execute_run(identity, strategy, &window, now).await?;
                Ok(Some(run))
            }
        }
    }

    /// Train, evaluate, and apply the deployment policy. The run record
    /// is completed exactly once whatever happens, and the consumed
    /// window is marked even when training fails.
    async fn execute_run(
        &self,
        identity: &str,
        strategy: TrainingStrategy,
        window: &[FeedbackEvent],
        now: DateTime<Utc>,
    ) -> Result<TrainingRun> {
        let window_start = window.iter().map(|e| e.id).min();
        let window_end = window.iter().map(|e| e.id).max();
        let run = self
            .runs
            .open_run(identity, strategy, window_start, window_end, window.len() as u32, now)
            .await?;

        // the deployed version is both the training base and the
        // evaluation baseline; fall back to the newest version when
        // nothing is deployed
        let deployed = match self.versions.active(identity).await {
            Ok(v) => Some(v),
            Err(TrainError::NotFound { .. }) => None,
            Err(e) => return Err(e),
        };
        let base = match &deployed {
            Some(v) => v.clone(),
            None => self
                .versions
                .history(identity)
                .await?
                .into_iter()
                .next()
                .ok_or_else(|| TrainError::not_found("prompt", identity))?,
        };

        let body = match self.trainer.train(&base, window, strategy).await {
            Ok(body) => body,
            Err(e) => {
                warn!("Training '{}' with {} failed: {}", identity, strategy, e);
                self.runs
                    .complete_run(
                        &run.id,
                        RunDisposition::Failed,
                        None,
                        None,
                        Some(&e.to_string()),
                        Utc::now(),
                    )
                    .await?;
                return Err(e);
            }
        };

        let candidate = self.versions.create(identity, &body, strategy, now).await?;

        let evaluation = match self.evaluator.evaluate(&candidate, deployed.as_ref()).await {
            Ok(result) => result,
            Err(e) => {
                // the candidate stays in the store for manual review
                warn!(
                    "Evaluation of '{}' v{} failed: {}",
                    identity, candidate.version, e
                );
                self.runs
                    .complete_run(
                        &run.id,
                        RunDisposition::Failed,
                        Some(candidate.version),
                        None,
                        Some(&e.to_string()),
                        Utc::now(),
                    )
                    .await?;
                return Err(e);
            }
        };

        if let Err(e) = self
            .versions
            .update_metrics(identity, candidate.version, &evaluation)
            .await
        {
            warn!(
                "Could not store metrics for '{}' v{}: {}",
                identity, candidate.version, e
            );
        }

        let (disposition, reason) = match self.policy.decide(identity, &evaluation) {
            DeployDecision::Promote { reason } => {
                self.versions.deploy(identity, candidate.version, now).await?;
                info!("Auto-deployed '{}' v{} ({})", identity, candidate.version, reason);
                (RunDisposition::Promoted, reason)
            }
            DeployDecision::Hold { reason } => {
                info!(
                    "Holding '{}' v{} for review ({})",
                    identity, candidate.version, reason
                );
                (RunDisposition::Held, reason)
            }
            DeployDecision::Discard { reason } => {
                self.versions.reject(identity, candidate.version).await?;
                warn!("Auto-rejected '{}' v{} ({})", identity, candidate.version, reason);
                (RunDisposition::Discarded, reason)
            }
        };

        self.runs
            .complete_run(
                &run.id,
                disposition,
                Some(candidate.version),
                Some(&evaluation),
                Some(&reason),
                Utc::now(),
            )
            .await
    }

    /// Evaluate a stored version on demand and persist its scores.
    /// Defaults to comparing against the deployed version.
    pub async fn evaluate_version(
        &self,
        identity: &str,
        version: u32,
        baseline: Option<u32>,
    ) -> Result<EvaluationResult> {
        let target = self.versions.get(identity, version).await?.ok_or_else(|| {
            TrainError::not_found("prompt version", format!("{} v{}", identity, version))
        })?;

        let baseline_version = match baseline {
            Some(v) => Some(self.versions.get(identity, v).await?.ok_or_else(|| {
                TrainError::not_found("prompt version", format!("{} v{}", identity, v))
            })?),
            None => match self.versions.active(identity).await {
                Ok(v) if v.version != version => Some(v),
                _ => None,
            },
        };

        let result = self
            .evaluator
            .evaluate(&target, baseline_version.as_ref())
            .await?;
        self.versions
            .update_metrics(identity, version, &result)
            .await?;
        Ok(result)
    }

    /// One full pass: prune expired feedback, then run the trigger
    /// check for every known identity. Failures are isolated per
    /// identity; one broken prompt never stops the others.
    pub async fn run_tick(&self, now: DateTime<Utc>) -> TickSummary {
        let mut summary = TickSummary::default();

        let cutoff = now - chrono::Duration::days(self.config.feedback.retention_days);
        match self.feedback.prune_expired(cutoff).await {
            Ok(0) => {}
            Ok(n) => {
                summary.pruned = n;
                info!("Pruned {} feedback event(s) past retention", n);
            }
            Err(e) => error!("Feedback pruning failed: {}", e),
        }

        let identities = match self.versions.identities().await {
            Ok(ids) => ids,
            Err(e) => {
                error!("Could not enumerate prompts: {}", e);
                return summary;
            }
        };
        summary.checked = identities.len();

        for identity in identities {
            match self.run_identity(&identity, now).await {
                Ok(None) => {}
                Ok(Some(run)) => {
                    summary.trained += 1;
                    if run.disposition == Some(RunDisposition::Promoted) {
                        summary.promoted += 1;
                    }
                }
                Err(e) => {
                    warn!("Training for '{}' failed: {}", identity, e);
                    summary.failed += 1;
                }
            }
        }

        summary
    }

    pub async fn set_loop_status(&self, status: LoopStatus) {
        *self.loop_status.write().await = status;
    }

    pub async fn loop_status(&self) -> LoopStatus {
        self.loop_status.read().await.clone()
    }

    /// Current training posture for one identity or all of them.
    pub async fn training_status(
        &self,
        identity: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<StatusReport> {
        let identities = match identity {
            Some(id) => {
                if self.versions.history(id).await?.is_empty() {
                    return Err(TrainError::not_found("prompt", id));
                }
                vec![id.to_string()]
            }
            None => self.versions.identities().await?,
        };

        let mut statuses = Vec::with_capacity(identities.len());
        for id in identities {
            let history = self.versions.history(&id).await?;
            let deployed_version = history
                .iter()
                .find(|v| v.status == VersionStatus::Deployed)
                .map(|v| v.version);
            let watermark = self.runs.watermark(&id).await?.unwrap_or(0);
            let window = self.feedback.query_after(&id, watermark).await?;
            let last_run = self.runs.last_run(&id).await?;
            let snapshot = trigger::snapshot_from_events(
                &window,
                last_run.as_ref().map(|r| r.started_at),
                now,
            );
            let next_action = match trigger::decide(&self.config.trigger, &snapshot) {
                TriggerDecision::Fire { strategy, reason } => {
                    format!("would train via {} ({})", strategy, reason)
                }
                TriggerDecision::Skip { reason } => format!("waiting ({})", reason),
            };

            statuses.push(IdentityStatus {
                identity: id,
                deployed_version,
                version_count: history.len(),
                pending_feedback: window.len() as u64,
                last_run,
                next_action,
            });
        }

        Ok(StatusReport {
            identities: statuses,
            loop_status: self.loop_status().await,
        })
    }
}
