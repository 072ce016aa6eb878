//! Audit log of training runs
//!
//! Every training attempt gets exactly one record: opened when the run
//! starts, completed once with its disposition, and never touched
//! again. The highest consumed feedback id across an identity's runs is
//! the watermark the next trigger check starts from.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{Result, TrainError};
use crate::types::{EvaluationResult, EventId, RunDisposition, TrainingRun, TrainingStrategy};

/// Durable store for training run records.
pub struct RunLog {
    conn: Arc<Mutex<Connection>>,
}

impl RunLog {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// Open a run record before training starts. The window ids bound
    /// the feedback this run consumes; both are `None` for an empty
    /// window.
    pub async fn open_run(
        &self,
        identity: &str,
        strategy: TrainingStrategy,
        window_start_id: Option<EventId>,
        window_end_id: Option<EventId>,
        feedback_count: u32,
        started_at: DateTime<Utc>,
    ) -> Result<TrainingRun> {
        let run = TrainingRun {
            id: Uuid::new_v4().to_string(),
            identity: identity.to_string(),
            strategy,
            window_start_id,
            window_end_id,
            feedback_count,
            candidate_version: None,
            evaluation: None,
            disposition: None,
            reason: None,
            started_at,
            finished_at: None,
        };

        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "INSERT INTO training_runs
             (id, identity, strategy, window_start_id, window_end_id, feedback_count, started_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )?;
        stmt.execute(params![
            run.id,
            run.identity,
            run.strategy.as_str(),
            run.window_start_id,
            run.window_end_id,
            run.feedback_count,
            run.started_at.to_rfc3339(),
        ])?;

        Ok(run)
    }

    /// Record the final outcome of a run. A run can be completed once;
    /// further attempts are rejected.
    pub async fn complete_run(
        &self,
        run_id: &str,
        disposition: RunDisposition,
        candidate_version: Option<u32>,
        evaluation: Option<&EvaluationResult>,
        reason: Option<&str>,
        finished_at: DateTime<Utc>,
    ) -> Result<TrainingRun> {
        let evaluation_json = evaluation.map(serde_json::to_string).transpose()?;

        let conn = self.conn.lock().await;
        let updated = conn.execute(
            "UPDATE training_runs
             SET disposition = ?2, candidate_version = ?3, evaluation = ?4,
                 reason = ?5, finished_at = ?6
             WHERE id = ?1 AND disposition IS NULL",
            params![
                run_id,
                disposition.as_str(),
                candidate_version,
                evaluation_json,
                reason,
                finished_at.to_rfc3339(),
            ],
        )?;

        if updated == 0 {
            let exists: u32 = conn.query_row(
                "SELECT COUNT(*) FROM training_runs WHERE id = ?1",
                params![run_id],
                |row| row.get(0),
            )?;
            return if exists > 0 {
                Err(TrainError::invalid(format!(
                    "training run {} is already complete",
                    run_id
                )))
            } else {
                Err(TrainError::not_found("training run", run_id))
            };
        }

        let mut stmt = conn.prepare_cached(
            "SELECT id, identity, strategy, window_start_id, window_end_id, feedback_count,
                    candidate_version, evaluation, disposition, reason, started_at, finished_at
             FROM training_runs WHERE id = ?1",
        )?;
        stmt.query_row(params![run_id], row_to_run)
            .optional()?
            .ok_or_else(|| TrainError::not_found("training run", run_id))
    }

    pub async fn get(&self, run_id: &str) -> Result<Option<TrainingRun>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT id, identity, strategy, window_start_id, window_end_id, feedback_count,
                    candidate_version, evaluation, disposition, reason, started_at, finished_at
             FROM training_runs WHERE id = ?1",
        )?;
        let run = stmt.query_row(params![run_id], row_to_run).optional()?;
        Ok(run)
    }

    /// The most recent run for an identity, whatever its outcome. The
    /// trigger interval counts from this run's start time.
    pub async fn last_run(&self, identity: &str) -> Result<Option<TrainingRun>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT id, identity, strategy, window_start_id, window_end_id, feedback_count,
                    candidate_version, evaluation, disposition, reason, started_at, finished_at
             FROM training_runs WHERE identity = ?1
             ORDER BY started_at DESC LIMIT 1",
        )?;
        let run = stmt.query_row(params![identity], row_to_run).optional()?;
        Ok(run)
    }

    /// Run history for an identity, newest first.
    pub async fn history(&self, identity: &str, limit: usize) -> Result<Vec<TrainingRun>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT id, identity, strategy, window_start_id, window_end_id, feedback_count,
                    candidate_version, evaluation, disposition, reason, started_at, finished_at
             FROM training_runs WHERE identity = ?1
             ORDER BY started_at DESC LIMIT ?2",
        )?;
        let runs = stmt
            .query_map(params![identity, limit], row_to_run)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(runs)
    }

    /// Highest feedback id any run for this identity has consumed.
    pub async fn watermark(&self, identity: &str) -> Result<Option<EventId>> {
        let conn = self.conn.lock().await;
        let mark: Option<EventId> = conn.query_row(
            "SELECT MAX(window_end_id) FROM training_runs WHERE identity = ?1",
            params![identity],
            |row| row.get(0),
        )?;
        Ok(mark)
    }
}

fn row_to_run(row: &rusqlite::Row<'_>) -> rusqlite::Result<TrainingRun> {
    let strategy: String = row.get(2)?;
    let evaluation: Option<String> = row.get(7)?;
    let disposition: Option<String> = row.get(8)?;
    let started: String = row.get(10)?;
    let finished: Option<String> = row.get(11)?;
    Ok(TrainingRun {
        id: row.get(0)?,
        identity: row.get(1)?,
        strategy: TrainingStrategy::parse(&strategy).unwrap_or(TrainingStrategy::None),
        window_start_id: row.get(3)?,
        window_end_id: row.get(4)?,
        feedback_count: row.get(5)?,
        candidate_version: row.get(6)?,
        evaluation: evaluation.and_then(|e| serde_json::from_str(&e).ok()),
        disposition: disposition.and_then(|d| RunDisposition::parse(&d)),
        reason: row.get(9)?,
        started_at: DateTime::parse_from_rfc3339(&started)
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        finished_at: finished
            .and_then(|f| DateTime::parse_from_rfc3339(&f).map(|d| d.with_timezone(&Utc)).ok()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    fn log() -> RunLog {
        let db = Database::open_in_memory().unwrap();
        RunLog::new(db.connection())
    }

    #[tokio::test]
    async fn test_open_and_complete() {
        let log = log();
        let now = Utc::now();
        let run = log
            .open_run("helper", TrainingStrategy::FewShot, Some(1), Some(12), 12, now)
            .await
            .unwrap();
        assert!(run.disposition.is_none());

        let done = log
            .complete_run(
                &run.id,
                RunDisposition::Held,
                Some(2),
                None,
                Some("below improvement threshold"),
                now + chrono::Duration::seconds(30),
            )
            .await
            .unwrap();
        assert_eq!(done.disposition, Some(RunDisposition::Held));
        assert_eq!(done.candidate_version, Some(2));
        assert!(done.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_complete_twice_is_rejected() {
        let log = log();
        let now = Utc::now();
        let run = log
            .open_run("helper", TrainingStrategy::Adversarial, None, None, 0, now)
            .await
            .unwrap();
        log.complete_run(&run.id, RunDisposition::Failed, None, None, Some("boom"), now)
            .await
            .unwrap();

        let err = log
            .complete_run(&run.id, RunDisposition::Promoted, Some(2), None, None, now)
            .await
            .unwrap_err();
        assert!(matches!(err, TrainError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_watermark_is_highest_window_end() {
        let log = log();
        let now = Utc::now();
        assert_eq!(log.watermark("helper").await.unwrap(), None);

        log.open_run("helper", TrainingStrategy::FewShot, Some(1), Some(10), 10, now)
            .await
            .unwrap();
        log.open_run("helper", TrainingStrategy::FewShot, Some(11), Some(25), 15, now)
            .await
            .unwrap();
        log.open_run("other", TrainingStrategy::FewShot, Some(1), Some(99), 99, now)
            .await
            .unwrap();

        assert_eq!(log.watermark("helper").await.unwrap(), Some(25));
    }

    #[tokio::test]
    async fn test_last_run_and_history_order() {
        let log = log();
        let t0 = Utc::now();
        for i in 0..3 {
            log.open_run(
                "helper",
                TrainingStrategy::FewShot,
                None,
                None,
                0,
                t0 + chrono::Duration::minutes(i),
            )
            .await
            .unwrap();
        }

        let last = log.last_run("helper").await.unwrap().unwrap();
        assert_eq!(last.started_at.timestamp(), (t0 + chrono::Duration::minutes(2)).timestamp());

        let history = log.history("helper", 2).await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(history[0].started_at >= history[1].started_at);
    }
}
