//! Prompt version store
//!
//! Versions are numbered 1..N per identity with no gaps, and bodies are
//! immutable once written. All status transitions run inside a single
//! transaction so that at most one version per identity is ever
//! deployed, no matter how calls interleave.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Result, TrainError};
use crate::types::{EvaluationResult, PromptExport, PromptVersion, TrainingStrategy, VersionStatus};

/// Durable store for prompt versions.
pub struct VersionStore {
    conn: Arc<Mutex<Connection>>,
}

impl VersionStore {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// Append a new candidate version and return it. The version number
    /// is assigned inside the insert transaction, so concurrent creates
    /// still produce a gapless sequence.
    pub async fn create(
        &self,
        identity: &str,
        body: &str,
        strategy: TrainingStrategy,
        now: DateTime<Utc>,
    ) -> Result<PromptVersion> {
        if identity.trim().is_empty() {
            return Err(TrainError::invalid("prompt identity must not be empty"));
        }
        if body.trim().is_empty() {
            return Err(TrainError::invalid("prompt body must not be empty"));
        }

        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let next: u32 = tx.query_row(
            "SELECT COALESCE(MAX(version), 0) + 1 FROM versions WHERE identity = ?1",
            params![identity],
            |row| row.get(0),
        )?;
        tx.execute(
            "INSERT INTO versions (identity, version, body, status, strategy, metrics, created_at, deployed_at)
             VALUES (?1, ?2, ?3, 'candidate', ?4, NULL, ?5, NULL)",
            params![identity, next, body, strategy.as_str(), now.to_rfc3339()],
        )?;
        tx.commit()?;

        debug!("Created prompt '{}' v{} ({})", identity, next, strategy);

        Ok(PromptVersion {
            identity: identity.to_string(),
            version: next,
            body: body.to_string(),
            status: VersionStatus::Candidate,
            strategy,
            metrics: None,
            created_at: now,
            deployed_at: None,
        })
    }

    pub async fn get(&self, identity: &str, version: u32) -> Result<Option<PromptVersion>> {
        let conn = self.conn.lock().await;
        fetch_version(&conn, identity, version)
    }

    /// The currently deployed version for an identity.
    pub async fn active(&self, identity: &str) -> Result<PromptVersion> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT identity, version, body, status, strategy, metrics, created_at, deployed_at
             FROM versions WHERE identity = ?1 AND status = 'deployed'",
        )?;
        stmt.query_row(params![identity], row_to_version)
            .optional()?
            .ok_or_else(|| TrainError::not_found("deployed version", identity))
    }

    /// Full version history for an identity, newest first. Empty when
    /// the identity is unknown.
    pub async fn history(&self, identity: &str) -> Result<Vec<PromptVersion>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT identity, version, body, status, strategy, metrics, created_at, deployed_at
             FROM versions WHERE identity = ?1 ORDER BY version DESC",
        )?;
        let versions = stmt
            .query_map(params![identity], row_to_version)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(versions)
    }

    /// Every identity that has at least one stored version.
    pub async fn identities(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock().await;
        let mut stmt =
            conn.prepare_cached("SELECT DISTINCT identity FROM versions ORDER BY identity")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    /// Deploy a version, retiring whichever version was deployed before.
    /// Deploying the already-deployed version is a no-op.
    pub async fn deploy(
        &self,
        identity: &str,
        version: u32,
        now: DateTime<Utc>,
    ) -> Result<PromptVersion> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        let target = fetch_version(&tx, identity, version)?.ok_or_else(|| {
            TrainError::not_found("prompt version", format!("{} v{}", identity, version))
        })?;
        if target.status == VersionStatus::Deployed {
            debug!("Prompt '{}' v{} is already deployed", identity, version);
            return Ok(target);
        }

        deploy_in_tx(&tx, identity, version, now)?;
        let deployed = fetch_version(&tx, identity, version)?.ok_or_else(|| {
            TrainError::not_found("prompt version", format!("{} v{}", identity, version))
        })?;
        tx.commit()?;

        info!("Deployed prompt '{}' v{}", identity, version);
        Ok(deployed)
    }

    /// Restore the version that was deployed immediately before the
    /// current one. Errors with [`TrainError::NoPriorVersion`] when
    /// nothing was deployed earlier.
    pub async fn rollback(&self, identity: &str, now: DateTime<Utc>) -> Result<PromptVersion> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        // Retired versions keep the timestamp of their last deployment,
        // so the most recently deployed retired version is the rollback
        // target even when version numbers were deployed out of order.
        let prior: Option<u32> = tx
            .query_row(
                "SELECT version FROM versions
                 WHERE identity = ?1 AND status = 'retired' AND deployed_at IS NOT NULL
                 ORDER BY deployed_at DESC LIMIT 1",
                params![identity],
                |row| row.get(0),
            )
            .optional()?;
        let Some(prior) = prior else {
            return Err(TrainError::NoPriorVersion(identity.to_string()));
        };

        deploy_in_tx(&tx, identity, prior, now)?;
        let restored = fetch_version(&tx, identity, prior)?.ok_or_else(|| {
            TrainError::not_found("prompt version", format!("{} v{}", identity, prior))
        })?;
        tx.commit()?;

        info!("Rolled back prompt '{}' to v{}", identity, prior);
        Ok(restored)
    }

    /// Mark a candidate as rejected. Only candidates can be rejected;
    /// deployed versions must be rolled back instead.
    pub async fn reject(&self, identity: &str, version: u32) -> Result<PromptVersion> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        let target = fetch_version(&tx, identity, version)?.ok_or_else(|| {
            TrainError::not_found("prompt version", format!("{} v{}", identity, version))
        })?;
        if target.status != VersionStatus::Candidate {
            return Err(TrainError::invalid(format!(
                "only candidate versions can be rejected; '{}' v{} is {}",
                identity, version, target.status
            )));
        }

        tx.execute(
            "UPDATE versions SET status = 'rejected' WHERE identity = ?1 AND version = ?2",
            params![identity, version],
        )?;
        tx.commit()?;

        info!("Rejected prompt '{}' v{}", identity, version);
        Ok(PromptVersion {
            status: VersionStatus::Rejected,
            ..target
        })
    }

    /// Attach evaluation scores to a version. The body itself never
    /// changes; only the metrics column is written.
    pub async fn update_metrics(
        &self,
        identity: &str,
        version: u32,
        metrics: &EvaluationResult,
    ) -> Result<()> {
        let json = serde_json::to_string(metrics)?;
        let conn = self.conn.lock().await;
        let updated = conn.execute(
            "UPDATE versions SET metrics = ?3 WHERE identity = ?1 AND version = ?2",
            params![identity, version, json],
        )?;
        if updated == 0 {
            return Err(TrainError::not_found(
                "prompt version",
                format!("{} v{}", identity, version),
            ));
        }
        Ok(())
    }

    /// Snapshot the full history of one identity for backup or transfer.
    pub async fn export(&self, identity: &str, now: DateTime<Utc>) -> Result<PromptExport> {
        let mut versions = self.history(identity).await?;
        if versions.is_empty() {
            return Err(TrainError::not_found("prompt", identity));
        }
        versions.reverse(); // oldest first in the export

        Ok(PromptExport {
            identity: identity.to_string(),
            exported_at: now,
            versions,
        })
    }

    /// Restore an exported history. Refuses to touch an identity that
    /// already has versions.
    pub async fn import(&self, export: &PromptExport) -> Result<usize> {
        if export.versions.is_empty() {
            return Err(TrainError::invalid("export contains no versions"));
        }
        let mut sorted = export.versions.clone();
        sorted.sort_by_key(|v| v.version);
        for (i, v) in sorted.iter().enumerate() {
            if v.version != (i + 1) as u32 {
                return Err(TrainError::invalid(format!(
                    "export for '{}' has a gap at v{}",
                    export.identity,
                    i + 1
                )));
            }
        }
        let deployed = sorted
            .iter()
            .filter(|v| v.status == VersionStatus::Deployed)
            .count();
        if deployed > 1 {
            return Err(TrainError::invalid(format!(
                "export for '{}' has {} deployed versions",
                export.identity, deployed
            )));
        }

        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let existing: u32 = tx.query_row(
            "SELECT COUNT(*) FROM versions WHERE identity = ?1",
            params![export.identity],
            |row| row.get(0),
        )?;
        if existing > 0 {
            return Err(TrainError::invalid(format!(
                "prompt '{}' already exists; refusing to overwrite",
                export.identity
            )));
        }
        for v in &sorted {
            let metrics = v
                .metrics
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;
            tx.execute(
                "INSERT INTO versions (identity, version, body, status, strategy, metrics, created_at, deployed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    export.identity,
                    v.version,
                    v.body,
                    v.status.as_str(),
                    v.strategy.as_str(),
                    metrics,
                    v.created_at.to_rfc3339(),
                    v.deployed_at.map(|d| d.to_rfc3339()),
                ],
            )?;
        }
        tx.commit()?;

        info!(
            "Imported prompt '{}' with {} versions",
            export.identity,
            sorted.len()
        );
        Ok(sorted.len())
    }
}

fn deploy_in_tx(
    tx: &rusqlite::Transaction<'_>,
    identity: &str,
    version: u32,
    now: DateTime<Utc>,
) -> Result<()> {
    tx.execute(
        "UPDATE versions SET status = 'retired' WHERE identity = ?1 AND status = 'deployed'",
        params![identity],
    )?;
    tx.execute(
        "UPDATE versions SET status = 'deployed', deployed_at = ?3
         WHERE identity = ?1 AND version = ?2",
        params![identity, version, now.to_rfc3339()],
    )?;
    Ok(())
}

fn fetch_version(conn: &Connection, identity: &str, version: u32) -> Result<Option<PromptVersion>> {
    let mut stmt = conn.prepare_cached(
        "SELECT identity, version, body, status, strategy, metrics, created_at, deployed_at
         FROM versions WHERE identity = ?1 AND version = ?2",
    )?;
    let found = stmt
        .query_row(params![identity, version], row_to_version)
        .optional()?;
    Ok(found)
}

fn row_to_version(row: &rusqlite::Row<'_>) -> rusqlite::Result<PromptVersion> {
    let status: String = row.get(3)?;
    let strategy: String = row.get(4)?;
    let metrics: Option<String> = row.get(5)?;
    let created: String = row.get(6)?;
    let deployed: Option<String> = row.get(7)?;
    Ok(PromptVersion {
        identity: row.get(0)?,
        version: row.get(1)?,
        body: row.get(2)?,
        status: VersionStatus::parse(&status).unwrap_or(VersionStatus::Candidate),
        strategy: TrainingStrategy::parse(&strategy).unwrap_or(TrainingStrategy::None),
        metrics: metrics.and_then(|m| serde_json::from_str(&m).ok()),
        created_at: DateTime::parse_from_rfc3339(&created)
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        deployed_at: deployed
            .and_then(|d| DateTime::parse_from_rfc3339(&d).map(|d| d.with_timezone(&Utc)).ok()),
    })
}
