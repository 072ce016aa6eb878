//! Append-only feedback log
//!
//! Every signal about a deployed prompt lands here: explicit ratings,
//! recorded failures, success outcomes, and user suggestions. Training
//! reads a window of these events and never mutates them; the only
//! delete path is retention pruning.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{Result, TrainError};
use crate::types::{EventId, FeedbackEvent, FeedbackKind, FeedbackSummary, NewFeedback};

/// Retention settings for the feedback log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackConfig {
    /// Events older than this are pruned on each training tick.
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
}

fn default_retention_days() -> i64 {
    90
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
        }
    }
}

/// Optional constraints for [`FeedbackStore::query`].
#[derive(Debug, Clone, Default)]
pub struct FeedbackFilter {
    pub since: Option<DateTime<Utc>>,
    pub kind: Option<FeedbackKind>,
    /// Keep only the most recent N matching events.
    pub limit: Option<usize>,
}

/// Durable store for feedback events.
pub struct FeedbackStore {
    conn: Arc<Mutex<Connection>>,
}

impl FeedbackStore {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// Record one feedback event and return its assigned id.
    ///
    /// Ratings must be in [0.0, 1.0] and are only accepted on rating
    /// events; a rating attached to any other kind is dropped rather
    /// than rejecting the whole event.
    pub async fn record(
        &self,
        identity: &str,
        event: NewFeedback,
        now: DateTime<Utc>,
    ) -> Result<EventId> {
        if identity.trim().is_empty() {
            return Err(TrainError::invalid("prompt identity must not be empty"));
        }

        let rating = match event.kind {
            FeedbackKind::Rating => {
                let value = event
                    .rating
                    .ok_or_else(|| TrainError::invalid("rating events require a rating value"))?;
                if !(0.0..=1.0).contains(&value) {
                    return Err(TrainError::invalid(format!(
                        "rating {} outside [0.0, 1.0]",
                        value
                    )));
                }
                Some(value)
            }
            _ => {
                if event.rating.is_some() {
                    debug!(
                        "Dropping rating on {} feedback for '{}'",
                        event.kind, identity
                    );
                }
                None
            }
        };

        let payload = event.payload.as_ref().map(|v| v.to_string());

        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "INSERT INTO feedback (identity, kind, rating, detail, payload, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        stmt.execute(params![
            identity,
            event.kind.as_str(),
            rating,
            event.detail,
            payload,
            now.to_rfc3339(),
        ])?;

        Ok(conn.last_insert_rowid())
    }

    /// All events for an identity, oldest first, narrowed by `filter`.
    /// Ordered by timestamp rather than arrival, so a backfilled event
    /// sorts where its `created_at` puts it.
    pub async fn query(&self, identity: &str, filter: &FeedbackFilter) -> Result<Vec<FeedbackEvent>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT id, identity, kind, rating, detail, payload, created_at
             FROM feedback WHERE identity = ?1 ORDER BY created_at ASC, id ASC",
        )?;
        let mut events: Vec<FeedbackEvent> = stmt
            .query_map(params![identity], row_to_event)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        if let Some(since) = filter.since {
            events.retain(|e| e.created_at >= since);
        }
        if let Some(kind) = filter.kind {
            events.retain(|e| e.kind == kind);
        }
        if let Some(limit) = filter.limit {
            if events.len() > limit {
                events.drain(..events.len() - limit);
            }
        }

        Ok(events)
    }

    /// Events recorded after the given watermark id, oldest first.
    /// This is the window a training run consumes.
    pub async fn query_after(&self, identity: &str, after_id: EventId) -> Result<Vec<FeedbackEvent>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT id, identity, kind, rating, detail, payload, created_at
             FROM feedback WHERE identity = ?1 AND id > ?2 ORDER BY id ASC",
        )?;
        let events = stmt
            .query_map(params![identity, after_id], row_to_event)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(events)
    }

    /// Aggregate counts and rates over the identity's feedback.
    pub async fn summary(
        &self,
        identity: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<FeedbackSummary> {
        let conn = self.conn.lock().await;
        let rows: Vec<(String, Option<f64>)> = match since {
            Some(ts) => {
                let mut stmt = conn.prepare_cached(
                    "SELECT kind, rating FROM feedback
                     WHERE identity = ?1 AND created_at >= ?2",
                )?;
                let rows = stmt
                    .query_map(params![identity, ts.to_rfc3339()], |row| {
                        Ok((row.get(0)?, row.get(1)?))
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                rows
            }
            None => {
                let mut stmt =
                    conn.prepare_cached("SELECT kind, rating FROM feedback WHERE identity = ?1")?;
                let rows = stmt
                    .query_map(params![identity], |row| Ok((row.get(0)?, row.get(1)?)))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                rows
            }
        };

        let mut summary = FeedbackSummary::default();
        let mut rating_sum = 0.0;
        for (kind, rating) in rows {
            summary.count += 1;
            match FeedbackKind::parse(&kind) {
                Some(FeedbackKind::Rating) => {
                    if let Some(r) = rating {
                        summary.rating_count += 1;
                        rating_sum += r;
                    }
                }
                Some(FeedbackKind::Error) => summary.error_count += 1,
                Some(FeedbackKind::SuccessMetric) => summary.success_count += 1,
                Some(FeedbackKind::Suggestion) => summary.suggestion_count += 1,
                None => {}
            }
        }
        if summary.rating_count > 0 {
            summary.avg_rating = Some(rating_sum / summary.rating_count as f64);
        }
        if summary.count > 0 {
            summary.error_rate = summary.error_count as f64 / summary.count as f64;
            summary.success_rate = summary.success_count as f64 / summary.count as f64;
        }

        Ok(summary)
    }

    /// Delete events older than `cutoff` across all identities.
    /// Returns the number of events removed.
    pub async fn prune_expired(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn.lock().await;
        let removed = conn.execute(
            "DELETE FROM feedback WHERE created_at < ?1",
            params![cutoff.to_rfc3339()],
        )?;
        Ok(removed)
    }
}

fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<FeedbackEvent> {
    let kind: String = row.get(2)?;
    let payload: Option<String> = row.get(5)?;
    let created: String = row.get(6)?;
    Ok(FeedbackEvent {
        id: row.get(0)?,
        identity: row.get(1)?,
        kind: FeedbackKind::parse(&kind).unwrap_or(FeedbackKind::Rating),
        rating: row.get(3)?,
        detail: row.get(4)?,
        payload: payload.and_then(|p| serde_json::from_str(&p).ok()),
        created_at: DateTime::parse_from_rfc3339(&created)
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}
