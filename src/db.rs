//! SQLite bootstrap shared by the feedback, version, and run stores
//!
//! One connection, wrapped in an async mutex, serves all three tables.
//! WAL mode keeps concurrent feedback writes cheap.

use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use crate::error::Result;

/// Handle to the training database. Cheap to clone via [`Database::connection`].
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the database at the given path and apply the schema.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let conn = Connection::open(path)?;

        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;
             PRAGMA foreign_keys=ON;",
        )?;

        Self::init_schema(&conn)?;

        info!("Training database ready at {:?}", path);

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory database for tests and dry runs.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS feedback (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                identity TEXT NOT NULL,
                kind TEXT NOT NULL,
                rating REAL,
                detail TEXT NOT NULL DEFAULT '',
                payload TEXT,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_feedback_identity
                ON feedback(identity, id);
            CREATE INDEX IF NOT EXISTS idx_feedback_created
                ON feedback(created_at);

            CREATE TABLE IF NOT EXISTS versions (
                identity TEXT NOT NULL,
                version INTEGER NOT NULL,
                body TEXT NOT NULL,
                status TEXT NOT NULL,
                strategy TEXT NOT NULL,
                metrics TEXT,
                created_at TEXT NOT NULL,
                deployed_at TEXT,
                PRIMARY KEY (identity, version)
            );

            CREATE INDEX IF NOT EXISTS idx_versions_status
                ON versions(identity, status);

            CREATE TABLE IF NOT EXISTS training_runs (
                id TEXT PRIMARY KEY,
                identity TEXT NOT NULL,
                strategy TEXT NOT NULL,
                window_start_id INTEGER,
                window_end_id INTEGER,
                feedback_count INTEGER NOT NULL DEFAULT 0,
                candidate_version INTEGER,
                evaluation TEXT,
                disposition TEXT,
                reason TEXT,
                started_at TEXT NOT NULL,
                finished_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_runs_identity
                ON training_runs(identity, started_at DESC);",
        )?;
        Ok(())
    }

    /// Shared connection handle for the stores.
    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        self.conn.clone()
    }
}
