mod jobs;
mod runs;
pub mod types;

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use rusqlite::Connection;
use tokio::fs;
use tokio::sync::Mutex;

/// Minimum and maximum allowed schedule interval, in minutes.
pub const MIN_INTERVAL_MINUTES: i64 = 5;
pub const MAX_INTERVAL_MINUTES: i64 = 1440;

/// Current wall-clock time as unix epoch milliseconds.
pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// SQLite-backed store for monitoring jobs and their runs. All access goes
/// through one connection behind an async mutex; the vault shares it.
pub struct Store {
    db: Arc<Mutex<Connection>>,
}

impl Store {
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            fs::create_dir_all(parent).await?;
        }

        let db = Connection::open(path)?;
        init_schema(&db)?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    /// In-memory store, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let db = Connection::open_in_memory()?;
        init_schema(&db)?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    pub(crate) async fn conn(&self) -> tokio::sync::MutexGuard<'_, Connection> {
        self.db.lock().await
    }

    /// Shared handle to the underlying connection (the vault piggybacks on
    /// the same database file).
    pub fn get_db(&self) -> Arc<Mutex<Connection>> {
        self.db.clone()
    }
}

fn init_schema(db: &Connection) -> Result<()> {
    db.execute(
        "CREATE TABLE IF NOT EXISTS monitoring_jobs (
            id TEXT PRIMARY KEY,
            org_id TEXT NOT NULL,
            name TEXT NOT NULL,
            job_type TEXT NOT NULL,
            schedule_interval_minutes INTEGER NOT NULL,
            enabled INTEGER NOT NULL DEFAULT 1,
            config TEXT NOT NULL DEFAULT '{}',
            notify_on TEXT NOT NULL DEFAULT 'issues',
            slack_channel_id TEXT,
            last_run_at INTEGER,
            next_run_at INTEGER,
            consecutive_failures INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL
        )",
        [],
    )?;

    db.execute(
        "CREATE TABLE IF NOT EXISTS monitoring_job_runs (
            id TEXT PRIMARY KEY,
            job_id TEXT NOT NULL,
            org_id TEXT NOT NULL,
            status TEXT NOT NULL,
            summary TEXT NOT NULL DEFAULT '',
            findings TEXT NOT NULL DEFAULT '[]',
            error_message TEXT,
            alert_sent INTEGER NOT NULL DEFAULT 0,
            alert_severity TEXT,
            started_at INTEGER NOT NULL,
            completed_at INTEGER,
            duration_ms INTEGER
        )",
        [],
    )?;

    db.execute(
        "CREATE INDEX IF NOT EXISTS idx_runs_job ON monitoring_job_runs (job_id, status)",
        [],
    )?;
    db.execute(
        "CREATE INDEX IF NOT EXISTS idx_jobs_due ON monitoring_jobs (enabled, next_run_at)",
        [],
    )?;

    Ok(())
}
