mod jobs;
mod output;
pub mod types;

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::info;

pub use jobs::DEFAULT_PAGE_SIZE;
pub use types::{JobPage, JobRecord, JobStatus, OutputLineRecord};

/// How long a connection waits on another writer's lock before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite-backed job queue and output log.
///
/// The worker and the web server may open the same database file from
/// different processes. Claim atomicity comes from SQLite's write lock, not
/// from the in-process mutex.
#[derive(Clone)]
pub struct JobStore {
    db: Arc<Mutex<Connection>>,
    db_path: PathBuf,
}

impl JobStore {
    pub async fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let db = Connection::open(&db_path)
            .with_context(|| format!("opening database {}", db_path.display()))?;
        db.busy_timeout(BUSY_TIMEOUT)?;
        db.pragma_update(None, "journal_mode", "WAL")?;

        let store = Self {
            db: Arc::new(Mutex::new(db)),
            db_path,
        };
        store.init().await?;
        info!("Job store ready at {}", store.db_path.display());
        Ok(store)
    }

    async fn init(&self) -> Result<()> {
        let db = self.db.lock().await;

        db.execute(
            "CREATE TABLE IF NOT EXISTS jobs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                prompt TEXT NOT NULL,
                status TEXT NOT NULL,
                response TEXT NOT NULL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        db.execute(
            "CREATE TABLE IF NOT EXISTS job_output (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id INTEGER NOT NULL,
                seq INTEGER NOT NULL,
                category TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                UNIQUE(job_id, seq)
            )",
            [],
        )?;

        db.execute(
            "CREATE INDEX IF NOT EXISTS idx_jobs_status_id ON jobs(status, id)",
            [],
        )?;

        // Recording columns arrived after the first schema; add them in place.
        ensure_column(&db, "jobs", "cast_start", "REAL")?;
        ensure_column(&db, "jobs", "cast_end", "REAL")?;
        ensure_column(&db, "jobs", "cast_path", "TEXT")?;

        Ok(())
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }
}

/// LIMIT/OFFSET bind value. SQLite takes signed 64-bit integers, so anything
/// larger is pinned to `i64::MAX` (an empty window) instead of wrapping.
fn sql_bound(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn ensure_column(db: &Connection, table: &str, name: &str, column_type: &str) -> Result<()> {
    let mut stmt = db.prepare(&format!("PRAGMA table_info({table})"))?;
    let columns = stmt.query_map([], |row| row.get::<_, String>(1))?;
    for column in columns {
        if column? == name {
            return Ok(());
        }
    }
    db.execute(
        &format!("ALTER TABLE {table} ADD COLUMN {name} {column_type}"),
        [],
    )?;
    Ok(())
}

/// Open a store in a fresh temporary directory. The directory is leaked on
/// purpose so the database outlives the helper.
#[cfg(test)]
pub async fn test_store() -> JobStore {
    let dir = tempfile::tempdir().expect("create temp dir").keep();
    JobStore::open(dir.join("db.sqlite3"))
        .await
        .expect("open test store")
}
