use anyhow::Result;
use rusqlite::{OptionalExtension, Row, TransactionBehavior, params};

use super::{JobStore, sql_bound};
use super::types::{JobPage, JobRecord, JobStatus};

const JOB_COLUMNS: &str =
    "id, prompt, status, response, created_at, updated_at, cast_start, cast_end, cast_path";

/// Page size used when a caller asks for zero or a negative count.
pub const DEFAULT_PAGE_SIZE: usize = 10;

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<JobRecord> {
    Ok(JobRecord {
        id: row.get(0)?,
        prompt: row.get(1)?,
        status: row.get(2)?,
        response: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
        cast_start: row.get(6)?,
        cast_end: row.get(7)?,
        cast_path: row.get(8)?,
    })
}

impl JobStore {
    pub async fn create_job(&self, prompt: &str) -> Result<JobRecord> {
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO jobs (prompt, status, response) VALUES (?1, ?2, '')",
            params![prompt, JobStatus::Pending],
        )?;
        let id = db.last_insert_rowid();
        let job = db.query_row(
            &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
            params![id],
            job_from_row,
        )?;
        Ok(job)
    }

    pub async fn get_job(&self, id: i64) -> Result<Option<JobRecord>> {
        let db = self.db.lock().await;
        let job = db
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
                params![id],
                job_from_row,
            )
            .optional()?;
        Ok(job)
    }

    pub async fn get_processing_job(&self) -> Result<Option<JobRecord>> {
        let db = self.db.lock().await;
        let job = db
            .query_row(
                &format!(
                    "SELECT {JOB_COLUMNS} FROM jobs WHERE status = ?1 ORDER BY id DESC LIMIT 1"
                ),
                params![JobStatus::Processing],
                job_from_row,
            )
            .optional()?;
        Ok(job)
    }

    /// Returns one window of jobs, newest first, plus the total job count.
    pub async fn list_jobs(&self, offset: usize, limit: usize) -> Result<(Vec<JobRecord>, usize)> {
        let db = self.db.lock().await;
        let total: i64 = db.query_row("SELECT COUNT(*) FROM jobs", [], |row| row.get(0))?;
        let mut stmt = db.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs ORDER BY id DESC LIMIT ?1 OFFSET ?2"
        ))?;
        let rows = stmt.query_map(params![sql_bound(limit), sql_bound(offset)], job_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok((out, total as usize))
    }

    pub async fn count_jobs(&self) -> Result<usize> {
        let db = self.db.lock().await;
        let total: i64 = db.query_row("SELECT COUNT(*) FROM jobs", [], |row| row.get(0))?;
        Ok(total as usize)
    }

    /// 1-based paging over [`list_jobs`](Self::list_jobs). `page` is clamped
    /// to `[1, pages]` before the offset is computed.
    pub async fn list_page(&self, page: usize, page_size: usize) -> Result<JobPage> {
        let page_size = if page_size == 0 {
            DEFAULT_PAGE_SIZE
        } else {
            page_size
        };
        let pages = self.count_jobs().await?.div_ceil(page_size).max(1);
        let page = page.clamp(1, pages);
        let offset = (page - 1).saturating_mul(page_size);
        let (requests, total) = self.list_jobs(offset, page_size).await?;
        Ok(JobPage {
            requests,
            page,
            pages: total.div_ceil(page_size).max(1),
            total,
        })
    }

    /// Moves the oldest pending job to `processing` and returns it.
    ///
    /// The select and the update share one IMMEDIATE transaction: SQLite takes
    /// the database write lock at BEGIN, so two claimers (in this process or
    /// another) can never both observe the same pending row. Dropping the
    /// transaction on any early return rolls it back.
    pub async fn claim_next_pending(&self) -> Result<Option<JobRecord>> {
        let mut db = self.db.lock().await;
        let tx = db.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let id: Option<i64> = tx
            .query_row(
                "SELECT id FROM jobs WHERE status = ?1 ORDER BY id LIMIT 1",
                params![JobStatus::Pending],
                |row| row.get(0),
            )
            .optional()?;
        let Some(id) = id else {
            return Ok(None);
        };

        tx.execute(
            "UPDATE jobs SET status = ?1, updated_at = CURRENT_TIMESTAMP
             WHERE id = ?2 AND status = ?3",
            params![JobStatus::Processing, id, JobStatus::Pending],
        )?;
        let job = tx.query_row(
            &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
            params![id],
            job_from_row,
        )?;
        tx.commit()?;
        Ok(Some(job))
    }

    pub async fn update_job(&self, id: i64, status: JobStatus, response: &str) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "UPDATE jobs SET status = ?1, response = ?2, updated_at = CURRENT_TIMESTAMP
             WHERE id = ?3",
            params![status, response, id],
        )?;
        Ok(())
    }

    pub async fn update_job_start_mark(&self, id: i64, mark: f64) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "UPDATE jobs SET cast_start = ?1, updated_at = CURRENT_TIMESTAMP WHERE id = ?2",
            params![mark, id],
        )?;
        Ok(())
    }

    /// Terminal write-back: status, response and whatever recording data the
    /// run produced, in one statement.
    pub async fn update_job_final(
        &self,
        id: i64,
        status: JobStatus,
        response: &str,
        end_mark: Option<f64>,
        cast_path: Option<&str>,
    ) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "UPDATE jobs
             SET status = ?1, response = ?2, cast_end = ?3, cast_path = ?4,
                 updated_at = CURRENT_TIMESTAMP
             WHERE id = ?5",
            params![status, response, end_mark, cast_path, id],
        )?;
        Ok(())
    }

    /// Marks every job still in `processing` as `error`. Only one worker runs
    /// per database, so at worker start such rows were orphaned by a crash.
    pub async fn fail_orphaned_jobs(&self, response: &str) -> Result<usize> {
        let db = self.db.lock().await;
        let rows = db.execute(
            "UPDATE jobs SET status = ?1, response = ?2, updated_at = CURRENT_TIMESTAMP
             WHERE status = ?3",
            params![JobStatus::Error, response, JobStatus::Processing],
        )?;
        Ok(rows)
    }
}
