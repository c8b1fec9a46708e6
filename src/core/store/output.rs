use anyhow::{Result, bail};
use rusqlite::params;

use super::{JobStore, sql_bound};
use super::types::{JobStatus, OutputLineRecord};

impl JobStore {
    /// Appends one classified output record. Rejected unless the job is
    /// currently `processing`, so finished jobs never grow new output.
    pub async fn add_output_line(
        &self,
        job_id: i64,
        seq: i64,
        category: &str,
        content: &str,
    ) -> Result<()> {
        let db = self.db.lock().await;
        let inserted = db.execute(
            "INSERT INTO job_output (job_id, seq, category, content)
             SELECT ?1, ?2, ?3, ?4
             WHERE EXISTS (SELECT 1 FROM jobs WHERE id = ?1 AND status = ?5)",
            params![job_id, seq, category, content, JobStatus::Processing],
        )?;
        if inserted == 0 {
            bail!("job {job_id} is not processing; output line {seq} dropped");
        }
        Ok(())
    }

    /// Output records for one job in sequence order, plus the job's total count.
    pub async fn get_output_lines(
        &self,
        job_id: i64,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<OutputLineRecord>, usize)> {
        let db = self.db.lock().await;
        let total: i64 = db.query_row(
            "SELECT COUNT(*) FROM job_output WHERE job_id = ?1",
            params![job_id],
            |row| row.get(0),
        )?;
        let mut stmt = db.prepare(
            "SELECT id, job_id, seq, category, content, created_at
             FROM job_output WHERE job_id = ?1
             ORDER BY seq ASC LIMIT ?2 OFFSET ?3",
        )?;
        let rows = stmt.query_map(params![job_id, sql_bound(limit), sql_bound(offset)], |row| {
            Ok(OutputLineRecord {
                id: row.get(0)?,
                job_id: row.get(1)?,
                seq: row.get(2)?,
                category: row.get(3)?,
                content: row.get(4)?,
                created_at: row.get(5)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok((out, total as usize))
    }
}
