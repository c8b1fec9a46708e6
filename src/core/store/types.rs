use serde::{Deserialize, Serialize};

/// Lifecycle state of a job row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Processed,
    Error,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Processed => "processed",
            JobStatus::Error => "error",
        }
    }

    pub fn from_status(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(JobStatus::Pending),
            "processing" => Some(JobStatus::Processing),
            "processed" => Some(JobStatus::Processed),
            "error" => Some(JobStatus::Error),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Processed | JobStatus::Error)
    }
}

/// A submitted prompt and its processing state.
#[derive(Debug, Clone, Serialize)]
pub struct JobRecord {
    pub id: i64,
    pub prompt: String,
    pub status: JobStatus,
    pub response: String,
    pub created_at: String,
    pub updated_at: String,
    /// Recording timestamp captured right before the agent was launched.
    pub cast_start: Option<f64>,
    pub cast_end: Option<f64>,
    /// Replay clip location relative to the cast directory, e.g. `requests/7.cast`.
    pub cast_path: Option<String>,
}

/// One classified fragment of an agent's event stream.
#[derive(Debug, Clone, Serialize)]
pub struct OutputLineRecord {
    pub id: i64,
    pub job_id: i64,
    pub seq: i64,
    pub category: String,
    pub content: String,
    pub created_at: String,
}

/// A page of jobs for list views, newest first.
#[derive(Debug, Clone, Serialize)]
pub struct JobPage {
    pub requests: Vec<JobRecord>,
    pub page: usize,
    pub pages: usize,
    pub total: usize,
}

impl rusqlite::types::ToSql for JobStatus {
    fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
        Ok(rusqlite::types::ToSqlOutput::from(self.as_str()))
    }
}

impl rusqlite::types::FromSql for JobStatus {
    fn column_result(value: rusqlite::types::ValueRef<'_>) -> rusqlite::types::FromSqlResult<Self> {
        let raw = value.as_str()?;
        JobStatus::from_status(raw).ok_or_else(|| {
            rusqlite::types::FromSqlError::Other(format!("unknown job status '{raw}'").into())
        })
    }
}
