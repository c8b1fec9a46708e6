//! Terminal recording (asciicast v3) helpers.
//!
//! The live recording is written by an external recorder for the whole life
//! of the worker. Nothing here ever writes to it: we read its tail for time
//! marks, carve per-job replay clips out of it, and stream it to viewers.

mod slice;
mod tail;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub use slice::{capture_mark, slice, tail_line};
pub use tail::tail_cast;

/// Sub-directory of the cast directory holding per-job replay clips.
pub const JOB_CAST_FOLDER: &str = "requests";

#[derive(Debug, Error)]
pub enum CastError {
    #[error("cast end {end} is before start {start}")]
    EndBeforeStart { start: f64, end: f64 },
    #[error("cast source {} is empty", .0.display())]
    EmptySource(PathBuf),
    #[error("cast io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Terminal geometry announced by a recording header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermSize {
    pub cols: u32,
    pub rows: u32,
}

#[derive(Debug, Deserialize)]
struct CastHeader {
    version: u32,
    term: TermSize,
}

/// Parses a version 3 header line. Anything else (older versions, missing or
/// zero geometry, not JSON) yields `None`.
pub fn parse_v3_header(line: &str) -> Option<TermSize> {
    let header: CastHeader = serde_json::from_str(line).ok()?;
    if header.version == 3 && header.term.cols > 0 && header.term.rows > 0 {
        Some(header.term)
    } else {
        None
    }
}

/// Decodes an event line into its fields and leading timestamp.
fn parse_event(line: &str) -> Option<(f64, Vec<serde_json::Value>)> {
    let fields: Vec<serde_json::Value> = serde_json::from_str(line).ok()?;
    if fields.len() < 2 {
        return None;
    }
    let ts = fields[0].as_f64()?;
    Some((ts, fields))
}

/// Clip location relative to the cast directory, as stored on the job row.
pub fn job_cast_rel(job_id: i64) -> String {
    format!("{JOB_CAST_FOLDER}/{job_id}.cast")
}

pub fn job_cast_path(cast_dir: &Path, job_id: i64) -> PathBuf {
    cast_dir.join(JOB_CAST_FOLDER).join(format!("{job_id}.cast"))
}
