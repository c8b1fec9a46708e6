use std::path::PathBuf;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::debug;

use super::parse_v3_header;

/// Follows a growing recording and pushes one payload per line to `tx`.
///
/// The first line is replaced by a `{"cols","rows"}` payload when it is a v3
/// header. At EOF the tailer sleeps `poll` and retries; a line the writer has
/// only partly flushed is held back until its newline arrives. Returns once
/// the receiver is dropped, or with the read error that ended the feed.
pub async fn tail_cast(path: PathBuf, tx: mpsc::Sender<String>, poll: Duration) -> std::io::Result<()> {
    let file = File::open(&path).await?;
    let mut reader = BufReader::new(file);
    let mut pending: Vec<u8> = Vec::new();
    let mut first = true;

    loop {
        if tx.is_closed() {
            debug!("Viewer of {} went away", path.display());
            return Ok(());
        }

        let n = reader.read_until(b'\n', &mut pending).await?;
        if n == 0 || pending.last() != Some(&b'\n') {
            tokio::select! {
                _ = tokio::time::sleep(poll) => {}
                _ = tx.closed() => {}
            }
            continue;
        }

        let text = String::from_utf8_lossy(&pending).trim_end_matches(['\n', '\r']).to_string();
        pending.clear();
        if text.trim().is_empty() {
            continue;
        }

        let payload = if first {
            first = false;
            match parse_v3_header(&text) {
                Some(term) => serde_json::to_string(&term).unwrap_or(text),
                None => text,
            }
        } else {
            text
        };

        if tx.send(payload).await.is_err() {
            return Ok(());
        }
    }
}
