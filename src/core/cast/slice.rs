use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncSeekExt, AsyncWriteExt, BufReader, BufWriter};
use tracing::debug;

use super::{CastError, parse_event};

const TAIL_CHUNK_SIZE: u64 = 4096;

/// Timestamp of the last event in the recording, or `None` when the file is
/// missing, empty, or its last line is not an event.
pub async fn capture_mark(path: &Path) -> Option<f64> {
    let line = match tail_line(path).await {
        Ok(Some(line)) => line,
        Ok(None) => return None,
        Err(e) => {
            debug!("No cast mark from {}: {}", path.display(), e);
            return None;
        }
    };
    parse_event(&line).map(|(ts, _)| ts)
}

/// Reads the last non-empty line of a file by walking backwards from the end
/// in fixed-size chunks.
pub async fn tail_line(path: &Path) -> std::io::Result<Option<String>> {
    let mut file = File::open(path).await?;
    let (line, _) = read_last_line(&mut file, TAIL_CHUNK_SIZE).await?;
    Ok(line)
}

/// Returns the last line and the number of chunks read to find it. Reading
/// stops once the buffer, minus trailing newlines, holds a full line.
async fn read_last_line(file: &mut File, chunk_size: u64) -> std::io::Result<(Option<String>, usize)> {
    let size = file.metadata().await?.len();
    let mut buf: Vec<u8> = Vec::new();
    let mut offset = size;
    let mut chunks = 0;

    while offset > 0 {
        let read_size = chunk_size.min(offset);
        offset -= read_size;
        let mut chunk = vec![0u8; read_size as usize];
        file.seek(SeekFrom::Start(offset)).await?;
        file.read_exact(&mut chunk).await?;
        chunks += 1;
        chunk.extend_from_slice(&buf);
        buf = chunk;
        if trim_newlines(&buf).contains(&b'\n') {
            break;
        }
    }

    let trimmed = trim_newlines(&buf);
    if trimmed.is_empty() {
        return Ok((None, chunks));
    }
    let line = match trimmed.iter().rposition(|b| *b == b'\n') {
        Some(idx) => &trimmed[idx + 1..],
        None => trimmed,
    };
    Ok((Some(String::from_utf8_lossy(line).into_owned()), chunks))
}

fn trim_newlines(buf: &[u8]) -> &[u8] {
    let end = buf
        .iter()
        .rposition(|b| *b != b'\n' && *b != b'\r')
        .map_or(0, |idx| idx + 1);
    &buf[..end]
}

/// Writes a standalone recording holding the events of `source` whose
/// timestamps fall within `[start, end]`, rebased so the window starts at 0.
///
/// The clip is assembled in a sibling temp file and renamed over `dest`, so a
/// reader of `dest` sees either the previous clip or the complete new one.
pub async fn slice(source: &Path, dest: &Path, start: f64, end: f64) -> Result<(), CastError> {
    if end < start {
        return Err(CastError::EndBeforeStart { start, end });
    }
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let tmp_path = temp_path_for(dest);
    let result = write_slice(source, &tmp_path, start, end).await;
    match result {
        Ok(()) => {
            tokio::fs::rename(&tmp_path, dest).await?;
            Ok(())
        }
        Err(e) => {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            Err(e)
        }
    }
}

fn temp_path_for(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}

async fn write_slice(source: &Path, tmp_path: &Path, start: f64, end: f64) -> Result<(), CastError> {
    let mut reader = BufReader::new(File::open(source).await?);
    let mut line = Vec::new();

    if reader.read_until(b'\n', &mut line).await? == 0 {
        return Err(CastError::EmptySource(source.to_path_buf()));
    }

    let file = File::create(tmp_path).await?;
    let mut out = BufWriter::new(file);
    out.write_all(trim_newlines(&line)).await?;
    out.write_all(b"\n").await?;

    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line).await? == 0 {
            break;
        }
        let Ok(text) = std::str::from_utf8(trim_newlines(&line)) else {
            continue;
        };
        let text = text.trim();
        if text.is_empty() {
            continue;
        }
        let Some((ts, mut fields)) = parse_event(text) else {
            continue;
        };
        if ts < start {
            continue;
        }
        // Events are time ordered; nothing later can fall back inside the window.
        if ts > end {
            break;
        }
        fields[0] = serde_json::json!(ts - start);
        let Ok(encoded) = serde_json::to_string(&fields) else {
            continue;
        };
        out.write_all(encoded.as_bytes()).await?;
        out.write_all(b"\n").await?;
    }

    out.flush().await?;
    let file = out.into_inner();
    file.sync_all().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const HEADER: &str = r#"{"version":3,"term":{"cols":80,"rows":24}}"#;

    fn write_cast(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("live.cast");
        std::fs::write(&path, body).unwrap();
        path
    }

    fn event_times(path: &Path) -> Vec<f64> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .skip(1)
            .map(|line| parse_event(line).unwrap().0)
            .collect()
    }

    #[tokio::test]
    async fn capture_mark_reads_last_event() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_cast(
            dir.path(),
            &format!("{HEADER}\n[0.1,\"o\",\"a\"]\n[2.75,\"o\",\"b\"]\n\n"),
        );
        assert_eq!(capture_mark(&path).await, Some(2.75));
    }

    #[tokio::test]
    async fn capture_mark_is_unavailable_for_missing_empty_or_header_only() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(capture_mark(&dir.path().join("nope.cast")).await, None);
        let empty = write_cast(dir.path(), "");
        assert_eq!(capture_mark(&empty).await, None);
        let header_only = write_cast(dir.path(), &format!("{HEADER}\n"));
        assert_eq!(capture_mark(&header_only).await, None);
    }

    #[tokio::test]
    async fn tail_line_handles_files_without_newlines() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_cast(dir.path(), "[1.0,\"o\",\"x\"]");
        assert_eq!(
            tail_line(&path).await.unwrap().as_deref(),
            Some("[1.0,\"o\",\"x\"]")
        );
        let crlf = write_cast(dir.path(), "first\r\nsecond\r\n");
        assert_eq!(tail_line(&crlf).await.unwrap().as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn tail_of_large_recording_reads_a_bounded_number_of_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.cast");
        {
            let mut file = std::io::BufWriter::new(std::fs::File::create(&path).unwrap());
            writeln!(file, "{HEADER}").unwrap();
            let mut ts = 0.0;
            let mut written = 0usize;
            while written < 10 * 1024 * 1024 {
                ts += 0.01;
                let line = format!("[{ts:.3},\"o\",\"{}\"]\n", "x".repeat(60));
                written += line.len();
                file.write_all(line.as_bytes()).unwrap();
            }
            writeln!(file, "[99999.5,\"o\",\"last\"]").unwrap();
        }

        let mut file = File::open(&path).await.unwrap();
        let (line, chunks) = read_last_line(&mut file, TAIL_CHUNK_SIZE).await.unwrap();
        assert_eq!(line.as_deref(), Some("[99999.5,\"o\",\"last\"]"));
        assert!(chunks <= 2, "read {chunks} chunks");
        assert_eq!(capture_mark(&path).await, Some(99999.5));
    }

    #[tokio::test]
    async fn last_line_longer_than_a_chunk_is_returned_whole() {
        let dir = tempfile::tempdir().unwrap();
        let long = format!("[5.0,\"o\",\"{}\"]", "y".repeat(10_000));
        let path = write_cast(dir.path(), &format!("{HEADER}\n[1.0,\"o\",\"a\"]\n{long}\n"));
        assert_eq!(tail_line(&path).await.unwrap(), Some(long));
        assert_eq!(capture_mark(&path).await, Some(5.0));
    }

    #[tokio::test]
    async fn slice_keeps_window_and_rebases_to_zero() {
        let dir = tempfile::tempdir().unwrap();
        let src = write_cast(
            dir.path(),
            &format!(
                "{HEADER}\n[0.1,\"o\",\"a\"]\n[0.5,\"o\",\"b\"]\n[1.2,\"o\",\"c\"]\n[2.0,\"o\",\"d\"]\n"
            ),
        );
        let dst = dir.path().join("requests").join("1.cast");

        slice(&src, &dst, 0.5, 1.2).await.unwrap();

        let text = std::fs::read_to_string(&dst).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some(HEADER));
        let times = event_times(&dst);
        assert_eq!(times.len(), 2);
        assert_eq!(times[0], 0.0);
        assert!((times[1] - 0.7).abs() < 1e-9);
        assert!(text.contains("\"b\""));
        assert!(text.contains("\"c\""));
        assert!(!dir.path().join("requests").join("1.cast.tmp").exists());
    }

    #[tokio::test]
    async fn slice_skips_garbage_lines() {
        let dir = tempfile::tempdir().unwrap();
        let src = write_cast(
            dir.path(),
            &format!("{HEADER}\n[1.0,\"o\",\"a\"]\n{{broken\n\n[1.5,\"o\",\"b\"]\n"),
        );
        let dst = dir.path().join("out.cast");
        slice(&src, &dst, 1.0, 2.0).await.unwrap();
        assert_eq!(event_times(&dst), vec![0.0, 0.5]);
    }

    #[tokio::test]
    async fn slice_rejects_inverted_window_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        let src = write_cast(dir.path(), &format!("{HEADER}\n[1.0,\"o\",\"a\"]\n"));
        let dst = dir.path().join("requests").join("9.cast");

        let err = slice(&src, &dst, 2.0, 1.0).await.unwrap_err();
        assert!(matches!(err, CastError::EndBeforeStart { .. }));
        assert!(!dst.exists());
        assert!(!dir.path().join("requests").exists());
    }

    #[tokio::test]
    async fn slice_of_empty_source_fails() {
        let dir = tempfile::tempdir().unwrap();
        let src = write_cast(dir.path(), "");
        let dst = dir.path().join("out.cast");
        let err = slice(&src, &dst, 0.0, 1.0).await.unwrap_err();
        assert!(matches!(err, CastError::EmptySource(_)));
        assert!(!dst.exists());
    }

    #[tokio::test]
    async fn reslicing_replaces_the_clip_deterministically() {
        let dir = tempfile::tempdir().unwrap();
        let src = write_cast(
            dir.path(),
            &format!("{HEADER}\n[0.2,\"o\",\"a\"]\n[0.4,\"o\",\"b\"]\n[0.9,\"o\",\"c\"]\n"),
        );
        let dst = dir.path().join("clip.cast");
        std::fs::write(&dst, "stale contents that are much longer than the new clip\n".repeat(50))
            .unwrap();

        slice(&src, &dst, 0.2, 0.4).await.unwrap();
        let first = std::fs::read(&dst).unwrap();
        slice(&src, &dst, 0.2, 0.4).await.unwrap();
        let second = std::fs::read(&dst).unwrap();
        assert_eq!(first, second);
        assert!(!String::from_utf8(first).unwrap().contains("stale"));
    }

    #[tokio::test]
    async fn readers_never_observe_a_partial_clip() {
        let dir = tempfile::tempdir().unwrap();
        let mut body = format!("{HEADER}\n");
        for i in 0..5000 {
            body.push_str(&format!("[{}.0,\"o\",\"line {i}\"]\n", i));
        }
        let src = write_cast(dir.path(), &body);
        let dst = dir.path().join("clip.cast");
        slice(&src, &dst, 0.0, 4999.0).await.unwrap();
        let expected = std::fs::read(&dst).unwrap();

        let writer = tokio::spawn({
            let src = src.clone();
            let dst = dst.clone();
            async move {
                for _ in 0..20 {
                    slice(&src, &dst, 0.0, 4999.0).await.unwrap();
                }
            }
        });
        while !writer.is_finished() {
            let seen = tokio::fs::read(&dst).await.unwrap();
            assert_eq!(seen.len(), expected.len());
            tokio::task::yield_now().await;
        }
        writer.await.unwrap();
    }
}
