use std::str::FromStr;
use tokio::sync::broadcast;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;
use tracing_subscriber::fmt::MakeWriter;

/// Capacity of the live log feed. Slow viewers past this see a lag notice.
pub const LOG_CHANNEL_CAPACITY: usize = 500;

/// Writes every formatted log line to stdout and to a broadcast channel
/// feeding `/api/logs` viewers.
#[derive(Clone)]
pub struct BroadcastMakeWriter {
    pub sender: broadcast::Sender<String>,
    pub suppress_stdout: bool,
}

impl<'a> MakeWriter<'a> for BroadcastMakeWriter {
    type Writer = BroadcastWriter;

    fn make_writer(&'a self) -> Self::Writer {
        BroadcastWriter {
            sender: self.sender.clone(),
            suppress_stdout: self.suppress_stdout,
        }
    }
}

pub struct BroadcastWriter {
    sender: broadcast::Sender<String>,
    suppress_stdout: bool,
}

impl std::io::Write for BroadcastWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let msg = String::from_utf8_lossy(buf).to_string();
        let _ = self.sender.send(msg); // no receivers is fine
        if !self.suppress_stdout {
            std::io::stdout().write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        if !self.suppress_stdout {
            std::io::stdout().flush()?;
        }
        Ok(())
    }
}

pub fn log_channel() -> broadcast::Sender<String> {
    broadcast::channel(LOG_CHANNEL_CAPACITY).0
}

/// Installs the global subscriber. Unknown levels fall back to INFO; a
/// second call is a no-op.
pub fn init(level: &str, log_tx: broadcast::Sender<String>, suppress_stdout: bool) {
    let level = Level::from_str(level).unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(BroadcastMakeWriter {
            sender: log_tx,
            suppress_stdout,
        })
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();
}
