use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

pub const DEFAULT_CONFIG_FILE: &str = "promptcast.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    #[serde(default = "default_api_host")]
    pub api_host: String,
    #[serde(default = "default_api_port")]
    pub api_port: u16,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_tail_interval_ms")]
    pub tail_interval_ms: u64,
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub agent: AgentSettings,
    #[serde(default)]
    pub recording: RecordingSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentSettings {
    #[serde(default = "default_agent_bin")]
    pub bin: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_reasoning")]
    pub reasoning: String,
    /// Working directory for the agent; inherits the worker's when unset.
    #[serde(default)]
    pub workdir: Option<PathBuf>,
    /// Shell snippet run instead of the agent binary, prompt in `$1`.
    #[serde(default)]
    pub script: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecordingSettings {
    /// Defaults to `casts/` next to the database.
    #[serde(default)]
    pub cast_dir: Option<PathBuf>,
    #[serde(default = "default_live_cast_name")]
    pub live_cast_name: String,
    #[serde(default = "default_tmux_bin")]
    pub tmux_bin: String,
    #[serde(default = "default_session")]
    pub session: String,
    #[serde(default)]
    pub asciinema_bin: Option<String>,
    #[serde(default = "default_cols")]
    pub cols: u32,
    #[serde(default = "default_rows")]
    pub rows: u32,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("db.sqlite3")
}
fn default_api_host() -> String {
    "127.0.0.1".to_string()
}
fn default_api_port() -> u16 {
    55136
}
fn default_poll_interval_ms() -> u64 {
    2000
}
fn default_tail_interval_ms() -> u64 {
    250
}
fn default_shutdown_grace_secs() -> u64 {
    10
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_agent_bin() -> String {
    "codex".to_string()
}
fn default_model() -> String {
    "gpt-5.2-codex".to_string()
}
fn default_reasoning() -> String {
    "high".to_string()
}
fn default_live_cast_name() -> String {
    "live.cast".to_string()
}
fn default_tmux_bin() -> String {
    "tmux".to_string()
}
fn default_session() -> String {
    "promptcast-worker".to_string()
}
fn default_cols() -> u32 {
    80
}
fn default_rows() -> u32 {
    72
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            api_host: default_api_host(),
            api_port: default_api_port(),
            poll_interval_ms: default_poll_interval_ms(),
            tail_interval_ms: default_tail_interval_ms(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
            log_level: default_log_level(),
            agent: AgentSettings::default(),
            recording: RecordingSettings::default(),
        }
    }
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            bin: default_agent_bin(),
            model: default_model(),
            reasoning: default_reasoning(),
            workdir: None,
            script: None,
        }
    }
}

impl Default for RecordingSettings {
    fn default() -> Self {
        Self {
            cast_dir: None,
            live_cast_name: default_live_cast_name(),
            tmux_bin: default_tmux_bin(),
            session: default_session(),
            asciinema_bin: None,
            cols: default_cols(),
            rows: default_rows(),
        }
    }
}

/// Values given on the command line; each one that is set wins over the file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    pub db_path: Option<PathBuf>,
    pub api_host: Option<String>,
    pub api_port: Option<u16>,
    pub poll_interval_ms: Option<u64>,
    pub log_level: Option<String>,
    pub agent_bin: Option<String>,
    pub model: Option<String>,
    pub reasoning: Option<String>,
    pub workdir: Option<PathBuf>,
    pub agent_script: Option<String>,
    pub cast_dir: Option<PathBuf>,
    pub cols: Option<u32>,
    pub rows: Option<u32>,
    pub session: Option<String>,
}

impl Settings {
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            info!("No {} found, using defaults.", path.display());
            return Ok(Self::default());
        }
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        let settings: Settings =
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
        info!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    pub fn apply(&mut self, o: &Overrides) {
        if let Some(v) = &o.db_path {
            self.db_path = v.clone();
        }
        if let Some(v) = &o.api_host {
            self.api_host = v.clone();
        }
        if let Some(v) = o.api_port {
            self.api_port = v;
        }
        if let Some(v) = o.poll_interval_ms {
            self.poll_interval_ms = v;
        }
        if let Some(v) = &o.log_level {
            self.log_level = v.clone();
        }
        if let Some(v) = &o.agent_bin {
            self.agent.bin = v.clone();
        }
        if let Some(v) = &o.model {
            self.agent.model = v.clone();
        }
        if let Some(v) = &o.reasoning {
            self.agent.reasoning = v.clone();
        }
        if let Some(v) = &o.workdir {
            self.agent.workdir = Some(v.clone());
        }
        if let Some(v) = &o.agent_script {
            self.agent.script = Some(v.clone());
        }
        if let Some(v) = &o.cast_dir {
            self.recording.cast_dir = Some(v.clone());
        }
        if let Some(v) = o.cols {
            self.recording.cols = v;
        }
        if let Some(v) = o.rows {
            self.recording.rows = v;
        }
        if let Some(v) = &o.session {
            self.recording.session = v.clone();
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            bail!("poll_interval_ms must be greater than zero");
        }
        if self.tail_interval_ms == 0 {
            bail!("tail_interval_ms must be greater than zero");
        }
        if self.agent.model.trim().is_empty() {
            bail!("agent.model must not be empty");
        }
        if self.agent.script.as_deref().is_some_and(|s| s.trim().is_empty()) {
            bail!("agent.script must not be empty when set");
        }
        if self.agent.bin.trim().is_empty() {
            bail!("agent.bin must not be empty");
        }
        if self.recording.cols == 0 || self.recording.rows == 0 {
            bail!("recording.cols and recording.rows must be greater than zero");
        }
        if self.recording.live_cast_name.contains('/') {
            bail!("recording.live_cast_name must be a bare file name");
        }
        if !matches!(
            self.log_level.to_ascii_lowercase().as_str(),
            "trace" | "debug" | "info" | "warn" | "error"
        ) {
            bail!("unknown log_level '{}'", self.log_level);
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn tail_interval(&self) -> Duration {
        Duration::from_millis(self.tail_interval_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn api_addr(&self) -> String {
        format!("{}:{}", self.api_host, self.api_port)
    }

    fn db_dir(&self) -> PathBuf {
        match self.db_path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    pub fn cast_dir(&self) -> PathBuf {
        self.recording
            .cast_dir
            .clone()
            .unwrap_or_else(|| self.db_dir().join("casts"))
    }

    pub fn live_cast_path(&self) -> PathBuf {
        self.cast_dir().join(&self.recording.live_cast_name)
    }

    /// The configured recorder, else a project-local virtualenv install,
    /// else whatever `asciinema` is on PATH.
    pub fn asciinema_bin(&self) -> String {
        if let Some(bin) = &self.recording.asciinema_bin {
            return bin.clone();
        }
        let venv = self.db_dir().join(".venv").join("bin").join("asciinema");
        if venv.exists() {
            return venv.to_string_lossy().into_owned();
        }
        "asciinema".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(dir.path().join("none.toml")).await.unwrap();
        assert_eq!(settings.api_port, 55136);
        assert_eq!(settings.poll_interval(), Duration::from_secs(2));
        assert_eq!(settings.agent.model, "gpt-5.2-codex");
        assert_eq!(settings.recording.rows, 72);
        assert_eq!(settings.cast_dir(), PathBuf::from("./casts"));
        settings.validate().unwrap();
    }

    #[tokio::test]
    async fn file_values_apply_and_keep_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("promptcast.toml");
        std::fs::write(
            &path,
            r#"
db_path = "/srv/pc/db.sqlite3"
poll_interval_ms = 500

[agent]
model = "other-model"

[recording]
session = "rec"
"#,
        )
        .unwrap();

        let settings = Settings::load(&path).await.unwrap();
        assert_eq!(settings.poll_interval_ms, 500);
        assert_eq!(settings.agent.model, "other-model");
        assert_eq!(settings.agent.reasoning, "high");
        assert_eq!(settings.recording.session, "rec");
        assert_eq!(settings.cast_dir(), PathBuf::from("/srv/pc/casts"));
        assert_eq!(
            settings.live_cast_path(),
            PathBuf::from("/srv/pc/casts/live.cast")
        );
    }

    #[test]
    fn overrides_win_over_file_values() {
        let mut settings = Settings::default();
        settings.apply(&Overrides {
            api_port: Some(9000),
            model: Some("m2".into()),
            agent_script: Some("cat".into()),
            cast_dir: Some(PathBuf::from("/tmp/c")),
            ..Default::default()
        });
        assert_eq!(settings.api_addr(), "127.0.0.1:9000");
        assert_eq!(settings.agent.model, "m2");
        assert_eq!(settings.agent.script.as_deref(), Some("cat"));
        assert_eq!(settings.live_cast_path(), PathBuf::from("/tmp/c/live.cast"));
    }

    #[test]
    fn invalid_values_fail_validation() {
        let mut settings = Settings::default();
        settings.poll_interval_ms = 0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.agent.model = "  ".into();
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.agent.script = Some(" ".into());
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.log_level = "loud".into();
        assert!(settings.validate().is_err());
    }

    #[tokio::test]
    async fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "api_port = \"not a number\"").unwrap();
        assert!(Settings::load(&path).await.is_err());
    }
}
