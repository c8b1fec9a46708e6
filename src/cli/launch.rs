use anyhow::{Context, Result, bail};
use console::style;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::core::config::Settings;
use crate::core::terminal::{print_info, print_recording, print_success, print_warn};

/// Quotes a value for `sh`. Embedded single quotes become `'"'"'`.
pub fn shell_quote(value: &str) -> String {
    if value.is_empty() {
        return "''".to_string();
    }
    format!("'{}'", value.replace('\'', "'\"'\"'"))
}

/// The command line the recorder runs: this binary as a foreground worker,
/// carrying the resolved settings so the child needs no extra context.
pub fn worker_command(exe: &Path, settings: &Settings, config_path: Option<&Path>) -> String {
    let mut args = vec![
        shell_quote(&exe.to_string_lossy()),
        "worker".to_string(),
        "--child".to_string(),
    ];
    let mut push = |flag: &str, value: String| {
        args.push(flag.to_string());
        args.push(shell_quote(&value));
    };
    if let Some(path) = config_path {
        push("--config", path.to_string_lossy().into_owned());
    }
    push("--db", settings.db_path.to_string_lossy().into_owned());
    push("--poll", settings.poll_interval_ms.to_string());
    push("--agent-bin", settings.agent.bin.clone());
    push("--model", settings.agent.model.clone());
    push("--reasoning", settings.agent.reasoning.clone());
    if let Some(script) = &settings.agent.script {
        push("--agent-script", script.clone());
    }
    if let Some(dir) = &settings.agent.workdir {
        push("--workdir", dir.to_string_lossy().into_owned());
    }
    push("--cast-dir", settings.cast_dir().to_string_lossy().into_owned());
    push("--log-level", settings.log_level.clone());
    args.join(" ")
}

/// Arguments for `tmux new-session` running the recorder around the worker.
pub fn new_session_args(settings: &Settings, start_dir: &Path, child_cmd: &str) -> Vec<String> {
    let rec = &settings.recording;
    vec![
        "new-session".to_string(),
        "-d".to_string(),
        "-s".to_string(),
        rec.session.clone(),
        "-c".to_string(),
        start_dir.to_string_lossy().into_owned(),
        "-x".to_string(),
        rec.cols.to_string(),
        "-y".to_string(),
        rec.rows.to_string(),
        settings.asciinema_bin(),
        "rec".to_string(),
        "-q".to_string(),
        "--overwrite".to_string(),
        "--cols".to_string(),
        rec.cols.to_string(),
        "--rows".to_string(),
        rec.rows.to_string(),
        "-c".to_string(),
        child_cmd.to_string(),
        settings.live_cast_path().to_string_lossy().into_owned(),
    ]
}

fn tmux_has_session(tmux_bin: &str, session: &str) -> bool {
    Command::new(tmux_bin)
        .args(["has-session", "-t", session])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Starts the recorded worker session in the background. A session that is
/// already running is left alone.
pub async fn run_launch(settings: &Settings, config_path: Option<PathBuf>) -> Result<()> {
    let rec = &settings.recording;
    let cast_dir = settings.cast_dir();
    std::fs::create_dir_all(&cast_dir)
        .with_context(|| format!("creating cast dir {}", cast_dir.display()))?;

    if tmux_has_session(&rec.tmux_bin, &rec.session) {
        print_warn(&format!(
            "tmux session already running: {}",
            style(&rec.session).bold()
        ));
        return Ok(());
    }

    let exe = std::env::current_exe().context("resolving worker executable")?;
    let start_dir = std::env::current_dir()?;
    let config_path = match config_path {
        Some(p) if p.is_relative() => Some(start_dir.join(p)),
        other => other,
    };
    let child_cmd = worker_command(&exe, settings, config_path.as_deref());

    let status = Command::new(&rec.tmux_bin)
        .args(new_session_args(settings, &start_dir, &child_cmd))
        .status()
        .with_context(|| format!("running {}", rec.tmux_bin))?;
    if !status.success() {
        bail!("tmux launch failed: {}", status);
    }

    let cols = rec.cols.to_string();
    let rows = rec.rows.to_string();
    let _ = Command::new(&rec.tmux_bin)
        .args([
            "resize-window",
            "-t",
            rec.session.as_str(),
            "-x",
            cols.as_str(),
            "-y",
            rows.as_str(),
        ])
        .status();

    print_success(&format!("Worker session started: {}", rec.session));
    print_recording(
        &rec.session,
        &settings.live_cast_path().to_string_lossy(),
    );
    print_info(&format!(
        "Attach with {}",
        style(format!("{} attach -t {}", rec.tmux_bin, rec.session)).cyan()
    ));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_quote_wraps_and_escapes() {
        assert_eq!(shell_quote(""), "''");
        assert_eq!(shell_quote("plain"), "'plain'");
        assert_eq!(shell_quote("it's"), "'it'\"'\"'s'");
        assert_eq!(shell_quote("a b;rm -rf"), "'a b;rm -rf'");
    }

    #[test]
    fn worker_command_forwards_resolved_settings() {
        let mut settings = Settings::default();
        settings.agent.model = "o'model".into();
        settings.recording.cast_dir = Some(PathBuf::from("/data/casts"));
        let cmd = worker_command(
            Path::new("/usr/bin/promptcast"),
            &settings,
            Some(Path::new("/etc/pc.toml")),
        );
        assert!(cmd.starts_with("'/usr/bin/promptcast' worker --child --config '/etc/pc.toml'"));
        assert!(cmd.contains("--db 'db.sqlite3'"));
        assert!(cmd.contains("--poll '2000'"));
        assert!(cmd.contains("--model 'o'\"'\"'model'"));
        assert!(cmd.contains("--cast-dir '/data/casts'"));
        assert!(!cmd.contains("--workdir"));
        assert!(!cmd.contains("--agent-script"));

        settings.agent.script = Some("echo '{}'".into());
        let cmd = worker_command(Path::new("/usr/bin/promptcast"), &settings, None);
        assert!(cmd.contains("--agent-script 'echo '\"'\"'{}'\"'\"''"));
    }

    #[test]
    fn session_args_record_the_live_cast() {
        let mut settings = Settings::default();
        settings.recording.cast_dir = Some(PathBuf::from("/data/casts"));
        settings.recording.asciinema_bin = Some("/opt/asciinema".into());
        let args = new_session_args(&settings, Path::new("/work"), "CHILD");
        assert_eq!(&args[..4], &["new-session", "-d", "-s", "promptcast-worker"]);
        assert_eq!(&args[4..6], &["-c", "/work"]);
        assert_eq!(args[10], "/opt/asciinema");
        let n = args.len();
        assert_eq!(&args[n - 3..], &["-c", "CHILD", "/data/casts/live.cast"]);
        assert!(args.windows(2).any(|w| w == ["--rows", "72"]));
    }
}
