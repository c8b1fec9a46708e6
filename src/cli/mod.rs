mod launch;
mod submit;

use anyhow::{Context, Result, anyhow, bail};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::core::config::{DEFAULT_CONFIG_FILE, Overrides, Settings};
use crate::core::lifecycle::LifecycleManager;
use crate::core::store::JobStore;
use crate::core::terminal::{self, print_error, print_link, print_status};
use crate::core::worker::{Worker, WorkerConfig, WorkerService, launcher_for};
use crate::interfaces::web::{ApiServer, AppState};
use crate::logging;

fn print_help() {
    terminal::print_usage(
        &[
            ("serve", "Start the HTTP API (add --with-worker to run jobs in-process)"),
            ("launch", "Start the recorded worker session in tmux"),
            ("worker", "Same as launch; with --child runs the worker loop in the foreground"),
            ("submit", "Queue a prompt: promptcast submit <prompt>"),
            ("help", "Show this message"),
        ],
        &[
            ("--config <path>", "Settings file (default promptcast.toml)"),
            ("--db <path>", "SQLite database path"),
            ("--addr <host:port>", "API listen address"),
            ("--poll <ms>", "Worker poll interval"),
            ("--agent-bin <path>", "Agent executable"),
            ("--agent-script <sh>", "Run a shell snippet instead of the agent (prompt in $1)"),
            ("--model <name>", "Agent model"),
            ("--reasoning <level>", "Agent reasoning effort"),
            ("--workdir <dir>", "Agent working directory"),
            ("--cast-dir <dir>", "Recording directory"),
            ("--cols <n> --rows <n>", "Recorded terminal size"),
            ("--session <name>", "tmux session name"),
            ("--log-level <level>", "trace, debug, info, warn or error"),
        ],
    );
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct CommandArgs {
    pub config_path: Option<PathBuf>,
    pub overrides: Overrides,
    pub child: bool,
    pub with_worker: bool,
    pub positional: Vec<String>,
}

fn flag_value<'a>(args: &'a [String], i: usize) -> Result<&'a str> {
    match args.get(i + 1) {
        Some(v) => Ok(v.as_str()),
        None => bail!("{} requires a value", args[i]),
    }
}

fn parse_number<T: std::str::FromStr>(flag: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| anyhow!("invalid value for {}: {}", flag, value))
}

pub(crate) fn parse_command_args(args: &[String], start: usize) -> Result<CommandArgs> {
    let mut parsed = CommandArgs::default();
    let o = &mut parsed.overrides;
    let mut i = start;
    while i < args.len() {
        let flag = args[i].as_str();
        match flag {
            "--child" => parsed.child = true,
            "--with-worker" => parsed.with_worker = true,
            "--config" => parsed.config_path = Some(PathBuf::from(flag_value(args, i)?)),
            "--db" => o.db_path = Some(PathBuf::from(flag_value(args, i)?)),
            "--addr" => {
                let value = flag_value(args, i)?;
                let Some((host, port)) = value.rsplit_once(':') else {
                    bail!("--addr expects host:port, got {}", value);
                };
                if !host.is_empty() {
                    o.api_host = Some(host.to_string());
                }
                o.api_port = Some(parse_number(flag, port)?);
            }
            "--poll" => o.poll_interval_ms = Some(parse_number(flag, flag_value(args, i)?)?),
            "--agent-bin" => o.agent_bin = Some(flag_value(args, i)?.to_string()),
            "--agent-script" => o.agent_script = Some(flag_value(args, i)?.to_string()),
            "--model" => o.model = Some(flag_value(args, i)?.to_string()),
            "--reasoning" => o.reasoning = Some(flag_value(args, i)?.to_string()),
            "--workdir" => o.workdir = Some(PathBuf::from(flag_value(args, i)?)),
            "--cast-dir" => o.cast_dir = Some(PathBuf::from(flag_value(args, i)?)),
            "--cols" => o.cols = Some(parse_number(flag, flag_value(args, i)?)?),
            "--rows" => o.rows = Some(parse_number(flag, flag_value(args, i)?)?),
            "--session" => o.session = Some(flag_value(args, i)?.to_string()),
            "--log-level" => o.log_level = Some(flag_value(args, i)?.to_string()),
            "--prompt" | "-p" => parsed.positional.push(flag_value(args, i)?.to_string()),
            _ if flag.starts_with("--") => bail!("unknown option {}", flag),
            _ => {
                parsed.positional.push(flag.to_string());
                i += 1;
                continue;
            }
        }
        i += if matches!(flag, "--child" | "--with-worker") { 1 } else { 2 };
    }
    Ok(parsed)
}

async fn load_settings(parsed: &CommandArgs) -> Result<Settings> {
    let path = parsed
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    if parsed.config_path.is_some() && !path.exists() {
        bail!("config file {} not found", path.display());
    }
    let mut settings = Settings::load(&path).await?;
    settings.apply(&parsed.overrides);
    settings.validate()?;
    Ok(settings)
}

fn build_worker(settings: &Settings, store: JobStore) -> Worker {
    Worker::new(
        store,
        WorkerConfig {
            poll_interval: settings.poll_interval(),
            live_cast_path: settings.live_cast_path(),
            cast_dir: settings.cast_dir(),
        },
        launcher_for(&settings.agent),
    )
}

async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut term = signal(SignalKind::terminate())?;
        let mut hangup = signal(SignalKind::hangup())?;
        tokio::select! {
            r = tokio::signal::ctrl_c() => r?,
            _ = term.recv() => {}
            _ = hangup.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await?;
    Ok(())
}

/// Waits for a shutdown signal, or for the worker loop to die on its own.
/// The latter is returned as an error so the process exits non-zero.
async fn wait_for_exit(worker_failed: CancellationToken) -> Result<()> {
    tokio::select! {
        r = shutdown_signal() => r,
        _ = worker_failed.cancelled() => Err(anyhow!("worker loop stopped with an error")),
    }
}

/// Shuts the lifecycle down, then reports how the run ended.
async fn finish(mut lifecycle: LifecycleManager, outcome: Result<()>) -> Result<()> {
    lifecycle.shutdown().await?;
    outcome
}

async fn run_serve(settings: Settings, with_worker: bool) -> Result<()> {
    let log_tx = logging::log_channel();
    logging::init(&settings.log_level, log_tx.clone(), false);

    let store = JobStore::open(&settings.db_path)
        .await
        .context("opening job store")?;
    let state = AppState {
        store: store.clone(),
        cast_dir: settings.cast_dir(),
        live_cast_path: settings.live_cast_path(),
        log_tx,
        tail_interval: settings.tail_interval(),
        api_port: settings.api_port,
    };

    let mut lifecycle = LifecycleManager::new();
    lifecycle.attach(Arc::new(Mutex::new(ApiServer::new(
        state,
        settings.api_addr(),
        settings.shutdown_grace(),
    ))));
    let mut worker_failed = CancellationToken::new();
    if with_worker {
        let service = WorkerService::new(build_worker(&settings, store), settings.shutdown_grace());
        worker_failed = service.failed();
        lifecycle.attach(Arc::new(Mutex::new(service)));
    }
    lifecycle.start().await?;

    print_link("API", &format!("http://{}/api/requests", settings.api_addr()));
    print_link("Live recording", &format!("http://{}/stream", settings.api_addr()));
    if with_worker {
        print_status("Worker", "in-process");
    }

    let outcome = wait_for_exit(worker_failed).await;
    finish(lifecycle, outcome).await
}

async fn run_worker_child(settings: Settings) -> Result<()> {
    let log_tx = logging::log_channel();
    logging::init(&settings.log_level, log_tx, false);

    let store = JobStore::open(&settings.db_path)
        .await
        .context("opening job store")?;
    info!(
        "Worker recording into {}",
        settings.live_cast_path().display()
    );

    let service = WorkerService::new(build_worker(&settings, store), settings.shutdown_grace());
    let worker_failed = service.failed();
    let mut lifecycle = LifecycleManager::new();
    lifecycle.attach(Arc::new(Mutex::new(service)));
    lifecycle.start().await?;

    let outcome = wait_for_exit(worker_failed).await;
    finish(lifecycle, outcome).await
}

pub async fn run_main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let Some(cmd) = args.get(1).map(String::as_str) else {
        print_help();
        return Ok(());
    };
    if matches!(cmd, "help" | "--help" | "-h") {
        print_help();
        return Ok(());
    }
    if !matches!(cmd, "serve" | "worker" | "launch" | "submit") {
        print_error(&format!("Unknown command: {}", cmd));
        print_help();
        return Ok(());
    }

    let parsed = parse_command_args(&args, 2)?;
    let settings = load_settings(&parsed).await?;

    match cmd {
        "serve" => run_serve(settings, parsed.with_worker).await,
        "worker" if parsed.child => run_worker_child(settings).await,
        "worker" | "launch" => launch::run_launch(&settings, parsed.config_path).await,
        _ => {
            if parsed.positional.is_empty() {
                print_error("Error: a prompt is required for submit.");
                print_help();
                return Ok(());
            }
            submit::run_submit(&settings, &parsed.positional.join(" ")).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parse_command_args_reads_overrides() {
        let args = argv(&[
            "promptcast",
            "worker",
            "--child",
            "--db",
            "/data/db.sqlite3",
            "--addr",
            "0.0.0.0:9000",
            "--poll",
            "500",
            "--model",
            "m",
            "--rows",
            "40",
            "--agent-script",
            "echo hi",
        ]);
        let parsed = parse_command_args(&args, 2).unwrap();
        assert!(parsed.child);
        assert!(!parsed.with_worker);
        assert_eq!(
            parsed.overrides.db_path,
            Some(PathBuf::from("/data/db.sqlite3"))
        );
        assert_eq!(parsed.overrides.api_host.as_deref(), Some("0.0.0.0"));
        assert_eq!(parsed.overrides.api_port, Some(9000));
        assert_eq!(parsed.overrides.poll_interval_ms, Some(500));
        assert_eq!(parsed.overrides.model.as_deref(), Some("m"));
        assert_eq!(parsed.overrides.rows, Some(40));
        assert_eq!(parsed.overrides.agent_script.as_deref(), Some("echo hi"));
    }

    #[test]
    fn parse_command_args_collects_prompt_words() {
        let args = argv(&["promptcast", "submit", "fix", "the", "--db", "x.db", "bug"]);
        let parsed = parse_command_args(&args, 2).unwrap();
        assert_eq!(parsed.positional, vec!["fix", "the", "bug"]);
        assert_eq!(parsed.overrides.db_path, Some(PathBuf::from("x.db")));
    }

    #[test]
    fn parse_command_args_rejects_bad_input() {
        assert!(parse_command_args(&argv(&["p", "serve", "--poll"]), 2).is_err());
        assert!(parse_command_args(&argv(&["p", "serve", "--poll", "soon"]), 2).is_err());
        assert!(parse_command_args(&argv(&["p", "serve", "--addr", "nohost"]), 2).is_err());
        assert!(parse_command_args(&argv(&["p", "serve", "--bogus"]), 2).is_err());
    }

    #[test]
    fn addr_with_empty_host_keeps_default_host() {
        let parsed = parse_command_args(&argv(&["p", "serve", "--addr", ":8080"]), 2).unwrap();
        assert_eq!(parsed.overrides.api_host, None);
        assert_eq!(parsed.overrides.api_port, Some(8080));
    }

    #[tokio::test]
    async fn worker_failure_ends_the_wait_with_an_error() {
        let failed = CancellationToken::new();
        failed.cancel();
        let err = wait_for_exit(failed).await.unwrap_err();
        assert!(err.to_string().contains("worker loop stopped"));
    }

    #[tokio::test]
    async fn missing_explicit_config_is_an_error() {
        let parsed = CommandArgs {
            config_path: Some(PathBuf::from("/nonexistent/promptcast.toml")),
            ..Default::default()
        };
        assert!(load_settings(&parsed).await.is_err());
    }
}
