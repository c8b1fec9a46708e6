use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::classify::{AgentEvent, OutputCategory, classify, parse_line};
use crate::core::config::AgentSettings;
use crate::core::store::JobStore;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("failed to start agent: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("agent exited with status {code}")]
    Exit { code: i32 },
    #[error("agent was terminated by a signal")]
    Signaled,
    #[error("{0}")]
    Reported(String),
    #[error("canceled")]
    Canceled,
    #[error("agent io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Builds the command that runs the agent for one prompt. The orchestrator
/// owns stdio wiring and the child's lifetime.
pub trait AgentLauncher: Send + Sync {
    fn command(&self, prompt: &str) -> Command;
}

/// Runs `codex exec --json` non-interactively with approvals and the sandbox
/// bypassed.
#[derive(Debug, Clone)]
pub struct CodexLauncher {
    pub bin: String,
    pub model: String,
    pub reasoning: String,
    pub workdir: Option<PathBuf>,
}

impl CodexLauncher {
    pub fn args(&self, prompt: &str) -> Vec<String> {
        vec![
            "exec".to_string(),
            "--json".to_string(),
            "-m".to_string(),
            self.model.clone(),
            "--config".to_string(),
            format!("model_reasoning_effort={}", self.reasoning),
            "--dangerously-bypass-approvals-and-sandbox".to_string(),
            "--skip-git-repo-check".to_string(),
            prompt.to_string(),
        ]
    }
}

impl AgentLauncher for CodexLauncher {
    fn command(&self, prompt: &str) -> Command {
        let mut cmd = Command::new(&self.bin);
        cmd.args(self.args(prompt));
        if let Some(dir) = &self.workdir {
            cmd.current_dir(dir);
        }
        cmd
    }
}

/// Runs a shell snippet as the agent with the prompt in `$1`. Selected by
/// `agent.script` (or `--agent-script`) for dry runs of the pipeline without
/// a real agent installed.
#[derive(Debug, Clone)]
pub struct ShellLauncher {
    pub script: String,
    pub workdir: Option<PathBuf>,
}

impl AgentLauncher for ShellLauncher {
    fn command(&self, prompt: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(&self.script).arg("agent").arg(prompt);
        if let Some(dir) = &self.workdir {
            cmd.current_dir(dir);
        }
        cmd
    }
}

/// The launcher the agent settings ask for: the shell script when one is
/// configured, otherwise codex.
pub fn launcher_for(agent: &AgentSettings) -> Arc<dyn AgentLauncher> {
    match &agent.script {
        Some(script) => Arc::new(ShellLauncher {
            script: script.clone(),
            workdir: agent.workdir.clone(),
        }),
        None => Arc::new(CodexLauncher {
            bin: agent.bin.clone(),
            model: agent.model.clone(),
            reasoning: agent.reasoning.clone(),
            workdir: agent.workdir.clone(),
        }),
    }
}

/// Runs the agent for one job and stores its classified output as it arrives.
///
/// Sequence numbers start at 1 and advance only when a record is stored, so
/// a job's records never skip. The result is `Ok` only when the agent exits
/// zero without having reported an error item.
pub async fn run_agent(
    store: &JobStore,
    launcher: &dyn AgentLauncher,
    job_id: i64,
    prompt: &str,
    cancel: &CancellationToken,
) -> Result<(), AgentError> {
    let mut cmd = launcher.command(prompt);
    cmd.stdin(Stdio::inherit())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(AgentError::Spawn)?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AgentError::Spawn(std::io::Error::other("agent stdout was not captured")))?;
    let mut reader = BufReader::new(stdout);

    let mut seq: i64 = 1;
    let mut last_error: Option<String> = None;
    let mut buf = Vec::new();

    loop {
        buf.clear();
        let read = tokio::select! {
            _ = cancel.cancelled() => {
                stop_child(&mut child, job_id).await;
                return Err(AgentError::Canceled);
            }
            read = reader.read_until(b'\n', &mut buf) => read,
        };
        match read {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                warn!(job_id, "Reading agent output failed: {}", e);
                break;
            }
        }

        let line = String::from_utf8_lossy(&buf);
        let Some(event) = parse_line(&line) else {
            continue;
        };

        if let AgentEvent::TurnCompleted { usage: Some(usage) } = &event {
            info!(
                job_id,
                "[job {}] tokens: {} input ({} cached), {} output",
                job_id,
                usage.input_tokens,
                usage.cached_input_tokens,
                usage.output_tokens
            );
        }

        let Some(record) = classify(&event) else {
            continue;
        };
        let category = record.category.as_str();
        info!(job_id, "[job {}] {}: {}", job_id, category, record.content);
        if record.category == OutputCategory::Error {
            last_error = Some(record.content.clone());
        }
        match store
            .add_output_line(job_id, seq, category, &record.content)
            .await
        {
            Ok(()) => seq += 1,
            Err(e) => warn!(job_id, "Failed to store output line {}: {:#}", seq, e),
        }
    }

    let status = tokio::select! {
        _ = cancel.cancelled() => {
            stop_child(&mut child, job_id).await;
            return Err(AgentError::Canceled);
        }
        status = child.wait() => status?,
    };
    debug!(job_id, "Agent exited with {}", status);

    if !status.success() {
        return Err(match status.code() {
            Some(code) => AgentError::Exit { code },
            None => AgentError::Signaled,
        });
    }
    if let Some(message) = last_error {
        return Err(AgentError::Reported(message));
    }
    Ok(())
}

async fn stop_child(child: &mut Child, job_id: i64) {
    warn!(job_id, "Stopping agent on shutdown");
    if let Err(e) = child.start_kill() {
        debug!(job_id, "Agent already gone: {}", e);
    }
    let _ = child.wait().await;
}
