//! Single-flight job worker: claims one pending job at a time, runs the agent
//! for it and records the outcome along with the job's replay clip.

pub mod agent;
pub mod classify;

use anyhow::Result;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::core::cast;
use crate::core::lifecycle::LifecycleComponent;
use crate::core::store::{JobRecord, JobStatus, JobStore};

pub use agent::{AgentError, AgentLauncher, CodexLauncher, ShellLauncher, launcher_for};

/// Response stored on jobs found in `processing` when a worker starts.
pub const ORPHANED_RESPONSE: &str = "worker restarted while job was processing";

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub poll_interval: Duration,
    /// The continuous recording the worker runs inside of.
    pub live_cast_path: PathBuf,
    /// Root for replay clips (`<cast_dir>/requests/<id>.cast`).
    pub cast_dir: PathBuf,
}

pub struct Worker {
    store: JobStore,
    config: WorkerConfig,
    launcher: Arc<dyn AgentLauncher>,
}

impl Worker {
    pub fn new(store: JobStore, config: WorkerConfig, launcher: Arc<dyn AgentLauncher>) -> Self {
        Self {
            store,
            config,
            launcher,
        }
    }

    /// Polls until `cancel` fires. Claim failures are logged and retried after
    /// one poll interval; they never end the loop.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let orphaned = self.store.fail_orphaned_jobs(ORPHANED_RESPONSE).await?;
        if orphaned > 0 {
            warn!("Marked {} orphaned job(s) as error", orphaned);
        }
        info!(
            "Worker ready; polling every {:?}",
            self.config.poll_interval
        );

        while !cancel.is_cancelled() {
            match self.store.claim_next_pending().await {
                Ok(Some(job)) => {
                    self.process_job(job, &cancel).await;
                    continue;
                }
                Ok(None) => {}
                Err(e) => warn!("Worker claim failed: {:#}", e),
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        info!("Worker stopped");
        Ok(())
    }

    /// Runs one claimed job to a terminal state. Recording problems only cost
    /// the job its clip; the agent's outcome alone decides the status.
    pub async fn process_job(&self, job: JobRecord, cancel: &CancellationToken) {
        let job_id = job.id;
        info!(job_id, "Processing job {}", job_id);
        let live = &self.config.live_cast_path;

        let start = cast::capture_mark(live).await;
        match start {
            Some(mark) => {
                if let Err(e) = self.store.update_job_start_mark(job_id, mark).await {
                    warn!(job_id, "Failed to store start mark: {:#}", e);
                }
            }
            None => debug!(job_id, "No recording mark available at start"),
        }

        let outcome =
            agent::run_agent(&self.store, self.launcher.as_ref(), job_id, &job.prompt, cancel)
                .await;

        // A mark from before the start (recording restarted) is not kept.
        let end = cast::capture_mark(live)
            .await
            .filter(|end| start.is_none_or(|start| *end >= start));
        let clip = match (start, end) {
            (Some(start), Some(end)) => {
                let dest = cast::job_cast_path(&self.config.cast_dir, job_id);
                match cast::slice(live, &dest, start, end).await {
                    Ok(()) => Some(cast::job_cast_rel(job_id)),
                    Err(e) => {
                        warn!(job_id, "Failed to write replay clip: {}", e);
                        None
                    }
                }
            }
            _ => None,
        };

        let (status, response) = match &outcome {
            Ok(()) => (JobStatus::Processed, String::new()),
            Err(e) => (JobStatus::Error, e.to_string()),
        };
        match &outcome {
            Ok(()) => info!(job_id, "Job {} processed", job_id),
            Err(e) => warn!(job_id, "Job {} failed: {}", job_id, e),
        }

        if let Err(e) = self
            .store
            .update_job_final(job_id, status, &response, end, clip.as_deref())
            .await
        {
            error!(job_id, "Failed to record outcome of job {}: {:#}", job_id, e);
        }
    }
}

/// Runs a [`Worker`] on its own task under the lifecycle manager. Shutdown
/// cancels the loop and waits up to `grace` for the current job's write-back.
pub struct WorkerService {
    worker: Option<Worker>,
    grace: Duration,
    cancel: CancellationToken,
    failed: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl WorkerService {
    pub fn new(worker: Worker, grace: Duration) -> Self {
        Self {
            worker: Some(worker),
            grace,
            cancel: CancellationToken::new(),
            failed: CancellationToken::new(),
            handle: None,
        }
    }

    /// Fires when the worker loop ends with an error instead of a shutdown.
    pub fn failed(&self) -> CancellationToken {
        self.failed.clone()
    }
}

#[async_trait]
impl LifecycleComponent for WorkerService {
    async fn on_init(&mut self) -> Result<()> {
        info!("Worker initializing...");
        if let Some(worker) = &self.worker {
            tokio::fs::create_dir_all(&worker.config.cast_dir).await?;
        }
        Ok(())
    }

    async fn on_start(&mut self) -> Result<()> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        let cancel = self.cancel.clone();
        let failed = self.failed.clone();
        self.handle = Some(tokio::spawn(async move {
            if let Err(e) = worker.run(cancel).await {
                error!("Worker stopped with error: {:#}", e);
                failed.cancel();
            }
        }));
        Ok(())
    }

    async fn on_shutdown(&mut self) -> Result<()> {
        info!("Worker shutting down...");
        self.cancel.cancel();
        if let Some(mut handle) = self.handle.take()
            && tokio::time::timeout(self.grace, &mut handle).await.is_err()
        {
            warn!("Worker did not stop within {:?}; aborting", self.grace);
            handle.abort();
        }
        Ok(())
    }
}
