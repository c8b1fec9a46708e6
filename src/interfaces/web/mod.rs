mod handlers;
mod router;

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::core::lifecycle::LifecycleComponent;
use crate::core::store::JobStore;

pub use router::build_api_router;

#[derive(Clone)]
pub struct AppState {
    pub store: JobStore,
    /// Served under `/casts`; replay clips live in its `requests/` folder.
    pub cast_dir: PathBuf,
    pub live_cast_path: PathBuf,
    pub log_tx: broadcast::Sender<String>,
    pub tail_interval: Duration,
    pub api_port: u16,
}

pub struct ApiServer {
    state: AppState,
    addr: String,
    grace: Duration,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl ApiServer {
    pub fn new(state: AppState, addr: String, grace: Duration) -> Self {
        Self {
            state,
            addr,
            grace,
            cancel: CancellationToken::new(),
            handle: None,
        }
    }
}

#[async_trait]
impl LifecycleComponent for ApiServer {
    async fn on_init(&mut self) -> Result<()> {
        info!("API Server initializing...");
        tokio::fs::create_dir_all(&self.state.cast_dir)
            .await
            .with_context(|| format!("creating {}", self.state.cast_dir.display()))?;
        Ok(())
    }

    async fn on_start(&mut self) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(&self.addr)
            .await
            .with_context(|| format!("binding {}", self.addr))?;
        info!("API Server running at http://{}", self.addr);

        let app = build_api_router(self.state.clone());
        let cancel = self.cancel.clone();
        self.handle = Some(tokio::spawn(async move {
            let shutdown = async move { cancel.cancelled().await };
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
            {
                tracing::error!("API Server crashed: {}", e);
            }
        }));
        Ok(())
    }

    async fn on_shutdown(&mut self) -> Result<()> {
        info!("API Server shutting down...");
        self.cancel.cancel();
        if let Some(mut handle) = self.handle.take() {
            // Open live feeds never finish on their own.
            if tokio::time::timeout(self.grace, &mut handle).await.is_err() {
                warn!("API Server did not drain within {:?}; aborting", self.grace);
                handle.abort();
            }
        }
        Ok(())
    }
}
