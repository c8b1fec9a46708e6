use anyhow::{Result, bail};
use console::style;

use crate::core::config::Settings;
use crate::core::store::JobStore;
use crate::core::terminal::{print_status, print_success};

pub async fn run_submit(settings: &Settings, prompt: &str) -> Result<()> {
    let prompt = prompt.trim();
    if prompt.is_empty() {
        bail!("prompt must not be empty");
    }
    let store = JobStore::open(&settings.db_path).await?;
    let job = store.create_job(prompt).await?;
    print_success(&format!("Queued request {}", style(job.id).bold()));
    print_status("Status", job.status.as_str());
    print_status("Database", &settings.db_path.to_string_lossy());
    Ok(())
}
