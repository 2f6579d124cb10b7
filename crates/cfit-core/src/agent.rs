use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;

/// Starts the coding agent on a composed prompt and returns once the agent
/// has finished (or its process has exited).
#[async_trait]
pub trait AgentLauncher: Send + Sync {
    async fn launch(&self, prompt: &str, workdir: &Path) -> Result<()>;
}

/// Where guarded results go: the ticket tracker.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn post_comment(&self, task_id: &str, text: &str) -> Result<()>;

    async fn attach_file(&self, task_id: &str, path: &Path) -> Result<()>;
}
