use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use cfit_core::{agent::AgentLauncher, config::Config};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Runs Claude Code non-interactively (`claude -p`) as a subprocess.
pub struct ClaudeLauncher {
    /// Path to the `claude` CLI binary.
    pub claude_bin: String,
    /// Value for `--allowedTools`.
    pub allowed_tools: String,
    /// Kill the subprocess and fail after this many seconds (0 = no limit).
    pub timeout_s: u64,
}

impl ClaudeLauncher {
    pub fn new(claude_bin: impl Into<String>, allowed_tools: impl Into<String>) -> Self {
        Self {
            claude_bin: claude_bin.into(),
            allowed_tools: allowed_tools.into(),
            timeout_s: 0,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.claude_bin, &config.claude_allowed_tools).with_timeout(config.agent_timeout_s)
    }

    pub fn with_timeout(mut self, timeout_s: u64) -> Self {
        self.timeout_s = timeout_s;
        self
    }

    pub fn build_args(&self, prompt: &str) -> Vec<String> {
        vec![
            "-p".into(),
            prompt.into(),
            "--allowedTools".into(),
            self.allowed_tools.clone(),
        ]
    }
}

#[async_trait]
impl AgentLauncher for ClaudeLauncher {
    async fn launch(&self, prompt: &str, workdir: &Path) -> Result<()> {
        info!(
            bin = %self.claude_bin,
            workdir = %workdir.display(),
            prompt_len = prompt.len(),
            timeout_s = self.timeout_s,
            "spawning claude subprocess"
        );

        let mut child = Command::new(&self.claude_bin)
            .args(self.build_args(prompt))
            .current_dir(workdir)
            .kill_on_drop(true)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to spawn claude: {}", self.claude_bin))?;

        let stdout = child.stdout.take().context("failed to take stdout")?;
        let stderr = child.stderr.take().context("failed to take stderr")?;

        let io_future = async move {
            let mut stdout_reader = BufReader::new(stdout).lines();
            let mut stderr_reader = BufReader::new(stderr).lines();
            let mut stdout_open = true;
            let mut stderr_open = true;

            while stdout_open || stderr_open {
                tokio::select! {
                    line = stdout_reader.next_line(), if stdout_open => {
                        match line.context("error reading stdout")? {
                            Some(l) => debug!("claude: {}", l),
                            None => stdout_open = false,
                        }
                    }
                    line = stderr_reader.next_line(), if stderr_open => {
                        match line {
                            Ok(Some(l)) if !l.is_empty() => warn!("claude stderr: {}", l),
                            Ok(Some(_)) => {}
                            _ => stderr_open = false,
                        }
                    }
                }
            }

            let status = child.wait().await.context("failed to wait for claude")?;
            anyhow::Ok(status)
        };

        let status = if self.timeout_s > 0 {
            match tokio::time::timeout(Duration::from_secs(self.timeout_s), io_future).await {
                Ok(result) => result?,
                Err(_elapsed) => {
                    warn!(timeout_s = self.timeout_s, "claude subprocess timed out");
                    bail!("claude timed out after {}s", self.timeout_s);
                }
            }
        } else {
            io_future.await?
        };

        info!(success = status.success(), code = ?status.code(), "claude subprocess finished");
        if !status.success() {
            match status.code() {
                Some(code) => bail!("claude exited with code {code}"),
                None => bail!("claude was terminated by a signal"),
            }
        }
        Ok(())
    }
}
