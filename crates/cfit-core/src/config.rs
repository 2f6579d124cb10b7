use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;

use crate::poll::PollPolicy;

/// Full application configuration, read once at startup from the
/// environment and `.env`. Immutable afterwards; sessions get it behind an
/// `Arc`.
#[derive(Debug, Clone)]
pub struct Config {
    pub asana_access_token: String,
    /// Workspace root holding the investigated repositories.
    pub target_repo_path: PathBuf,
    /// Only "claude" is supported.
    pub agent_mode: String,
    /// Repository folder names under `target_repo_path`. Empty means the
    /// workspace root is itself the repository.
    pub investigation_repos: Vec<String>,
    /// Guideline files injected into every prompt.
    pub agent_context_files: Vec<PathBuf>,
    /// Per-ticket attachments and agent output live under `<output_dir>/<id>/`.
    pub output_dir: PathBuf,

    // Agent
    pub claude_bin: String,
    pub claude_allowed_tools: String,
    /// Kill the agent after this many seconds (0 = no limit).
    pub agent_timeout_s: u64,

    // Completion polling
    pub poll_interval_s: u64,
    pub poll_max_interval_s: u64,
    pub poll_timeout_s: u64,
    /// How long to wait for summary.txt once findings.md exists.
    pub findings_grace_s: u64,

    // Output guardrails
    pub max_comment_bytes: usize,
    pub max_findings_bytes: usize,

    pub max_concurrent_sessions: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            asana_access_token: String::new(),
            target_repo_path: PathBuf::from("."),
            agent_mode: "claude".into(),
            investigation_repos: Vec::new(),
            agent_context_files: Vec::new(),
            output_dir: PathBuf::from("output"),
            claude_bin: "claude".into(),
            claude_allowed_tools: DEFAULT_ALLOWED_TOOLS.into(),
            agent_timeout_s: 0,
            poll_interval_s: 10,
            poll_max_interval_s: 60,
            poll_timeout_s: 1800,
            findings_grace_s: 120,
            max_comment_bytes: 10 * 1024,
            max_findings_bytes: 512 * 1024,
            max_concurrent_sessions: 4,
        }
    }
}

pub const DEFAULT_ALLOWED_TOOLS: &str = "Read,Grep,Glob,Task,Bash,Edit,Write";

fn parse_dotenv() -> HashMap<String, String> {
    let mut map = HashMap::new();
    let Ok(contents) = std::fs::read_to_string(".env") else {
        return map;
    };
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((k, v)) = line.split_once('=') {
            let v = v.trim().trim_matches('"');
            map.insert(k.trim().to_string(), v.to_string());
        }
    }
    map
}

fn get(key: &str, dotenv: &HashMap<String, String>) -> Option<String> {
    std::env::var(key).ok().or_else(|| dotenv.get(key).cloned())
}

fn get_str(key: &str, dotenv: &HashMap<String, String>, default: &str) -> String {
    get(key, dotenv).unwrap_or_else(|| default.to_string())
}

fn get_u64(key: &str, dotenv: &HashMap<String, String>, default: u64) -> u64 {
    get(key, dotenv)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn get_usize(key: &str, dotenv: &HashMap<String, String>, default: usize) -> usize {
    get(key, dotenv)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn resolve_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return format!("{home}/{rest}");
        }
    }
    path.to_string()
}

/// Split a comma-separated setting, trimming and dropping empty entries.
fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let dotenv = parse_dotenv();
        let d = Config::default();

        let target_repo_path = resolve_tilde(&get_str("TARGET_REPO_PATH", &dotenv, "~/workspace"));
        let agent_context_files = parse_list(&get_str("AGENT_CONTEXT_FILES", &dotenv, ""))
            .iter()
            .map(|p| PathBuf::from(resolve_tilde(p)))
            .collect();

        Ok(Config {
            asana_access_token: get_str("ASANA_ACCESS_TOKEN", &dotenv, ""),
            target_repo_path: PathBuf::from(target_repo_path),
            agent_mode: get_str("AGENT_MODE", &dotenv, &d.agent_mode),
            investigation_repos: parse_list(&get_str("INVESTIGATION_REPOS", &dotenv, "")),
            agent_context_files,
            output_dir: PathBuf::from(resolve_tilde(&get_str("OUTPUT_DIR", &dotenv, "output"))),
            claude_bin: get_str("CLAUDE_BIN", &dotenv, &d.claude_bin),
            claude_allowed_tools: get_str("CLAUDE_ALLOWED_TOOLS", &dotenv, DEFAULT_ALLOWED_TOOLS),
            agent_timeout_s: get_u64("AGENT_TIMEOUT_S", &dotenv, d.agent_timeout_s),
            poll_interval_s: get_u64("POLL_INTERVAL_S", &dotenv, d.poll_interval_s),
            poll_max_interval_s: get_u64("POLL_MAX_INTERVAL_S", &dotenv, d.poll_max_interval_s),
            poll_timeout_s: get_u64("POLL_TIMEOUT_S", &dotenv, d.poll_timeout_s),
            findings_grace_s: get_u64("FINDINGS_GRACE_S", &dotenv, d.findings_grace_s),
            max_comment_bytes: get_usize("MAX_COMMENT_BYTES", &dotenv, d.max_comment_bytes),
            max_findings_bytes: get_usize("MAX_FINDINGS_BYTES", &dotenv, d.max_findings_bytes),
            max_concurrent_sessions: get_usize(
                "MAX_CONCURRENT_SESSIONS",
                &dotenv,
                d.max_concurrent_sessions,
            )
            .max(1),
        })
    }

    /// Repositories a session works against; `"."` stands for the workspace
    /// root when none are configured.
    pub fn session_repos(&self) -> Vec<String> {
        if self.investigation_repos.is_empty() {
            vec![".".to_string()]
        } else {
            self.investigation_repos.clone()
        }
    }

    /// Absolute, so paths handed to the agent survive its change of cwd.
    pub fn task_output_dir(&self, task_id: &str) -> PathBuf {
        let dir = self.output_dir.join(task_id);
        std::path::absolute(&dir).unwrap_or(dir)
    }

    pub fn workspace(&self) -> &Path {
        &self.target_repo_path
    }

    /// Completion polling: starts at `poll_interval_s`, doubles up to
    /// `poll_max_interval_s`.
    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_secs(self.poll_interval_s.max(1)),
            max_interval: Duration::from_secs(self.poll_max_interval_s.max(1)),
            backoff: 2.0,
            timeout: Duration::from_secs(self.poll_timeout_s),
        }
    }

    pub fn findings_grace(&self) -> Duration {
        Duration::from_secs(self.findings_grace_s)
    }
}
