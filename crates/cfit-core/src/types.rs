use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::worktree::RepoTeardown;

// ── Ticket ───────────────────────────────────────────────────────────────

/// A bug ticket as fetched from the tracker. Owned by exactly one session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketInfo {
    /// Tracker identifier; must pass `validate_task_id` before use.
    pub id: String,
    pub title: String,
    pub description: String,
    pub url: String,
    pub due_date: Option<String>,
    pub assignee: Option<String>,
    pub tags: Vec<String>,
    /// Custom field name/value pairs in tracker order. Empty values are kept
    /// out by the tracker client.
    pub custom_fields: Vec<(String, String)>,
}

impl TicketInfo {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: description.into(),
            url: url.into(),
            ..Self::default()
        }
    }
}

// ── Agent output ─────────────────────────────────────────────────────────

/// Text the agent left behind, ready for guarding and posting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectedOutput {
    /// Comment body: the summary, or the findings when no summary arrived.
    pub body: String,
    /// The detailed findings file, if the agent wrote one.
    pub findings_path: Option<PathBuf>,
}

// ── Session ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Comment posted; `attached` says whether the findings file went too.
    Posted { attached: bool },
    /// The tracker rejected the comment.
    PostFailed(String),
    /// The agent produced nothing before the deadline.
    NoResults,
    /// Launch failed, the agent exited with an error, or the session task
    /// itself died.
    AgentFailed(String),
    /// The ticket was not accepted for a session.
    Rejected(String),
}

/// Everything a finished session reports to its caller.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub ticket_id: String,
    pub outcome: SessionOutcome,
    pub teardown: Vec<RepoTeardown>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl SessionReport {
    pub fn summary_line(&self) -> String {
        let removed = self
            .teardown
            .iter()
            .filter(|t| matches!(t.removal, crate::worktree::Removal::Removed(_)))
            .count();
        let failed = self.teardown.iter().filter(|t| t.is_failure()).count();
        let secs = (self.finished_at - self.started_at).num_seconds();
        format!(
            "task {}: {:?} ({secs}s, worktrees removed={removed} failed={failed})",
            self.ticket_id, self.outcome
        )
    }
}
