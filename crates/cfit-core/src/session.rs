use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::{
    agent::{AgentLauncher, ResultSink},
    config::Config,
    context,
    guardrails::{check_size_limit, redact_secrets, sanitize_task_content, validate_task_id},
    poll::{wait_for, PollPolicy},
    prompt::{build_prompt, PromptContext, FINDINGS_FILE, SUMMARY_FILE},
    types::{CollectedOutput, SessionOutcome, SessionReport, TicketInfo},
    worktree::{cleanup_worktrees, Removal, RepoTeardown},
};

pub const COMMENT_HEADER: &str = "🤖 AI Agent Investigation Results";
/// Guarded copy of findings.md; this is the file that gets attached.
pub const REDACTED_FINDINGS_FILE: &str = "findings.redacted.md";

const PROGRESS_LOG_EVERY: Duration = Duration::from_secs(60);

/// Runs one investigation session per ticket, each on its own tokio task.
///
/// Sessions share nothing but the filesystem, and each only touches its own
/// `cfit-<id>` worktrees. The coordinator itself tracks which tickets are in
/// flight and caps how many agents run at once.
pub struct Coordinator {
    config: Arc<Config>,
    launcher: Arc<dyn AgentLauncher>,
    sink: Arc<dyn ResultSink>,
    in_flight: Mutex<HashSet<String>>,
    slots: Arc<Semaphore>,
}

impl Coordinator {
    pub fn new(
        config: Arc<Config>,
        launcher: Arc<dyn AgentLauncher>,
        sink: Arc<dyn ResultSink>,
    ) -> Self {
        let slots = Arc::new(Semaphore::new(config.max_concurrent_sessions.max(1)));
        Self {
            config,
            launcher,
            sink,
            in_flight: Mutex::new(HashSet::new()),
            slots,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn active_sessions(&self) -> usize {
        self.in_flight.lock().await.len()
    }

    // ── Dispatch ──────────────────────────────────────────────────────────

    /// Start a session for `ticket`. Tickets with an invalid identifier, or
    /// one that already has a running session, resolve straight away to a
    /// `Rejected` report.
    pub async fn spawn(
        self: &Arc<Self>,
        ticket: TicketInfo,
        attachments: Vec<PathBuf>,
    ) -> JoinHandle<SessionReport> {
        if let Err(reason) = self.admit(&ticket.id).await {
            warn!(task_id = %ticket.id, "session rejected: {reason}");
            let now = Utc::now();
            let report = SessionReport {
                ticket_id: ticket.id,
                outcome: SessionOutcome::Rejected(reason),
                teardown: Vec::new(),
                started_at: now,
                finished_at: now,
            };
            return tokio::spawn(async move { report });
        }

        let this = Arc::clone(self);
        tokio::spawn(async move {
            let task_id = ticket.id.clone();
            let report = Arc::clone(&this).run_session(ticket, attachments).await;
            this.in_flight.lock().await.remove(&task_id);
            report
        })
    }

    async fn admit(&self, task_id: &str) -> Result<(), String> {
        if !validate_task_id(task_id) {
            return Err(format!("invalid task id {task_id:?}"));
        }
        let mut guard = self.in_flight.lock().await;
        if !guard.insert(task_id.to_string()) {
            return Err(format!("task {task_id} already has a running session"));
        }
        Ok(())
    }

    /// compose → launch → poll → guard → post, then teardown no matter how
    /// the agent phase ended (error or panic included).
    async fn run_session(self: Arc<Self>, ticket: TicketInfo, attachments: Vec<PathBuf>) -> SessionReport {
        let started_at = Utc::now();
        let task_id = ticket.id.clone();

        let phase = tokio::spawn(Arc::clone(&self).agent_phase(ticket, attachments));
        let outcome = match phase.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(task_id = %task_id, "session task died: {e}");
                SessionOutcome::AgentFailed(format!("session task died: {e}"))
            }
        };

        let teardown = self.teardown(&task_id).await;
        let report = SessionReport {
            ticket_id: task_id,
            outcome,
            teardown,
            started_at,
            finished_at: Utc::now(),
        };
        info!(task_id = %report.ticket_id, "{}", report.summary_line());
        report
    }

    async fn agent_phase(self: Arc<Self>, ticket: TicketInfo, attachments: Vec<PathBuf>) -> SessionOutcome {
        let Ok(_permit) = Arc::clone(&self.slots).acquire_owned().await else {
            return SessionOutcome::AgentFailed("session slots closed".into());
        };

        let task_dir = self.config.task_output_dir(&ticket.id);
        if let Err(e) = prepare_output_dir(&task_dir) {
            error!(task_id = %ticket.id, "{e:#}");
            return SessionOutcome::AgentFailed(format!("{e:#}"));
        }

        // The agent runs in the workspace, not in our working directory.
        let attachments: Vec<PathBuf> = attachments
            .into_iter()
            .map(|p| std::path::absolute(&p).unwrap_or(p))
            .collect();

        let snippets = if self.config.agent_context_files.is_empty() {
            context::scan_repos(self.config.workspace(), &self.config.investigation_repos)
        } else {
            context::from_paths(&self.config.agent_context_files)
        };
        let prompt = build_prompt(
            &ticket,
            &PromptContext {
                attachments: &attachments,
                repos: &self.config.investigation_repos,
                snippets: &snippets,
                output_dir: &task_dir,
            },
        );

        info!(
            task_id = %ticket.id,
            title = %sanitize_task_content(&ticket.title),
            workdir = %self.config.workspace().display(),
            prompt_len = prompt.len(),
            "launching agent"
        );
        if let Err(e) = self.launcher.launch(&prompt, self.config.workspace()).await {
            error!(task_id = %ticket.id, "agent failed: {e:#}");
            return SessionOutcome::AgentFailed(format!("{e:#}"));
        }

        info!(task_id = %ticket.id, dir = %task_dir.display(), "agent finished, watching for output");
        let policy = self.config.poll_policy();
        let Some(output) = await_findings(&task_dir, &policy, self.config.findings_grace()).await else {
            warn!(
                task_id = %ticket.id,
                "no output produced; post later with `cfit-bot post-results {}`",
                ticket.id
            );
            return SessionOutcome::NoResults;
        };

        self.deliver(&ticket, &output).await
    }

    // ── Output ────────────────────────────────────────────────────────────

    /// Guard and post `output` for `ticket`. A failed comment does not stop
    /// the findings upload; neither failure is propagated.
    pub async fn deliver(&self, ticket: &TicketInfo, output: &CollectedOutput) -> SessionOutcome {
        info!(task_id = %ticket.id, "posting results to ticket");
        let comment = guard_comment(&ticket.title, &output.body, self.config.max_comment_bytes);
        let posted = self.sink.post_comment(&ticket.id, &comment).await;
        match &posted {
            Ok(()) => info!(task_id = %ticket.id, "summary posted as comment"),
            Err(e) => error!(task_id = %ticket.id, "error posting comment: {e:#}"),
        }

        let attached = match &output.findings_path {
            Some(path) => self.attach_findings(&ticket.id, path).await,
            None => false,
        };

        match posted {
            Ok(()) => SessionOutcome::Posted { attached },
            Err(e) => SessionOutcome::PostFailed(format!("{e:#}")),
        }
    }

    async fn attach_findings(&self, task_id: &str, findings: &Path) -> bool {
        let guarded = match write_guarded_findings(findings, self.config.max_findings_bytes) {
            Ok(p) => p,
            Err(e) => {
                warn!(task_id, "could not prepare findings for upload: {e:#}");
                return false;
            }
        };
        match self.sink.attach_file(task_id, &guarded).await {
            Ok(()) => {
                info!(task_id, "findings attached to ticket");
                true
            }
            Err(e) => {
                warn!(
                    task_id,
                    "error attaching findings: {e:#}; file saved locally at {}",
                    guarded.display()
                );
                false
            }
        }
    }

    /// Re-post output an earlier session left on disk.
    pub async fn post_existing_results(&self, ticket: &TicketInfo) -> SessionOutcome {
        if !validate_task_id(&ticket.id) {
            return SessionOutcome::Rejected(format!("invalid task id {:?}", ticket.id));
        }
        let task_dir = self.config.task_output_dir(&ticket.id);
        match collect_existing(&task_dir) {
            Some(output) => self.deliver(ticket, &output).await,
            None => {
                warn!(task_id = %ticket.id, dir = %task_dir.display(), "no {SUMMARY_FILE} or {FINDINGS_FILE} found");
                SessionOutcome::NoResults
            }
        }
    }

    // ── Teardown ──────────────────────────────────────────────────────────

    /// Remove the ticket's worktrees from every session repository and log
    /// each outcome.
    pub async fn teardown(&self, task_id: &str) -> Vec<RepoTeardown> {
        let workspace = self.config.target_repo_path.clone();
        let repos = self.config.session_repos();
        let id = task_id.to_string();
        let results =
            match tokio::task::spawn_blocking(move || cleanup_worktrees(&workspace, &id, &repos)).await {
                Ok(results) => results,
                Err(e) => {
                    error!(task_id, "worktree teardown task died: {e}");
                    Vec::new()
                }
            };

        for t in &results {
            match &t.removal {
                Removal::Removed(method) => {
                    info!(task_id, repo = %t.repo, method = ?method, "worktree removed")
                }
                Removal::AlreadyAbsent => debug!(task_id, repo = %t.repo, "no worktree present"),
                Removal::Failed(reason) => {
                    warn!(task_id, repo = %t.repo, path = %t.path.display(), "worktree cleanup failed: {reason}")
                }
            }
        }
        results
    }
}

// ── Guards ────────────────────────────────────────────────────────────────

/// Comment text as it may leave the process: control characters stripped,
/// secrets redacted, size capped.
pub fn guard_comment(title: &str, body: &str, max_bytes: usize) -> String {
    let title = sanitize_task_content(title.trim());
    let body = sanitize_task_content(body.trim());
    let comment = if title.is_empty() {
        format!("{COMMENT_HEADER}\n\n{body}")
    } else {
        format!("{COMMENT_HEADER}: {title}\n\n{body}")
    };
    let redacted = redact_secrets(&comment);
    check_size_limit(&redacted, max_bytes).into_owned()
}

pub fn guard_findings(text: &str, max_bytes: usize) -> String {
    let redacted = redact_secrets(text);
    check_size_limit(&redacted, max_bytes).into_owned()
}

/// Write the guarded copy of `findings` next to it and return its path.
pub fn write_guarded_findings(findings: &Path, max_bytes: usize) -> Result<PathBuf> {
    let bytes = std::fs::read(findings).with_context(|| format!("read {}", findings.display()))?;
    let guarded = guard_findings(&String::from_utf8_lossy(&bytes), max_bytes);
    let out = findings.with_file_name(REDACTED_FINDINGS_FILE);
    std::fs::write(&out, guarded).with_context(|| format!("write {}", out.display()))?;
    Ok(out)
}

// ── Output files ──────────────────────────────────────────────────────────

/// Create the ticket's output directory and delete output left by an earlier
/// run so polling cannot pick it up.
pub fn prepare_output_dir(task_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(task_dir)
        .with_context(|| format!("create output dir {}", task_dir.display()))?;
    for name in [SUMMARY_FILE, FINDINGS_FILE, REDACTED_FINDINGS_FILE] {
        let path = task_dir.join(name);
        match std::fs::remove_file(&path) {
            Ok(()) => debug!(path = %path.display(), "removed stale output"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e).with_context(|| format!("remove stale {}", path.display())),
        }
    }
    Ok(())
}

fn read_non_empty(path: &Path) -> Option<String> {
    let bytes = std::fs::read(path).ok()?;
    let text = String::from_utf8_lossy(&bytes).trim().to_string();
    (!text.is_empty()).then_some(text)
}

/// Whatever output is on disk right now: the summary if present, otherwise
/// the findings.
pub fn collect_existing(task_dir: &Path) -> Option<CollectedOutput> {
    let findings_path = task_dir.join(FINDINGS_FILE);
    let findings_exists = findings_path.is_file();
    let body = read_non_empty(&task_dir.join(SUMMARY_FILE))
        .or_else(|| read_non_empty(&findings_path))?;
    Some(CollectedOutput {
        body,
        findings_path: findings_exists.then_some(findings_path),
    })
}

/// Wait for the agent's output files.
///
/// A non-empty summary.txt ends the wait. If only findings.md shows up, the
/// summary gets `grace` more time before findings.md is used instead. On
/// timeout, findings.md is still used when present.
pub async fn await_findings(
    task_dir: &Path,
    policy: &PollPolicy,
    grace: Duration,
) -> Option<CollectedOutput> {
    let summary_path = task_dir.join(SUMMARY_FILE);
    let findings_path = task_dir.join(FINDINGS_FILE);
    let started = Instant::now();
    let mut findings_seen_at: Option<Instant> = None;
    let mut last_progress = started;

    let result = wait_for(policy, || {
        if let Some(summary) = read_non_empty(&summary_path) {
            return Some(summary);
        }
        if findings_path.exists() {
            let seen = *findings_seen_at.get_or_insert_with(|| {
                info!(
                    dir = %task_dir.display(),
                    "{FINDINGS_FILE} detected, waiting up to {}s for {SUMMARY_FILE}",
                    grace.as_secs()
                );
                Instant::now()
            });
            if seen.elapsed() >= grace {
                if let Some(findings) = read_non_empty(&findings_path) {
                    info!("{SUMMARY_FILE} not written, using {FINDINGS_FILE} instead");
                    return Some(findings);
                }
            }
        }
        if last_progress.elapsed() >= PROGRESS_LOG_EVERY {
            last_progress = Instant::now();
            info!(
                dir = %task_dir.display(),
                "still waiting for agent output ({}m elapsed)",
                started.elapsed().as_secs() / 60
            );
        }
        None
    })
    .await;

    let findings_exists = findings_path.is_file();
    match result {
        Ok(body) => Some(CollectedOutput {
            body,
            findings_path: findings_exists.then_some(findings_path),
        }),
        Err(timeout) => {
            warn!(dir = %task_dir.display(), "{timeout} waiting for agent output");
            let body = read_non_empty(&findings_path)?;
            info!("posting {FINDINGS_FILE} after timeout");
            Some(CollectedOutput {
                body,
                findings_path: Some(findings_path),
            })
        }
    }
}
