mod cli;
mod logging;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use cfit_agent::ClaudeLauncher;
use cfit_core::{
    asana::{extract_task_id, AsanaClient},
    config::Config,
    guardrails::validate_task_id,
    session::Coordinator,
    worktree::{cleanup_worktrees, list_worktrees, Removal},
    SessionOutcome, TicketInfo,
};
use clap::Parser;
use tracing::{error, info, warn};

use crate::cli::{Cli, Commands, WorktreeCommands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log_format);

    let config = Arc::new(Config::from_env()?);

    match cli.command {
        Commands::Investigate { task_urls } => investigate(config, &task_urls).await,
        Commands::PostResults { task_id } => post_results(config, &task_id).await,
        Commands::Worktrees { command } => worktrees(&config, command),
    }
}

/// Accept either a task URL or a bare task id.
fn resolve_task_id(arg: &str) -> Option<String> {
    let arg = arg.trim();
    if validate_task_id(arg) {
        return Some(arg.to_string());
    }
    extract_task_id(arg)
}

fn build_coordinator(config: &Arc<Config>) -> Result<(Arc<Coordinator>, Arc<AsanaClient>)> {
    if config.asana_access_token.is_empty() {
        bail!("ASANA_ACCESS_TOKEN is not set");
    }
    if config.agent_mode != "claude" {
        warn!(mode = %config.agent_mode, "unsupported AGENT_MODE, using claude");
    }
    let asana = Arc::new(AsanaClient::new(&config.asana_access_token));
    let launcher = Arc::new(ClaudeLauncher::from_config(config));
    let coordinator = Arc::new(Coordinator::new(
        Arc::clone(config),
        launcher,
        Arc::clone(&asana) as Arc<dyn cfit_core::agent::ResultSink>,
    ));
    Ok((coordinator, asana))
}

async fn investigate(config: Arc<Config>, task_urls: &[String]) -> Result<()> {
    let mut ids = Vec::new();
    for url in task_urls {
        match resolve_task_id(url) {
            Some(id) if !ids.contains(&id) => ids.push(id),
            Some(id) => warn!(task_id = %id, "duplicate ticket on command line, skipping"),
            None => error!(input = %url, "not a valid Asana task URL or id, skipping"),
        }
    }
    if ids.is_empty() {
        bail!("no valid task ids given");
    }

    let (coordinator, asana) = build_coordinator(&config)?;
    let mut handles = Vec::new();
    for id in ids {
        let ticket = match asana.fetch_task(&id).await {
            Ok(t) => t,
            Err(e) => {
                error!(task_id = %id, "failed to fetch task: {e:#}");
                continue;
            }
        };
        info!(task_id = %id, title = %ticket.title, "fetched task");

        let attachments: Vec<PathBuf> = asana
            .fetch_attachments(&id, &config.task_output_dir(&id))
            .await
            .unwrap_or_else(|e| {
                warn!(task_id = %id, "failed to list attachments: {e:#}");
                Vec::new()
            });

        handles.push(coordinator.spawn(ticket, attachments).await);
    }

    let mut failed = 0usize;
    for handle in handles {
        match handle.await {
            Ok(report) => {
                if !matches!(report.outcome, SessionOutcome::Posted { .. }) {
                    failed += 1;
                }
                println!("{}", report.summary_line());
            }
            Err(e) => {
                failed += 1;
                error!("session task died: {e}");
            }
        }
    }
    if failed > 0 {
        bail!("{failed} session(s) did not post results");
    }
    Ok(())
}

async fn post_results(config: Arc<Config>, task_id: &str) -> Result<()> {
    let Some(task_id) = resolve_task_id(task_id) else {
        bail!("invalid task id: {task_id:?}");
    };
    let (coordinator, asana) = build_coordinator(&config)?;

    let ticket = match asana.fetch_task(&task_id).await {
        Ok(t) => t,
        Err(e) => {
            warn!(task_id = %task_id, "failed to fetch task, posting without title: {e:#}");
            TicketInfo::new(&task_id, "", "", "")
        }
    };

    let outcome = coordinator.post_existing_results(&ticket).await;
    println!("task {task_id}: {outcome:?}");
    match outcome {
        SessionOutcome::Posted { .. } => Ok(()),
        other => bail!("results not posted: {other:?}"),
    }
}

fn worktrees(config: &Config, command: WorktreeCommands) -> Result<()> {
    let repos = config.session_repos();
    match command {
        WorktreeCommands::List => {
            let found = list_worktrees(config.workspace(), &repos);
            if found.is_empty() {
                println!("No active CFIT worktrees.");
            }
            for path in found {
                println!("{}", path.display());
            }
        }
        WorktreeCommands::Cleanup { task_id } => {
            let Some(task_id) = resolve_task_id(&task_id) else {
                bail!("invalid task id: {task_id:?}");
            };
            for t in cleanup_worktrees(config.workspace(), &task_id, &repos) {
                let status = match &t.removal {
                    Removal::Removed(method) => format!("removed ({method:?})"),
                    Removal::AlreadyAbsent => "not present".to_string(),
                    Removal::Failed(reason) => format!("FAILED: {reason}"),
                };
                println!("{}: {} {status}", t.repo, t.path.display());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_urls_and_bare_ids() {
        assert_eq!(resolve_task_id("1234567890").as_deref(), Some("1234567890"));
        assert_eq!(
            resolve_task_id("https://app.asana.com/1/1030/task/1212983431153004").as_deref(),
            Some("1212983431153004")
        );
        assert_eq!(resolve_task_id("12ab5"), None);
        assert_eq!(resolve_task_id("https://app.asana.com/0/1/99"), None);
    }

    #[test]
    fn cleanup_rejects_invalid_task_id() {
        let tmp = tempfile::TempDir::new().unwrap();
        let keep = tmp.path().join("api").join("keep");
        std::fs::create_dir_all(&keep).unwrap();
        let config = Config {
            target_repo_path: tmp.path().to_path_buf(),
            investigation_repos: vec!["api".into()],
            ..Config::default()
        };

        for bad in ["../../api", "12ab5", ""] {
            let err = worktrees(
                &config,
                WorktreeCommands::Cleanup {
                    task_id: bad.to_string(),
                },
            )
            .unwrap_err();
            assert!(err.to_string().contains("invalid task id"), "{bad:?}");
        }
        assert!(keep.exists());
        assert!(worktrees(
            &config,
            WorktreeCommands::Cleanup {
                task_id: "1234567".into()
            }
        )
        .is_ok());
    }
}
