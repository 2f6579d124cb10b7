//! Discovery and teardown of per-ticket git worktrees.
//!
//! The agent creates `<repo>/.worktrees/cfit-<id>` itself; this module only
//! finds and removes them. Concurrent tickets never share a path because the
//! identifier is part of the directory name, so no locking happens here.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::git::Git;

pub const WORKTREES_DIR: &str = ".worktrees";
pub const WORKTREE_PREFIX: &str = "cfit-";

pub fn worktree_dir_name(task_id: &str) -> String {
    format!("{WORKTREE_PREFIX}{task_id}")
}

/// Branch the agent is told to create for the ticket's worktree.
pub fn branch_name(task_id: &str) -> String {
    format!("fix/{WORKTREE_PREFIX}{task_id}")
}

pub fn worktree_path(workspace: &Path, repo: &str, task_id: &str) -> PathBuf {
    workspace
        .join(repo)
        .join(WORKTREES_DIR)
        .join(worktree_dir_name(task_id))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalMethod {
    /// `git worktree remove --force` succeeded.
    Git,
    /// Directory deleted from disk, then `git worktree prune`.
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Removal {
    Removed(RemovalMethod),
    AlreadyAbsent,
    Failed(String),
}

/// Outcome of tearing down one repository's worktree for a ticket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoTeardown {
    pub repo: String,
    pub path: PathBuf,
    pub removal: Removal,
}

impl RepoTeardown {
    pub fn is_failure(&self) -> bool {
        matches!(self.removal, Removal::Failed(_))
    }
}

fn is_safe_task_id(task_id: &str) -> bool {
    !task_id.is_empty()
        && task_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Remove the ticket's worktree from every listed repository.
///
/// Missing worktrees are skipped. A failure in one repository is recorded in
/// its [`RepoTeardown`] and the remaining repositories are still processed.
/// Safe to call repeatedly.
pub fn cleanup_worktrees(workspace: &Path, task_id: &str, repos: &[String]) -> Vec<RepoTeardown> {
    repos
        .iter()
        .map(|repo| {
            let path = worktree_path(workspace, repo, task_id);
            let removal = if is_safe_task_id(task_id) {
                teardown_one(&workspace.join(repo), &path, task_id)
            } else {
                Removal::Failed(format!("refusing unsafe ticket identifier {task_id:?}"))
            };
            RepoTeardown {
                repo: repo.clone(),
                path,
                removal,
            }
        })
        .collect()
}

fn teardown_one(repo_dir: &Path, wt_path: &Path, task_id: &str) -> Removal {
    if !wt_path.exists() {
        debug!(path = %wt_path.display(), "no worktree to clean up");
        return Removal::AlreadyAbsent;
    }

    info!(path = %wt_path.display(), "cleaning up worktree");
    let git = Git::new(repo_dir);

    let method = match git.remove_worktree(wt_path) {
        Ok(()) => RemovalMethod::Git,
        Err(e) => {
            warn!(path = %wt_path.display(), "git worktree remove failed: {e:#}");
            if let Err(e) = std::fs::remove_dir_all(wt_path) {
                warn!(path = %wt_path.display(), "worktree fallback removal failed: {e}");
                return Removal::Failed(format!("remove_dir_all {}: {e}", wt_path.display()));
            }
            if let Err(e) = git.prune_worktrees() {
                debug!(repo = %repo_dir.display(), "git worktree prune skipped: {e:#}");
            }
            RemovalMethod::Fallback
        }
    };
    info!(path = %wt_path.display(), method = ?method, "worktree removed");

    let branch = branch_name(task_id);
    match git.branch_exists(&branch) {
        Ok(true) => match git.delete_branch(&branch) {
            Ok(()) => info!(branch = %branch, "branch deleted"),
            Err(e) => warn!(branch = %branch, "branch deletion failed: {e:#}"),
        },
        Ok(false) => debug!(branch = %branch, "no branch to delete"),
        Err(e) => debug!(branch = %branch, "branch lookup skipped: {e:#}"),
    }

    Removal::Removed(method)
}

/// List existing `cfit-*` worktree directories, sorted within each
/// repository and concatenated in `repos` order.
pub fn list_worktrees(workspace: &Path, repos: &[String]) -> Vec<PathBuf> {
    let mut result = Vec::new();
    for repo in repos {
        let wt_dir = workspace.join(repo).join(WORKTREES_DIR);
        let Ok(entries) = std::fs::read_dir(&wt_dir) else {
            continue;
        };
        let mut found: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .filter(|e| e.file_name().to_string_lossy().starts_with(WORKTREE_PREFIX))
            .map(|e| e.path())
            .collect();
        found.sort();
        result.extend(found);
    }
    result
}
