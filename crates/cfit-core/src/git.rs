use std::{
    path::{Path, PathBuf},
    process::Command,
};

use anyhow::{anyhow, Context, Result};

pub struct ExecResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ExecResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Thin wrapper over the `git` binary, scoped to one repository.
pub struct Git {
    pub repo_path: PathBuf,
}

impl Git {
    pub fn new(repo_path: impl Into<PathBuf>) -> Self {
        Self {
            repo_path: repo_path.into(),
        }
    }

    pub fn exec(&self, args: &[&str]) -> Result<ExecResult> {
        let dir = self.repo_path.display();
        let output = Command::new("git")
            .arg("-C")
            .arg(&self.repo_path)
            .args(args)
            .output()
            .with_context(|| format!("failed to spawn git -C {dir} {}", args.join(" ")))?;

        Ok(ExecResult {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(1),
        })
    }

    fn exec_checked(&self, args: &[&str]) -> Result<ExecResult> {
        let result = self.exec(args)?;
        if !result.success() {
            return Err(anyhow!(
                "git {} failed in {}: {}",
                args.join(" "),
                self.repo_path.display(),
                result.combined_output().trim()
            ));
        }
        Ok(result)
    }

    /// `git worktree remove --force`: uncommitted changes inside the worktree
    /// do not block removal.
    pub fn remove_worktree(&self, worktree_path: &Path) -> Result<()> {
        let wt = worktree_path.to_string_lossy();
        self.exec_checked(&["worktree", "remove", "--force", &wt])?;
        Ok(())
    }

    pub fn prune_worktrees(&self) -> Result<()> {
        self.exec_checked(&["worktree", "prune"])?;
        Ok(())
    }

    pub fn delete_branch(&self, branch: &str) -> Result<()> {
        self.exec_checked(&["branch", "-D", branch])?;
        Ok(())
    }

    pub fn branch_exists(&self, branch: &str) -> Result<bool> {
        let result = self.exec_checked(&["branch", "--list", branch])?;
        Ok(!result.stdout.trim().is_empty())
    }
}
