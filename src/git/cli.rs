//! Git CLI wrapper for branch, stash and remote operations.
//!
//! Uses the git CLI directly (rather than libgit2) so that hooks, credential
//! helpers and the user's git configuration behave exactly as on the shell.

use anyhow::{anyhow, Context, Result};
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, instrument};

/// A configured remote and the URL it fetches from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Remote {
    pub name: String,
    pub fetch_url: String,
}

/// Entry from `git stash list`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StashEntry {
    /// Selector such as `stash@{0}`
    pub selector: String,
    /// Reflog subject, e.g. `On master-foo: branchctl:master-foo`
    pub subject: String,
}

/// Low-level git command wrapper
pub struct GitCli;

impl GitCli {
    /// Execute a git command and return stdout
    async fn run_git(args: &[&str], cwd: &Path) -> Result<String> {
        debug!(?args, ?cwd, "Running git command");

        let output = Command::new("git")
            .args(args)
            .current_dir(cwd)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .context("Failed to execute git command")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "git {} failed: {}",
                args.first().unwrap_or(&""),
                stderr.trim()
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Execute a git command, returning Ok(()) on success
    async fn run_git_silent(args: &[&str], cwd: &Path) -> Result<()> {
        Self::run_git(args, cwd).await?;
        Ok(())
    }

    /// Execute a git command whose exit status is the answer
    async fn run_git_check(args: &[&str], cwd: &Path) -> Result<bool> {
        debug!(?args, ?cwd, "Running git check");

        let status = Command::new("git")
            .args(args)
            .current_dir(cwd)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .context("Failed to execute git command")?;

        Ok(status.success())
    }

    /// Get the current branch name (`HEAD` when detached)
    #[instrument(skip_all, fields(path = %path.display()))]
    pub async fn current_branch(path: &Path) -> Result<String> {
        Self::run_git(&["rev-parse", "--abbrev-ref", "HEAD"], path).await
    }

    /// Check if the working directory has uncommitted changes
    #[instrument(skip_all, fields(path = %path.display()))]
    pub async fn is_dirty(path: &Path) -> Result<bool> {
        let output = Self::run_git(&["status", "--porcelain"], path).await?;
        Ok(!output.is_empty())
    }

    /// List local branch names
    #[instrument(skip_all, fields(path = %path.display()))]
    pub async fn local_branches(path: &Path) -> Result<Vec<String>> {
        let output = Self::run_git(
            &["for-each-ref", "--format=%(refname:short)", "refs/heads"],
            path,
        )
        .await?;

        Ok(output
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(ToString::to_string)
            .collect())
    }

    /// Check whether a local branch exists
    #[instrument(skip_all, fields(path = %path.display(), branch))]
    pub async fn branch_exists(path: &Path, branch: &str) -> Result<bool> {
        let refname = format!("refs/heads/{branch}");
        Self::run_git_check(&["show-ref", "--verify", "--quiet", &refname], path).await
    }

    /// List remotes with their fetch URLs
    #[instrument(skip_all, fields(path = %path.display()))]
    pub async fn remotes(path: &Path) -> Result<Vec<Remote>> {
        let output = Self::run_git(&["remote", "-v"], path).await?;
        Ok(parse_remotes(&output))
    }

    /// Fetch a single branch from a remote
    #[instrument(skip_all, fields(path = %path.display(), remote, branch))]
    pub async fn fetch_branch(path: &Path, remote: &str, branch: &str) -> Result<()> {
        Self::run_git_silent(&["fetch", remote, branch], path).await
    }

    /// Check if a branch exists on remote
    #[instrument(skip_all, fields(path = %path.display(), remote, branch))]
    pub async fn remote_branch_exists(path: &Path, remote: &str, branch: &str) -> Result<bool> {
        let result = Self::run_git(&["ls-remote", "--heads", remote, branch], path).await?;
        Ok(!result.is_empty())
    }

    /// Check out an existing branch or ref
    #[instrument(skip_all, fields(path = %path.display(), reference))]
    pub async fn checkout(path: &Path, reference: &str) -> Result<()> {
        Self::run_git_silent(&["checkout", reference], path).await
    }

    /// Create a branch at HEAD and check it out
    #[instrument(skip_all, fields(path = %path.display(), branch))]
    pub async fn checkout_new_branch(path: &Path, branch: &str) -> Result<()> {
        Self::run_git_silent(&["checkout", "-b", branch], path).await
    }

    /// Create a new branch from a base
    #[instrument(skip_all, fields(path = %path.display(), branch, base))]
    pub async fn create_branch(path: &Path, branch: &str, base: &str) -> Result<()> {
        Self::run_git_silent(&["branch", branch, base], path).await
    }

    /// Create a local branch tracking `remote/branch`
    #[instrument(skip_all, fields(path = %path.display(), remote, branch))]
    pub async fn track_branch(path: &Path, remote: &str, branch: &str) -> Result<()> {
        let upstream = format!("{remote}/{branch}");
        Self::run_git_silent(&["branch", "--track", branch, &upstream], path).await
    }

    /// Delete a branch (local)
    #[instrument(skip_all, fields(path = %path.display(), branch, force))]
    pub async fn delete_branch(path: &Path, branch: &str, force: bool) -> Result<()> {
        let flag = if force { "-D" } else { "-d" };
        Self::run_git_silent(&["branch", flag, branch], path).await
    }

    /// Fast-forward the current branch from its upstream
    #[instrument(skip_all, fields(path = %path.display()))]
    pub async fn pull(path: &Path) -> Result<()> {
        Self::run_git_silent(&["pull", "--ff-only"], path).await
    }

    /// Rebase the current branch onto `remote/branch`
    #[instrument(skip_all, fields(path = %path.display(), remote, branch))]
    pub async fn pull_rebase(path: &Path, remote: &str, branch: &str) -> Result<()> {
        Self::run_git_silent(&["pull", "--rebase", remote, branch], path).await
    }

    /// Reset to a specific commit
    #[instrument(skip_all, fields(path = %path.display(), commit, hard))]
    pub async fn reset(path: &Path, commit: &str, hard: bool) -> Result<()> {
        if hard {
            Self::run_git_silent(&["reset", "--hard", commit], path).await
        } else {
            Self::run_git_silent(&["reset", commit], path).await
        }
    }

    /// Stash tracked and untracked changes under a message
    #[instrument(skip_all, fields(path = %path.display(), message))]
    pub async fn stash_push(path: &Path, message: &str) -> Result<bool> {
        let output = Self::run_git(
            &["stash", "push", "--include-untracked", "-m", message],
            path,
        )
        .await?;
        Ok(!output.contains("No local changes to save"))
    }

    /// List stash entries, newest first
    #[instrument(skip_all, fields(path = %path.display()))]
    pub async fn stash_list(path: &Path) -> Result<Vec<StashEntry>> {
        let output = Self::run_git(&["stash", "list", "--format=%gd%x09%gs"], path).await?;
        Ok(parse_stash_list(&output))
    }

    /// Pop a specific stash entry
    #[instrument(skip_all, fields(path = %path.display(), selector))]
    pub async fn stash_pop(path: &Path, selector: &str) -> Result<()> {
        Self::run_git_silent(&["stash", "pop", selector], path).await
    }

    /// Check if path is inside a git worktree
    #[instrument(skip_all, fields(path = %path.display()))]
    pub async fn is_worktree(path: &Path) -> Result<bool> {
        let result = Self::run_git(&["rev-parse", "--is-inside-work-tree"], path).await;
        match result {
            Ok(output) => Ok(output == "true"),
            Err(_) => Ok(false),
        }
    }
}

/// Parse `git remote -v`, keeping the `(fetch)` lines
fn parse_remotes(output: &str) -> Vec<Remote> {
    output
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let name = parts.next()?;
            let url = parts.next()?;
            let kind = parts.next()?;
            (kind == "(fetch)").then(|| Remote {
                name: name.to_string(),
                fetch_url: url.to_string(),
            })
        })
        .collect()
}

fn parse_stash_list(output: &str) -> Vec<StashEntry> {
    output
        .lines()
        .filter_map(|line| {
            let (selector, subject) = line.split_once('\t')?;
            Some(StashEntry {
                selector: selector.to_string(),
                subject: subject.to_string(),
            })
        })
        .collect()
}
