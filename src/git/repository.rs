//! Repository abstraction consumed by the orchestration engine.
//!
//! One [`Repository`] per tracked checkout. The engine only ever talks to
//! this trait, so tests drive it with [`crate::git::MockRepository`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use tracing::{instrument, warn};

use crate::git::cli::{GitCli, Remote};

/// Per-repository capability set used by branch operations
#[async_trait]
pub trait Repository: Send + Sync {
    /// Display name, used in reports and logs
    fn name(&self) -> &str;

    /// Name of the checked-out branch
    async fn current_head(&self) -> Result<String>;

    /// Configured remotes
    async fn remotes(&self) -> Result<Vec<Remote>>;

    /// Whether the working tree has uncommitted changes
    async fn is_dirty(&self) -> Result<bool>;

    /// Local branch names
    async fn local_branches(&self) -> Result<Vec<String>>;

    /// Whether a local branch exists
    async fn branch_exists(&self, name: &str) -> Result<bool>;

    /// Whether `branch` exists on `remote` (listing only, no side effects)
    async fn remote_branch_exists(&self, remote: &str, branch: &str) -> Result<bool>;

    /// Fetch `branch` from `remote` so that it can be checked out locally
    async fn fetch(&self, remote: &str, branch: &str) -> Result<()>;

    async fn checkout(&self, reference: &str) -> Result<()>;

    /// Create a branch at HEAD, optionally checking it out
    async fn create_branch(&self, name: &str, checkout: bool) -> Result<()>;

    async fn delete_branch(&self, name: &str, force: bool) -> Result<()>;

    /// Fast-forward the current branch from its upstream
    async fn pull(&self) -> Result<()>;

    /// Rebase the current branch onto `remote/branch`
    async fn pull_rebase(&self, remote: &str, branch: &str) -> Result<()>;

    async fn reset_hard(&self, reference: &str) -> Result<()>;

    /// Stash local changes under `label`. Returns false when nothing was stashed.
    async fn stash_push(&self, label: &str) -> Result<bool>;

    /// Pop the most recent stash saved under `label`. Returns false when none exists.
    async fn stash_pop(&self, label: &str) -> Result<bool>;
}

/// Repository backed by the git CLI
pub struct GitRepository {
    name: String,
    path: PathBuf,
    /// Maximum retry attempts for network operations
    max_retries: usize,
    /// Base delay for exponential backoff
    base_delay: Duration,
}

impl GitRepository {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            max_retries: 2,
            base_delay: Duration::from_millis(500),
        }
    }

    /// Create with custom retry settings
    pub fn with_retry_config(mut self, max_retries: usize, base_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.base_delay = base_delay;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn retry_strategy(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.base_delay)
            .with_max_delay(Duration::from_secs(10))
            .with_max_times(self.max_retries)
    }

    /// Only transient network failures are worth another attempt
    fn should_retry(err: &anyhow::Error) -> bool {
        let err_str = err.to_string().to_lowercase();
        err_str.contains("timed out")
            || err_str.contains("connection reset")
            || err_str.contains("connection refused")
            || err_str.contains("could not resolve host")
            || err_str.contains("the remote end hung up unexpectedly")
            || err_str.contains("502")
            || err_str.contains("503")
            || err_str.contains("504")
    }
}

#[async_trait]
impl Repository for GitRepository {
    fn name(&self) -> &str {
        &self.name
    }

    async fn current_head(&self) -> Result<String> {
        GitCli::current_branch(&self.path).await
    }

    async fn remotes(&self) -> Result<Vec<Remote>> {
        GitCli::remotes(&self.path).await
    }

    async fn is_dirty(&self) -> Result<bool> {
        GitCli::is_dirty(&self.path).await
    }

    async fn local_branches(&self) -> Result<Vec<String>> {
        GitCli::local_branches(&self.path).await
    }

    async fn branch_exists(&self, name: &str) -> Result<bool> {
        GitCli::branch_exists(&self.path, name).await
    }

    #[instrument(skip(self), fields(repo = %self.name))]
    async fn remote_branch_exists(&self, remote: &str, branch: &str) -> Result<bool> {
        let op = || async { GitCli::remote_branch_exists(&self.path, remote, branch).await };

        op.retry(self.retry_strategy())
            .when(Self::should_retry)
            .notify(|err, dur| {
                warn!("Retrying ls-remote after {:?}: {}", dur, err);
            })
            .await
    }

    #[instrument(skip(self), fields(repo = %self.name))]
    async fn fetch(&self, remote: &str, branch: &str) -> Result<()> {
        let op = || async { GitCli::fetch_branch(&self.path, remote, branch).await };

        op.retry(self.retry_strategy())
            .when(Self::should_retry)
            .notify(|err, dur| {
                warn!("Retrying fetch after {:?}: {}", dur, err);
            })
            .await?;

        if !GitCli::branch_exists(&self.path, branch).await? {
            GitCli::track_branch(&self.path, remote, branch).await?;
        }
        Ok(())
    }

    async fn checkout(&self, reference: &str) -> Result<()> {
        GitCli::checkout(&self.path, reference).await
    }

    async fn create_branch(&self, name: &str, checkout: bool) -> Result<()> {
        if checkout {
            GitCli::checkout_new_branch(&self.path, name).await
        } else {
            GitCli::create_branch(&self.path, name, "HEAD").await
        }
    }

    async fn delete_branch(&self, name: &str, force: bool) -> Result<()> {
        GitCli::delete_branch(&self.path, name, force).await
    }

    #[instrument(skip(self), fields(repo = %self.name))]
    async fn pull(&self) -> Result<()> {
        let op = || async { GitCli::pull(&self.path).await };

        op.retry(self.retry_strategy())
            .when(Self::should_retry)
            .notify(|err, dur| {
                warn!("Retrying pull after {:?}: {}", dur, err);
            })
            .await
    }

    #[instrument(skip(self), fields(repo = %self.name))]
    async fn pull_rebase(&self, remote: &str, branch: &str) -> Result<()> {
        GitCli::pull_rebase(&self.path, remote, branch).await
    }

    async fn reset_hard(&self, reference: &str) -> Result<()> {
        GitCli::reset(&self.path, reference, true).await
    }

    async fn stash_push(&self, label: &str) -> Result<bool> {
        GitCli::stash_push(&self.path, label).await
    }

    async fn stash_pop(&self, label: &str) -> Result<bool> {
        let suffix = format!(": {label}");
        let entries = GitCli::stash_list(&self.path).await?;
        let Some(entry) = entries.iter().find(|e| e.subject.ends_with(&suffix)) else {
            return Ok(false);
        };
        GitCli::stash_pop(&self.path, &entry.selector).await?;
        Ok(true)
    }
}
