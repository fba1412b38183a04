//! Integration tests for the git-backed repository adapter
//!
//! Each test builds throwaway repositories in a temp directory: a bare
//! `remote.git` seeded with `master` and `master-foo`, plus working clones.
//! Nothing outside the temp directory is touched.
//!
//! ## Environment Variables
//!
//! - `BRANCHCTL_GIT_TEST_ENABLED=true`: Required to run any git tests
//!
//! ## Running Tests
//!
//! ```bash
//! BRANCHCTL_GIT_TEST_ENABLED=true cargo test --test git_integration
//!
//! # Specific test module
//! BRANCHCTL_GIT_TEST_ENABLED=true cargo test --test git_integration git_repository_tests
//! ```

use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use branchctl::catalog::BranchCatalog;
use branchctl::git::{GitCli, GitRepository, Repository};
use branchctl::guard::ServerGuard;
use branchctl::ops::{BranchOrchestrator, OperationSettings};
use branchctl::repos::{RepoRole, RepositorySet, TrackedRepo};

// ─── Configuration Helpers ───────────────────────────────────────────────────

/// Check if git tests are enabled
fn git_tests_enabled() -> bool {
    env::var("BRANCHCTL_GIT_TEST_ENABLED")
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false)
}

/// Macro to skip test if git tests are not configured
macro_rules! skip_if_not_configured {
    () => {
        if !git_tests_enabled() {
            eprintln!("Skipping test: BRANCHCTL_GIT_TEST_ENABLED not set to true");
            return;
        }
    };
}

/// Run git synchronously for fixture setup, panicking on failure
fn git(cwd: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .env("GIT_AUTHOR_NAME", "branchctl")
        .env("GIT_AUTHOR_EMAIL", "branchctl@example.com")
        .env("GIT_COMMITTER_NAME", "branchctl")
        .env("GIT_COMMITTER_EMAIL", "branchctl@example.com")
        .output()
        .expect("failed to run git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

fn commit_file(repo: &Path, file: &str, content: &str, message: &str) {
    std::fs::write(repo.join(file), content).unwrap();
    git(repo, &["add", file]);
    git(repo, &["commit", "-q", "-m", message]);
}

/// Temp directory holding a bare remote and its clones
struct Sandbox {
    dir: TempDir,
}

impl Sandbox {
    /// Bare remote with `master` and a published `master-foo`
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let root = dir.path();

        git(root, &["init", "-q", "--bare", "-b", "master", "remote.git"]);
        git(root, &["init", "-q", "-b", "master", "seed"]);

        let seed = root.join("seed");
        commit_file(&seed, "README", "seed\n", "initial");
        git(&seed, &["remote", "add", "origin", "../remote.git"]);
        git(&seed, &["push", "-q", "origin", "master"]);

        git(&seed, &["checkout", "-q", "-b", "master-foo"]);
        commit_file(&seed, "foo.txt", "foo\n", "add foo");
        git(&seed, &["push", "-q", "origin", "master-foo"]);
        git(&seed, &["checkout", "-q", "master"]);

        Self { dir }
    }

    fn remote(&self) -> PathBuf {
        self.dir.path().join("remote.git")
    }

    fn state_dir(&self) -> PathBuf {
        self.dir.path().join("state")
    }

    /// Fresh clone on `master`
    fn clone(&self, name: &str) -> GitRepository {
        let remote = self.remote();
        git(
            self.dir.path(),
            &["clone", "-q", "-b", "master", remote.to_str().unwrap(), name],
        );
        let path = self.dir.path().join(name);
        git(&path, &["config", "user.name", "branchctl"]);
        git(&path, &["config", "user.email", "branchctl@example.com"]);
        GitRepository::new(name, path).with_retry_config(1, Duration::from_millis(10))
    }

    /// Publish a new commit on `branch` through the seed repository
    fn push_commit(&self, branch: &str, file: &str) {
        let seed = self.dir.path().join("seed");
        git(&seed, &["checkout", "-q", branch]);
        commit_file(&seed, file, "upstream\n", "upstream change");
        git(&seed, &["push", "-q", "origin", branch]);
        git(&seed, &["checkout", "-q", "master"]);
    }
}

// ─── GitCli ──────────────────────────────────────────────────────────────────

mod git_cli_tests {
    use super::*;

    #[tokio::test]
    async fn test_remotes_lists_fetch_url() {
        skip_if_not_configured!();
        let sandbox = Sandbox::new();
        let repo = sandbox.clone("odoo");

        let remotes = GitCli::remotes(repo.path()).await.unwrap();
        assert_eq!(remotes.len(), 1);
        assert_eq!(remotes[0].name, "origin");
        assert!(remotes[0].fetch_url.ends_with("remote.git"));
    }

    #[tokio::test]
    async fn test_stash_list_carries_labels() {
        skip_if_not_configured!();
        let sandbox = Sandbox::new();
        let repo = sandbox.clone("odoo");
        std::fs::write(repo.path().join("README"), "changed\n").unwrap();

        assert!(GitCli::stash_push(repo.path(), "branchctl:master").await.unwrap());

        let entries = GitCli::stash_list(repo.path()).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].selector, "stash@{0}");
        assert!(entries[0].subject.ends_with(": branchctl:master"));
    }

    #[tokio::test]
    async fn test_is_worktree() {
        skip_if_not_configured!();
        let sandbox = Sandbox::new();
        let repo = sandbox.clone("odoo");

        assert!(GitCli::is_worktree(repo.path()).await.unwrap());
        let outside = TempDir::new().unwrap();
        assert!(!GitCli::is_worktree(outside.path()).await.unwrap());
    }
}

// ─── GitRepository ───────────────────────────────────────────────────────────

mod git_repository_tests {
    use super::*;

    #[tokio::test]
    async fn test_reads_head_and_branches() {
        skip_if_not_configured!();
        let sandbox = Sandbox::new();
        let repo = sandbox.clone("odoo");

        assert_eq!(repo.current_head().await.unwrap(), "master");
        assert_eq!(repo.local_branches().await.unwrap(), vec!["master"]);
        assert!(repo.branch_exists("master").await.unwrap());
        assert!(!repo.branch_exists("master-foo").await.unwrap());
        assert!(!repo.is_dirty().await.unwrap());
    }

    #[tokio::test]
    async fn test_remote_probe_has_no_side_effects() {
        skip_if_not_configured!();
        let sandbox = Sandbox::new();
        let repo = sandbox.clone("odoo");

        assert!(repo.remote_branch_exists("origin", "master-foo").await.unwrap());
        assert!(!repo.remote_branch_exists("origin", "master-nope").await.unwrap());
        assert!(!repo.branch_exists("master-foo").await.unwrap());
    }

    #[tokio::test]
    async fn test_fetch_creates_tracking_branch() {
        skip_if_not_configured!();
        let sandbox = Sandbox::new();
        let repo = sandbox.clone("odoo");

        repo.fetch("origin", "master-foo").await.unwrap();
        repo.checkout("master-foo").await.unwrap();

        assert_eq!(repo.current_head().await.unwrap(), "master-foo");
        assert!(repo.path().join("foo.txt").exists());
    }

    #[tokio::test]
    async fn test_fetch_missing_branch_fails() {
        skip_if_not_configured!();
        let sandbox = Sandbox::new();
        let repo = sandbox.clone("odoo");

        let err = repo.fetch("origin", "master-nope").await.unwrap_err();
        assert!(err.to_string().contains("git fetch failed"));
        assert!(!repo.branch_exists("master-nope").await.unwrap());
    }

    #[tokio::test]
    async fn test_create_and_delete_branch() {
        skip_if_not_configured!();
        let sandbox = Sandbox::new();
        let repo = sandbox.clone("odoo");

        repo.create_branch("master-bar", true).await.unwrap();
        assert_eq!(repo.current_head().await.unwrap(), "master-bar");

        assert!(repo.delete_branch("master-bar", true).await.is_err());
        repo.checkout("master").await.unwrap();
        repo.delete_branch("master-bar", true).await.unwrap();
        assert!(!repo.branch_exists("master-bar").await.unwrap());
    }

    #[tokio::test]
    async fn test_stash_pop_matches_label() {
        skip_if_not_configured!();
        let sandbox = Sandbox::new();
        let repo = sandbox.clone("odoo");
        std::fs::write(repo.path().join("scratch.txt"), "wip\n").unwrap();

        assert!(repo.is_dirty().await.unwrap());
        assert!(repo.stash_push("branchctl:master").await.unwrap());
        assert!(!repo.is_dirty().await.unwrap());
        assert!(!repo.stash_push("branchctl:master").await.unwrap());

        assert!(!repo.stash_pop("branchctl:master-foo").await.unwrap());
        assert!(repo.stash_pop("branchctl:master").await.unwrap());
        assert!(repo.path().join("scratch.txt").exists());
    }

    #[tokio::test]
    async fn test_pull_rebase_and_reset() {
        skip_if_not_configured!();
        let sandbox = Sandbox::new();
        let repo = sandbox.clone("odoo");
        repo.fetch("origin", "master-foo").await.unwrap();
        repo.checkout("master-foo").await.unwrap();

        sandbox.push_commit("master", "upstream.txt");
        repo.pull_rebase("origin", "master").await.unwrap();
        assert!(repo.path().join("upstream.txt").exists());
        assert!(repo.path().join("foo.txt").exists());

        repo.reset_hard("origin/master-foo").await.unwrap();
        assert!(!repo.path().join("upstream.txt").exists());
    }
}

// ─── Orchestration over real repositories ────────────────────────────────────

mod orchestration_tests {
    use super::*;

    fn orchestrator(sandbox: &Sandbox, primary: GitRepository, auxiliary: GitRepository) -> BranchOrchestrator {
        let repos = RepositorySet::new(
            TrackedRepo::new(Arc::new(primary), RepoRole::Primary),
            vec![TrackedRepo::new(Arc::new(auxiliary), RepoRole::Auxiliary)],
            "master",
        );
        let catalog = BranchCatalog::open(&sandbox.state_dir()).unwrap();
        BranchOrchestrator::new(repos, catalog, ServerGuard::disabled(), OperationSettings::default())
    }

    #[tokio::test]
    async fn test_fetch_then_delete_round_trip() {
        skip_if_not_configured!();
        let sandbox = Sandbox::new();
        let odoo = sandbox.clone("odoo");
        let enterprise = sandbox.clone("enterprise");
        let (odoo_path, enterprise_path) = (odoo.path().to_path_buf(), enterprise.path().to_path_buf());
        let mut orchestrator = orchestrator(&sandbox, odoo, enterprise);

        let report = orchestrator.fetch("master", "master-foo", None).await.unwrap();
        assert!(!report.is_partial());
        assert_eq!(GitCli::current_branch(&odoo_path).await.unwrap(), "master-foo");
        assert_eq!(GitCli::current_branch(&enterprise_path).await.unwrap(), "master-foo");
        assert_eq!(orchestrator.active_branch(), Some("master-foo"));

        orchestrator.delete("master", "master-foo").await.unwrap();
        assert_eq!(GitCli::current_branch(&odoo_path).await.unwrap(), "master");
        assert!(!GitCli::branch_exists(&odoo_path, "master-foo").await.unwrap());
        assert_eq!(orchestrator.active_branch(), Some("master"));
    }

    #[tokio::test]
    async fn test_dirty_changes_survive_checkout_round_trip() {
        skip_if_not_configured!();
        let sandbox = Sandbox::new();
        let odoo = sandbox.clone("odoo");
        let enterprise = sandbox.clone("enterprise");
        let odoo_path = odoo.path().to_path_buf();
        let mut orchestrator = orchestrator(&sandbox, odoo, enterprise);

        orchestrator.create("master", "master-bar").await.unwrap();
        std::fs::write(odoo_path.join("wip.txt"), "wip\n").unwrap();

        orchestrator.checkout("master").await.unwrap();
        assert!(!odoo_path.join("wip.txt").exists());

        orchestrator.checkout("master-bar").await.unwrap();
        assert!(odoo_path.join("wip.txt").exists());
        assert!(GitCli::stash_list(&odoo_path).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_bootstrap_from_repositories() {
        skip_if_not_configured!();
        let sandbox = Sandbox::new();
        let odoo = sandbox.clone("odoo");
        odoo.fetch("origin", "master-foo").await.unwrap();
        let enterprise = sandbox.clone("enterprise");
        let mut orchestrator = orchestrator(&sandbox, odoo, enterprise);

        let report = orchestrator.bootstrap().await.unwrap().unwrap();
        assert_eq!(report.bases, vec!["master"]);
        assert!(orchestrator.dev_branch_exists("master", "master-foo"));
        assert_eq!(orchestrator.active_branch(), Some("master"));
    }
}
