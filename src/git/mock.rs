//! In-memory repository for tests.
//!
//! Simulates local/remote branches, a dirty working tree and labelled
//! stashes, and records every call so tests can assert which repositories
//! an operation actually touched.

use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::git::cli::Remote;
use crate::git::repository::Repository;

#[derive(Debug, Clone)]
pub struct MockCommand {
    pub operation: String,
    pub args: Vec<String>,
}

#[derive(Debug, Default)]
struct MockRepoState {
    head: String,
    branches: BTreeSet<String>,
    remotes: Vec<Remote>,
    remote_branches: HashMap<String, BTreeSet<String>>,
    dirty: bool,
    /// Stash labels, oldest first
    stashes: Vec<String>,
    /// "operation" or "operation:arg" -> error message
    failures: HashMap<String, String>,
}

/// Mock implementation for testing
pub struct MockRepository {
    name: String,
    state: Mutex<MockRepoState>,
    command_log: Mutex<Vec<MockCommand>>,
}

impl MockRepository {
    /// A clean repository on `master` with an `origin` remote
    pub fn new(name: &str) -> Self {
        let mut state = MockRepoState {
            head: "master".to_string(),
            ..MockRepoState::default()
        };
        state.branches.insert("master".to_string());
        state.remotes.push(Remote {
            name: "origin".to_string(),
            fetch_url: format!("git@github.com:odoo/{name}.git"),
        });
        state
            .remote_branches
            .insert("origin".to_string(), BTreeSet::from(["master".to_string()]));

        Self {
            name: name.to_string(),
            state: Mutex::new(state),
            command_log: Mutex::new(Vec::new()),
        }
    }

    /// Add local branches
    pub fn with_branches(self, branches: &[&str]) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state
                .branches
                .extend(branches.iter().map(ToString::to_string));
        }
        self
    }

    /// Check out an existing (or new) local branch
    pub fn on_branch(self, branch: &str) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.branches.insert(branch.to_string());
            state.head = branch.to_string();
        }
        self
    }

    /// Add or extend a remote with the branches it carries
    pub fn with_remote(self, name: &str, url: &str, branches: &[&str]) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            if !state.remotes.iter().any(|r| r.name == name) {
                state.remotes.push(Remote {
                    name: name.to_string(),
                    fetch_url: url.to_string(),
                });
            }
            state
                .remote_branches
                .entry(name.to_string())
                .or_default()
                .extend(branches.iter().map(ToString::to_string));
        }
        self
    }

    pub fn dirty(self) -> Self {
        self.state.lock().unwrap().dirty = true;
        self
    }

    /// Make `operation` fail, for every argument or only for `arg`
    pub fn fail_on(&self, operation: &str, arg: Option<&str>, message: &str) {
        let key = match arg {
            Some(a) => format!("{operation}:{a}"),
            None => operation.to_string(),
        };
        self.state
            .lock()
            .unwrap()
            .failures
            .insert(key, message.to_string());
    }

    pub fn head(&self) -> String {
        self.state.lock().unwrap().head.clone()
    }

    pub fn has_branch(&self, branch: &str) -> bool {
        self.state.lock().unwrap().branches.contains(branch)
    }

    pub fn is_dirty_now(&self) -> bool {
        self.state.lock().unwrap().dirty
    }

    pub fn stashes(&self) -> Vec<String> {
        self.state.lock().unwrap().stashes.clone()
    }

    /// Get the command log
    pub fn get_commands(&self) -> Vec<MockCommand> {
        self.command_log.lock().unwrap().clone()
    }

    /// Whether any mutating command ran against this repository
    pub fn was_mutated(&self) -> bool {
        const READ_ONLY: [&str; 6] = [
            "current_head",
            "remotes",
            "is_dirty",
            "local_branches",
            "branch_exists",
            "remote_branch_exists",
        ];
        self.get_commands()
            .iter()
            .any(|c| !READ_ONLY.contains(&c.operation.as_str()))
    }

    pub fn called(&self, operation: &str) -> bool {
        self.get_commands().iter().any(|c| c.operation == operation)
    }

    fn log_command(&self, operation: &str, args: &[&str]) {
        self.command_log.lock().unwrap().push(MockCommand {
            operation: operation.to_string(),
            args: args.iter().map(ToString::to_string).collect(),
        });
    }

    fn injected_failure(&self, operation: &str, arg: &str) -> Result<()> {
        let state = self.state.lock().unwrap();
        let message = state
            .failures
            .get(&format!("{operation}:{arg}"))
            .or_else(|| state.failures.get(operation));
        match message {
            Some(m) => Err(anyhow!("git {operation} failed: {m}")),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Repository for MockRepository {
    fn name(&self) -> &str {
        &self.name
    }

    async fn current_head(&self) -> Result<String> {
        self.log_command("current_head", &[]);
        self.injected_failure("current_head", "")?;
        Ok(self.head())
    }

    async fn remotes(&self) -> Result<Vec<Remote>> {
        self.log_command("remotes", &[]);
        Ok(self.state.lock().unwrap().remotes.clone())
    }

    async fn is_dirty(&self) -> Result<bool> {
        self.log_command("is_dirty", &[]);
        self.injected_failure("is_dirty", "")?;
        Ok(self.is_dirty_now())
    }

    async fn local_branches(&self) -> Result<Vec<String>> {
        self.log_command("local_branches", &[]);
        self.injected_failure("local_branches", "")?;
        Ok(self.state.lock().unwrap().branches.iter().cloned().collect())
    }

    async fn branch_exists(&self, name: &str) -> Result<bool> {
        self.log_command("branch_exists", &[name]);
        Ok(self.has_branch(name))
    }

    async fn remote_branch_exists(&self, remote: &str, branch: &str) -> Result<bool> {
        self.log_command("remote_branch_exists", &[remote, branch]);
        self.injected_failure("remote_branch_exists", branch)?;
        let state = self.state.lock().unwrap();
        Ok(state
            .remote_branches
            .get(remote)
            .is_some_and(|b| b.contains(branch)))
    }

    async fn fetch(&self, remote: &str, branch: &str) -> Result<()> {
        self.log_command("fetch", &[remote, branch]);
        self.injected_failure("fetch", branch)?;
        let mut state = self.state.lock().unwrap();
        let found = state
            .remote_branches
            .get(remote)
            .is_some_and(|b| b.contains(branch));
        if !found {
            return Err(anyhow!(
                "git fetch failed: fatal: couldn't find remote ref {branch}"
            ));
        }
        state.branches.insert(branch.to_string());
        Ok(())
    }

    async fn checkout(&self, reference: &str) -> Result<()> {
        self.log_command("checkout", &[reference]);
        self.injected_failure("checkout", reference)?;
        let mut state = self.state.lock().unwrap();
        if !state.branches.contains(reference) {
            return Err(anyhow!(
                "git checkout failed: error: pathspec '{reference}' did not match any file(s) known to git"
            ));
        }
        state.head = reference.to_string();
        Ok(())
    }

    async fn create_branch(&self, name: &str, checkout: bool) -> Result<()> {
        self.log_command("create_branch", &[name]);
        self.injected_failure("create_branch", name)?;
        let mut state = self.state.lock().unwrap();
        if !state.branches.insert(name.to_string()) {
            return Err(anyhow!(
                "git checkout failed: fatal: a branch named '{name}' already exists"
            ));
        }
        if checkout {
            state.head = name.to_string();
        }
        Ok(())
    }

    async fn delete_branch(&self, name: &str, _force: bool) -> Result<()> {
        self.log_command("delete_branch", &[name]);
        self.injected_failure("delete_branch", name)?;
        let mut state = self.state.lock().unwrap();
        if state.head == name {
            return Err(anyhow!(
                "git branch failed: error: cannot delete branch '{name}' used by worktree"
            ));
        }
        if !state.branches.remove(name) {
            return Err(anyhow!("git branch failed: error: branch '{name}' not found"));
        }
        Ok(())
    }

    async fn pull(&self) -> Result<()> {
        self.log_command("pull", &[]);
        self.injected_failure("pull", "")
    }

    async fn pull_rebase(&self, remote: &str, branch: &str) -> Result<()> {
        self.log_command("pull_rebase", &[remote, branch]);
        self.injected_failure("pull_rebase", branch)?;
        if self.is_dirty_now() {
            return Err(anyhow!(
                "git pull failed: error: cannot pull with rebase: You have unstaged changes."
            ));
        }
        Ok(())
    }

    async fn reset_hard(&self, reference: &str) -> Result<()> {
        self.log_command("reset_hard", &[reference]);
        self.injected_failure("reset_hard", reference)?;
        self.state.lock().unwrap().dirty = false;
        Ok(())
    }

    async fn stash_push(&self, label: &str) -> Result<bool> {
        self.log_command("stash_push", &[label]);
        self.injected_failure("stash_push", label)?;
        let mut state = self.state.lock().unwrap();
        if !state.dirty {
            return Ok(false);
        }
        state.stashes.push(label.to_string());
        state.dirty = false;
        Ok(true)
    }

    async fn stash_pop(&self, label: &str) -> Result<bool> {
        self.log_command("stash_pop", &[label]);
        self.injected_failure("stash_pop", label)?;
        let mut state = self.state.lock().unwrap();
        let Some(pos) = state.stashes.iter().rposition(|l| l == label) else {
            return Ok(false);
        };
        state.stashes.remove(pos);
        state.dirty = true;
        Ok(true)
    }
}
