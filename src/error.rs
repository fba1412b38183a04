//! Error taxonomy for branch operations.

use thiserror::Error;

use crate::ops::outcome::RepoFailure;

/// Errors surfaced by the catalog, reconciler, guard and orchestration engine.
///
/// Per-repository failures are not variants here: they are collected as
/// [`RepoFailure`] values and only escalate (as [`BranchError::TotalFailure`])
/// when no participating repository succeeded.
#[derive(Error, Debug)]
pub enum BranchError {
    /// Caller-supplied identifier violates an invariant. Nothing was touched.
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("uncommitted changes in {}; commit or stash them, or enable auto-stash", .repos.join(", "))]
    DirtyWorkingTree { repos: Vec<String> },

    #[error("{operation} failed in every repository: {}", format_failures(.failures))]
    TotalFailure {
        operation: String,
        failures: Vec<RepoFailure>,
    },

    #[error("repositories disagree on the active branch ({}); pick one explicitly", .heads.join(", "))]
    AmbiguousState { heads: Vec<String> },

    #[error("repositories are on unrelated base branches ({})", .heads.join(", "))]
    InconsistentState { heads: Vec<String> },

    #[error("branch '{name}' already exists under '{base}'")]
    AlreadyExists { base: String, name: String },

    #[error("branch '{name}' not found under '{base}'")]
    NotFound { base: String, name: String },

    /// The server guard was declined or could not stop the running server.
    #[error("a running server is attached to the repositories: {0}")]
    ServerRunning(String),

    #[error("failed to persist branch state: {0:#}")]
    Storage(anyhow::Error),

    #[error("repository '{repo}' could not be inspected: {message}")]
    Adapter { repo: String, message: String },
}

impl BranchError {
    pub fn validation(message: impl Into<String>) -> Self {
        BranchError::Validation(message.into())
    }

    /// Whether the error was raised before any repository was touched.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            BranchError::Validation(_)
                | BranchError::AlreadyExists { .. }
                | BranchError::DirtyWorkingTree { .. }
                | BranchError::ServerRunning(_)
        )
    }
}

fn format_failures(failures: &[RepoFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_failure_names_operation_and_repos() {
        let err = BranchError::TotalFailure {
            operation: "checkout".to_string(),
            failures: vec![
                RepoFailure::new("odoo", "pathspec 'x' did not match"),
                RepoFailure::new("enterprise", "not a git repository"),
            ],
        };
        let text = err.to_string();
        assert!(text.starts_with("checkout failed in every repository"));
        assert!(text.contains("odoo: pathspec 'x' did not match"));
        assert!(text.contains("enterprise: not a git repository"));
    }

    #[test]
    fn test_dirty_lists_repos() {
        let err = BranchError::DirtyWorkingTree {
            repos: vec!["odoo".into(), "design-themes".into()],
        };
        assert!(err.to_string().contains("odoo, design-themes"));
        assert!(err.is_precondition());
    }

    #[test]
    fn test_storage_is_not_precondition() {
        let err = BranchError::Storage(anyhow::anyhow!("disk full"));
        assert!(!err.is_precondition());
        assert!(err.to_string().contains("disk full"));
    }
}
