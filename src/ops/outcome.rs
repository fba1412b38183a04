//! Per-repository outcomes and their aggregation.
//!
//! Every fan-out operation produces one [`RepoOutcome`] per participating
//! repository. [`OperationReport::from_outcomes`] applies the success
//! policy: one success is enough, zero successes is a total failure.

use std::fmt;

use crate::error::BranchError;

/// What a repository ended up doing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoSuccess {
    pub repo: String,
    /// Branch checked out in the repository once the step finished, if it moved.
    pub landed_on: Option<String>,
    /// Noteworthy but non-fatal detail (fallbacks, no-ops).
    pub note: Option<String>,
}

impl RepoSuccess {
    pub fn landed(repo: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            repo: repo.into(),
            landed_on: Some(branch.into()),
            note: None,
        }
    }

    pub fn unchanged(repo: impl Into<String>, note: impl Into<String>) -> Self {
        Self {
            repo: repo.into(),
            landed_on: None,
            note: Some(note.into()),
        }
    }

    /// Attach a note, appending to any note already present
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        let note = note.into();
        self.note = Some(match self.note.take() {
            Some(existing) => format!("{existing}; {note}"),
            None => note,
        });
        self
    }
}

/// A single repository's step failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoFailure {
    pub repo: String,
    pub message: String,
}

impl RepoFailure {
    pub fn new(repo: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            repo: repo.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for RepoFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.repo, self.message)
    }
}

pub type RepoOutcome = Result<RepoSuccess, RepoFailure>;

/// Split outcomes into successes and failures, preserving order.
pub fn partition(outcomes: Vec<RepoOutcome>) -> (Vec<RepoSuccess>, Vec<RepoFailure>) {
    let mut successes = Vec::new();
    let mut failures = Vec::new();
    for outcome in outcomes {
        match outcome {
            Ok(s) => successes.push(s),
            Err(f) => failures.push(f),
        }
    }
    (successes, failures)
}

/// Aggregated result of one logical operation across the repository set.
#[derive(Debug, Clone)]
pub struct OperationReport {
    pub operation: String,
    pub successes: Vec<RepoSuccess>,
    pub failures: Vec<RepoFailure>,
}

impl OperationReport {
    /// Apply the success policy to a completed fan-out.
    pub fn from_outcomes(
        operation: impl Into<String>,
        outcomes: Vec<RepoOutcome>,
    ) -> Result<Self, BranchError> {
        let operation = operation.into();
        let (successes, failures) = partition(outcomes);

        if successes.is_empty() {
            return Err(BranchError::TotalFailure {
                operation,
                failures,
            });
        }

        Ok(Self {
            operation,
            successes,
            failures,
        })
    }

    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }

    /// Whether any repository actually has `branch` checked out afterwards.
    pub fn landed_anywhere(&self, branch: &str) -> bool {
        self.successes
            .iter()
            .any(|s| s.landed_on.as_deref() == Some(branch))
    }

    /// Record outcomes of work done outside the dispatched set.
    ///
    /// They are reported but play no part in the success policy.
    pub fn extend(&mut self, outcomes: Vec<RepoOutcome>) {
        let (successes, failures) = partition(outcomes);
        self.successes.extend(successes);
        self.failures.extend(failures);
    }

    /// Non-fatal warning text for a partial success.
    pub fn warning(&self) -> Option<String> {
        if self.failures.is_empty() {
            return None;
        }
        let details = self
            .failures
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n  ");
        Some(format!(
            "{} failed in {} of {} repositories:\n  {}",
            self.operation,
            self.failures.len(),
            self.failures.len() + self.successes.len(),
            details
        ))
    }
}
