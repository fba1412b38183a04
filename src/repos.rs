//! The tracked repository set.
//!
//! Fixed at startup: one primary repository and any number of auxiliaries,
//! at most one of which is trunk-only.

use std::sync::Arc;

use crate::config::Config;
use crate::git::{GitRepository, Repository};

/// Role a repository plays in branch operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepoRole {
    Primary,
    Auxiliary,
    /// Only participates when the operation's base is the trunk base
    TrunkOnly,
}

#[derive(Clone)]
pub struct TrackedRepo {
    pub repo: Arc<dyn Repository>,
    pub role: RepoRole,
    pub default_remote: Option<String>,
}

impl TrackedRepo {
    pub fn new(repo: Arc<dyn Repository>, role: RepoRole) -> Self {
        Self {
            repo,
            role,
            default_remote: None,
        }
    }

    pub fn name(&self) -> &str {
        self.repo.name()
    }

    pub fn is_trunk_only(&self) -> bool {
        self.role == RepoRole::TrunkOnly
    }
}

pub struct RepositorySet {
    repos: Vec<TrackedRepo>,
    trunk: String,
}

impl RepositorySet {
    /// Build a set from an explicit primary and auxiliaries
    pub fn new(primary: TrackedRepo, auxiliaries: Vec<TrackedRepo>, trunk: impl Into<String>) -> Self {
        let mut repos = Vec::with_capacity(auxiliaries.len() + 1);
        repos.push(TrackedRepo {
            role: RepoRole::Primary,
            ..primary
        });
        repos.extend(auxiliaries);
        Self {
            repos,
            trunk: trunk.into(),
        }
    }

    /// Git-backed set described by the configuration
    pub fn from_config(config: &Config) -> Self {
        let tracked = |repo: &crate::config::RepoConfig, role: RepoRole| TrackedRepo {
            repo: Arc::new(GitRepository::new(&repo.name, Config::repo_path(repo))),
            role,
            default_remote: repo.default_remote.clone(),
        };

        let primary = tracked(&config.repositories.primary, RepoRole::Primary);
        let auxiliaries = config
            .repositories
            .auxiliaries
            .iter()
            .map(|r| {
                let role = if r.trunk_only {
                    RepoRole::TrunkOnly
                } else {
                    RepoRole::Auxiliary
                };
                tracked(r, role)
            })
            .collect();

        Self::new(primary, auxiliaries, config.branches.trunk.clone())
    }

    pub fn trunk(&self) -> &str {
        &self.trunk
    }

    pub fn primary(&self) -> &TrackedRepo {
        &self.repos[0]
    }

    /// Every tracked repository, primary first
    pub fn all(&self) -> &[TrackedRepo] {
        &self.repos
    }

    /// Repositories taking part in an operation on `base`
    pub fn for_base(&self, base: &str) -> Vec<&TrackedRepo> {
        self.repos
            .iter()
            .filter(|r| !r.is_trunk_only() || base == self.trunk)
            .collect()
    }

    /// Trunk-only repositories left out of an operation on `base`
    pub fn excluded_for_base(&self, base: &str) -> Vec<&TrackedRepo> {
        self.repos
            .iter()
            .filter(|r| r.is_trunk_only() && base != self.trunk)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::MockRepository;

    fn set() -> RepositorySet {
        RepositorySet::new(
            TrackedRepo::new(Arc::new(MockRepository::new("odoo")), RepoRole::Auxiliary),
            vec![
                TrackedRepo::new(Arc::new(MockRepository::new("enterprise")), RepoRole::Auxiliary),
                TrackedRepo::new(Arc::new(MockRepository::new("upgrade")), RepoRole::TrunkOnly),
            ],
            "master",
        )
    }

    fn names(repos: &[&TrackedRepo]) -> Vec<String> {
        repos.iter().map(|r| r.name().to_string()).collect()
    }

    #[test]
    fn test_primary_role_is_forced() {
        let set = set();
        assert_eq!(set.primary().role, RepoRole::Primary);
        assert_eq!(set.primary().name(), "odoo");
    }

    #[test]
    fn test_trunk_only_follows_trunk() {
        let set = set();
        assert_eq!(names(&set.for_base("master")), ["odoo", "enterprise", "upgrade"]);
        assert_eq!(names(&set.for_base("17.0")), ["odoo", "enterprise"]);
        assert_eq!(names(&set.excluded_for_base("17.0")), ["upgrade"]);
        assert!(set.excluded_for_base("master").is_empty());
    }
}
