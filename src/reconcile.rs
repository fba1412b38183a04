//! Rebuild the branch catalog from what the repositories actually contain.
//!
//! Used at startup when nothing was persisted, or on demand when persisted
//! state cannot be trusted. Scanning never mutates a repository.

use std::collections::{BTreeMap, BTreeSet};

use futures_util::future::join_all;
use tracing::{debug, info, instrument, warn};

use crate::catalog::BranchCatalog;
use crate::error::BranchError;
use crate::naming::{base_of, infer_base, matches_base_pattern, matches_dev_pattern};
use crate::repos::{RepoRole, RepositorySet};

/// Head of one repository as read during reconciliation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoHead {
    pub repo: String,
    pub head: String,
}

/// Outcome of a full catalog rebuild
#[derive(Debug)]
pub struct ReconcileReport {
    pub bases: Vec<String>,
    pub dev_branches: BTreeMap<String, BTreeSet<String>>,
    /// Active-branch recommendation; `Ok(None)` when no head could be read
    pub active: Result<Option<String>, BranchError>,
}

pub struct StateReconciler<'a> {
    repos: &'a RepositorySet,
}

impl<'a> StateReconciler<'a> {
    pub fn new(repos: &'a RepositorySet) -> Self {
        Self { repos }
    }

    /// Base branches present in the primary repository
    #[instrument(skip_all)]
    pub async fn scan_base_branches(&self) -> Result<BTreeSet<String>, BranchError> {
        let primary = self.repos.primary();
        let branches = primary
            .repo
            .local_branches()
            .await
            .map_err(|e| BranchError::Adapter {
                repo: primary.name().to_string(),
                message: format!("{e:#}"),
            })?;

        Ok(branches
            .into_iter()
            .filter(|b| matches_base_pattern(b))
            .collect())
    }

    /// Development branches across every repository, grouped by base.
    ///
    /// A branch present in any single repository counts.
    #[instrument(skip_all)]
    pub async fn scan_dev_branches(
        &self,
    ) -> Result<BTreeMap<String, BTreeSet<String>>, BranchError> {
        let listings = join_all(self.repos.all().iter().map(|tracked| async move {
            (tracked, tracked.repo.local_branches().await)
        }))
        .await;

        let mut grouped: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (tracked, listing) in listings {
            let branches = match listing {
                Ok(branches) => branches,
                Err(e) if tracked.role == RepoRole::Primary => {
                    return Err(BranchError::Adapter {
                        repo: tracked.name().to_string(),
                        message: format!("{e:#}"),
                    });
                }
                Err(e) => {
                    warn!(repo = %tracked.name(), "Skipping repository in branch scan: {:#}", e);
                    continue;
                }
            };

            for branch in branches.into_iter().filter(|b| matches_dev_pattern(b)) {
                grouped.entry(infer_base(&branch)).or_default().insert(branch);
            }
        }
        Ok(grouped)
    }

    /// Current head of every repository that could be read
    pub async fn read_heads(&self) -> Vec<RepoHead> {
        let heads = join_all(self.repos.all().iter().map(|tracked| async move {
            (tracked.name().to_string(), tracked.repo.current_head().await)
        }))
        .await;

        heads
            .into_iter()
            .filter_map(|(repo, head)| match head {
                Ok(head) if head != "HEAD" => Some(RepoHead { repo, head }),
                Ok(_) => {
                    warn!(%repo, "Detached HEAD ignored when resolving active branch");
                    None
                }
                Err(e) => {
                    warn!(%repo, "Could not read head: {:#}", e);
                    None
                }
            })
            .collect()
    }

    /// Recommend an active branch from the repositories' heads. Never mutates.
    #[instrument(skip_all)]
    pub async fn resolve_active_branch(&self) -> Result<Option<String>, BranchError> {
        let heads: Vec<String> = self.read_heads().await.into_iter().map(|h| h.head).collect();
        debug!(?heads, "Resolving active branch");
        resolve_from_heads(&heads)
    }

    /// Replace the catalog's branches with what the repositories contain, and
    /// adopt the resolved active branch when there is one.
    #[instrument(skip_all)]
    pub async fn rebuild_catalog(
        &self,
        catalog: &mut BranchCatalog,
        sequence: impl Fn(&str) -> usize,
    ) -> Result<ReconcileReport, BranchError> {
        let (bases, dev_branches, active) = tokio::join!(
            self.scan_base_branches(),
            self.scan_dev_branches(),
            self.resolve_active_branch()
        );
        let mut bases = bases?;
        let dev_branches = dev_branches?;

        // A development branch implies its base even if only an auxiliary has it
        bases.extend(
            dev_branches
                .keys()
                .filter(|b| matches_base_pattern(b))
                .cloned(),
        );

        let mut ordered: Vec<(String, usize)> =
            bases.iter().map(|b| (b.clone(), sequence(b))).collect();
        ordered.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

        catalog.rebuild(ordered.clone(), dev_branches.clone())?;
        if let Ok(Some(active)) = &active {
            catalog.set_active(Some(active))?;
        }

        info!(
            bases = ordered.len(),
            dev = dev_branches.values().map(BTreeSet::len).sum::<usize>(),
            "Catalog reconciled with repositories"
        );

        Ok(ReconcileReport {
            bases: ordered.into_iter().map(|(b, _)| b).collect(),
            dev_branches,
            active,
        })
    }
}

/// Pick the active branch out of the repositories' head names.
///
/// One distinct name wins outright. Otherwise a derived name is accepted
/// when every other head is either that name or its base. Two heads on
/// unrelated bases are inconsistent; anything else is ambiguous.
pub fn resolve_from_heads(heads: &[String]) -> Result<Option<String>, BranchError> {
    let distinct: BTreeSet<&str> = heads.iter().map(String::as_str).collect();

    match distinct.len() {
        0 => return Ok(None),
        1 => return Ok(distinct.first().map(|h| (*h).to_string())),
        _ => {}
    }

    for candidate in &distinct {
        let base = infer_base(candidate);
        if base.is_empty() {
            continue;
        }
        if distinct.iter().all(|h| h == candidate || *h == base) {
            return Ok(Some((*candidate).to_string()));
        }
    }

    let names: Vec<String> = distinct.iter().map(|h| (*h).to_string()).collect();
    if distinct.len() == 2 {
        let bases: BTreeSet<String> = distinct.iter().map(|h| base_of(h)).collect();
        if bases.len() > 1 {
            return Err(BranchError::InconsistentState { heads: names });
        }
    }
    Err(BranchError::AmbiguousState { heads: names })
}
