//! Multi-repository branch operations.
//!
//! [`BranchOrchestrator`] runs one logical operation (fetch, create,
//! checkout, delete, rebase, reset) across the repository set. Every
//! operation follows the same shape:
//!
//! 1. validate identifiers, touching nothing
//! 2. find dirty repositories and abort or plan a stash, per policy
//! 3. stop a running server through the guard
//! 4. run the per-repository step concurrently and wait for all of them
//! 5. aggregate outcomes: no success at all is fatal, anything else is
//!    a (possibly partial) success
//! 6. update the catalog, then emit events
//!
//! Operations take `&mut self`, so a caller cannot start a second one while
//! the first is in flight.

pub mod outcome;
pub mod remote;

use futures_util::future::join_all;
use tracing::{debug, info, instrument, warn};

use crate::catalog::BranchCatalog;
use crate::config::{Config, DirtyPolicy, OperationsConfig};
use crate::error::BranchError;
use crate::events::{BranchEvent, EventBus};
use crate::guard::{GuardOutcome, RunningServer, ServerGuard};
use crate::naming::{base_of, infer_base, is_base_branch, matches_base_pattern, matches_dev_pattern};
use crate::reconcile::{ReconcileReport, StateReconciler};
use crate::repos::{RepositorySet, TrackedRepo};

pub use outcome::{OperationReport, RepoFailure, RepoOutcome, RepoSuccess};
pub use remote::{remote_owner, resolve_remote};

/// Stash message prefix; the full label is `branchctl:<branch>`
const STASH_PREFIX: &str = "branchctl";

/// Behaviour switches for branch operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationSettings {
    pub dirty_policy: DirtyPolicy,
    pub pull_on_create: bool,
    pub confirm_server_stop: bool,
}

impl Default for OperationSettings {
    fn default() -> Self {
        Self::from(&OperationsConfig::default())
    }
}

impl From<&OperationsConfig> for OperationSettings {
    fn from(config: &OperationsConfig) -> Self {
        Self {
            dirty_policy: config.dirty_policy,
            pull_on_create: config.pull_on_create,
            confirm_server_stop: config.confirm_server_stop,
        }
    }
}

pub struct BranchOrchestrator {
    repos: RepositorySet,
    catalog: BranchCatalog,
    guard: ServerGuard,
    events: EventBus,
    settings: OperationSettings,
    base_sequence: Vec<String>,
}

/// What preflight found before dispatch
struct Preflight {
    dirty: Vec<String>,
    stopped: Option<RunningServer>,
}

/// Per-operation context shared by every repository step
#[derive(Clone, Copy)]
struct StepContext<'a> {
    dirty: &'a [String],
    auto_stash: bool,
}

impl StepContext<'_> {
    fn is_dirty(&self, repo: &str) -> bool {
        self.dirty.iter().any(|d| d == repo)
    }
}

impl BranchOrchestrator {
    pub fn new(
        repos: RepositorySet,
        catalog: BranchCatalog,
        guard: ServerGuard,
        settings: OperationSettings,
    ) -> Self {
        Self {
            repos,
            catalog,
            guard,
            events: EventBus::detached(),
            settings,
            base_sequence: Vec::new(),
        }
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    /// Display order used when a base branch is first recorded
    pub fn with_base_sequence(mut self, sequence: Vec<String>) -> Self {
        self.base_sequence = sequence;
        self
    }

    /// Build the engine from configuration and restore its catalog.
    ///
    /// An empty catalog is seeded from the repositories themselves.
    pub async fn init(config: &Config, guard: ServerGuard, events: EventBus) -> Result<Self, BranchError> {
        let catalog = BranchCatalog::open(&config.state_path())?;
        let mut orchestrator = Self::new(
            RepositorySet::from_config(config),
            catalog,
            guard,
            OperationSettings::from(&config.operations),
        )
        .with_events(events)
        .with_base_sequence(config.branches.base_sequence.clone());

        orchestrator.bootstrap().await?;
        Ok(orchestrator)
    }

    /// Reconcile when nothing has been recorded yet
    pub async fn bootstrap(&mut self) -> Result<Option<ReconcileReport>, BranchError> {
        if !self.catalog.is_empty() {
            return Ok(None);
        }
        info!("Branch catalog is empty, scanning repositories");
        match self.reconcile().await {
            Ok(report) => Ok(Some(report)),
            Err(e @ BranchError::Storage(_)) => Err(e),
            Err(e) => {
                warn!("Could not seed branch catalog: {}", e);
                Ok(None)
            }
        }
    }

    /// Flush the catalog and release the engine
    pub fn teardown(mut self) -> Result<(), BranchError> {
        self.catalog.flush()
    }

    pub fn active_branch(&self) -> Option<&str> {
        self.catalog.get_active()
    }

    pub fn base_branches(&self) -> Vec<String> {
        self.catalog.list_bases()
    }

    pub fn dev_branches(&self, base: &str) -> std::collections::BTreeSet<String> {
        self.catalog.list_dev(base)
    }

    pub fn dev_branch_exists(&self, base: &str, name: &str) -> bool {
        self.catalog.exists(base, name)
    }

    pub fn catalog(&self) -> &BranchCatalog {
        &self.catalog
    }

    pub fn repos(&self) -> &RepositorySet {
        &self.repos
    }

    /// Register a base branch by hand
    pub fn add_base(&mut self, name: &str, strict: bool) -> Result<bool, BranchError> {
        if !matches_base_pattern(name) {
            return Err(BranchError::validation(format!(
                "'{name}' is not a base branch name (expected NN.0, master or saas-NN.N)"
            )));
        }
        let added = self
            .catalog
            .add_base(name, sequence_in(&self.base_sequence, name), strict)?;
        if added {
            self.events.emit(BranchEvent::Refresh);
        }
        Ok(added)
    }

    /// Recommend an active branch from the repositories' heads
    pub async fn resolve_active_branch(&self) -> Result<Option<String>, BranchError> {
        StateReconciler::new(&self.repos).resolve_active_branch().await
    }

    /// Rebuild the catalog from the repositories
    pub async fn reconcile(&mut self) -> Result<ReconcileReport, BranchError> {
        let before = self.catalog.get_active().map(ToString::to_string);
        let sequence = &self.base_sequence;
        let report = StateReconciler::new(&self.repos)
            .rebuild_catalog(&mut self.catalog, |b| sequence_in(sequence, b))
            .await?;

        if let Err(e) = &report.active {
            warn!("Active branch left unchanged: {}", e);
        }
        self.emit_changes(before.as_deref());
        Ok(report)
    }

    /// Fetch `branch` everywhere it is published, falling back to `base`
    /// in repositories that do not carry it.
    #[instrument(skip(self))]
    pub async fn fetch(
        &mut self,
        base: &str,
        branch: &str,
        fork: Option<&str>,
    ) -> Result<OperationReport, BranchError> {
        validate_derived(base, branch)?;
        let before = self.catalog.get_active().map(ToString::to_string);

        let participants = self.repos.for_base(base);
        let pre = self.preflight(&participants).await?;
        let ctx = self.step_context(&pre);

        let outcomes =
            join_all(participants.iter().map(|r| fetch_in_repo(r, base, branch, fork, ctx))).await;
        let report = OperationReport::from_outcomes("fetch", outcomes)?;

        self.catalog
            .add_base(base, sequence_in(&self.base_sequence, base), false)?;
        if report.landed_anywhere(branch) {
            if !self.catalog.exists(base, branch) {
                self.catalog.add_dev(base, branch)?;
            }
            self.catalog.set_active(Some(branch))?;
        } else {
            warn!(%branch, "No repository carries the branch, stayed on {}", base);
            self.catalog.set_active(Some(base))?;
        }
        self.catalog.record_branch(branch)?;

        self.finish(&report, pre.stopped, before.as_deref())?;
        Ok(report)
    }

    /// Create `branch` from `base` in every participating repository
    #[instrument(skip(self))]
    pub async fn create(&mut self, base: &str, branch: &str) -> Result<OperationReport, BranchError> {
        validate_derived(base, branch)?;
        if !self.catalog.has_base(base) {
            return Err(BranchError::validation(format!(
                "base branch '{base}' is not known yet; fetch or add it first"
            )));
        }
        if self.catalog.exists(base, branch) {
            return Err(BranchError::AlreadyExists {
                base: base.to_string(),
                name: branch.to_string(),
            });
        }
        let before = self.catalog.get_active().map(ToString::to_string);

        let participants = self.repos.for_base(base);
        // Trunk-only repositories do not branch off other bases, they stay on trunk
        let aligned = self.repos.excluded_for_base(base);
        let touched: Vec<&TrackedRepo> = participants.iter().chain(&aligned).copied().collect();

        let pre = self.preflight(&touched).await?;
        let ctx = self.step_context(&pre);
        let trunk = self.repos.trunk();
        let pull = self.settings.pull_on_create;

        let (outcomes, aligned_outcomes) = tokio::join!(
            join_all(participants.iter().map(|r| create_in_repo(r, base, branch, pull, ctx))),
            join_all(aligned.iter().map(|r| align_to_trunk(r, trunk, ctx))),
        );
        let mut report = OperationReport::from_outcomes("create", outcomes)?;
        report.extend(aligned_outcomes);

        self.catalog.add_dev(base, branch)?;
        self.catalog.set_active(Some(branch))?;
        self.catalog.record_branch(branch)?;

        self.finish(&report, pre.stopped, before.as_deref())?;
        Ok(report)
    }

    /// Fetch `branch` if any repository's remote has it, otherwise create it
    #[instrument(skip(self))]
    pub async fn fetch_or_create(
        &mut self,
        base: &str,
        branch: &str,
        fork: Option<&str>,
    ) -> Result<OperationReport, BranchError> {
        validate_derived(base, branch)?;

        let participants = self.repos.for_base(base);
        let probes = join_all(participants.iter().map(|r| probe_remote(r, branch, fork))).await;

        if probes.into_iter().any(|published| published) {
            debug!(%branch, "Branch is published, fetching");
            self.fetch(base, branch, fork).await
        } else {
            debug!(%branch, "Branch is not published anywhere, creating");
            self.create(base, branch).await
        }
    }

    /// Check out `branch` everywhere, falling back to its base
    #[instrument(skip(self))]
    pub async fn checkout(&mut self, branch: &str) -> Result<OperationReport, BranchError> {
        validate_identifier("branch", branch)?;
        let before = self.catalog.get_active().map(ToString::to_string);

        let participants: Vec<&TrackedRepo> = self.repos.all().iter().collect();
        let pre = self.preflight(&participants).await?;
        let ctx = self.step_context(&pre);
        let trunk = self.repos.trunk();

        let outcomes =
            join_all(participants.iter().map(|r| checkout_in_repo(r, branch, trunk, ctx))).await;
        let report = OperationReport::from_outcomes("checkout", outcomes)?;

        let base = base_of(branch);
        if report.landed_anywhere(branch) {
            if matches_dev_pattern(branch) {
                self.catalog
                    .add_base(&base, sequence_in(&self.base_sequence, &base), false)?;
                if !self.catalog.exists(&base, branch) {
                    self.catalog.add_dev(&base, branch)?;
                }
            }
            self.catalog.set_active(Some(branch))?;
        } else {
            self.catalog.set_active(Some(&base))?;
        }
        self.catalog.record_branch(branch)?;

        self.finish(&report, pre.stopped, before.as_deref())?;
        Ok(report)
    }

    /// Delete `branch` wherever it exists, moving off it first if needed
    #[instrument(skip(self))]
    pub async fn delete(&mut self, base: &str, branch: &str) -> Result<OperationReport, BranchError> {
        if base == branch {
            return Err(BranchError::validation(format!(
                "refusing to delete base branch '{base}'"
            )));
        }
        validate_derived(base, branch)?;
        let before = self.catalog.get_active().map(ToString::to_string);

        let participants = self.repos.for_base(base);
        let pre = self.preflight(&participants).await?;
        let ctx = self.step_context(&pre);

        let outcomes =
            join_all(participants.iter().map(|r| delete_in_repo(r, base, branch, ctx))).await;
        let report = OperationReport::from_outcomes("delete", outcomes)?;

        if self.catalog.exists(base, branch) {
            self.catalog.remove_dev(base, branch)?;
        }
        if self.catalog.get_active() == Some(branch) {
            self.catalog.set_active(Some(base))?;
        }

        self.finish(&report, pre.stopped, before.as_deref())?;
        Ok(report)
    }

    /// Rebase whatever each repository has checked out onto its base
    #[instrument(skip(self))]
    pub async fn rebase(&mut self) -> Result<OperationReport, BranchError> {
        let before = self.catalog.get_active().map(ToString::to_string);

        let participants: Vec<&TrackedRepo> = self.repos.all().iter().collect();
        let pre = self.preflight(&participants).await?;
        let ctx = self.step_context(&pre);
        let trunk = self.repos.trunk();

        let outcomes = join_all(participants.iter().map(|r| rebase_in_repo(r, trunk, ctx))).await;
        let report = OperationReport::from_outcomes("rebase", outcomes)?;

        self.finish(&report, pre.stopped, before.as_deref())?;
        Ok(report)
    }

    /// Hard-reset `branch` (default: the active branch) to its remote in the
    /// repositories that have it checked out
    #[instrument(skip(self))]
    pub async fn reset(&mut self, branch: Option<&str>) -> Result<OperationReport, BranchError> {
        let branch = match branch {
            Some(b) => b.to_string(),
            None => self
                .catalog
                .get_active()
                .map(ToString::to_string)
                .ok_or_else(|| BranchError::validation("no active branch to reset"))?,
        };
        validate_identifier("branch", &branch)?;
        let before = self.catalog.get_active().map(ToString::to_string);

        let participants: Vec<&TrackedRepo> = self.repos.all().iter().collect();
        let pre = self.preflight(&participants).await?;
        let ctx = self.step_context(&pre);
        let trunk = self.repos.trunk();

        let outcomes =
            join_all(participants.iter().map(|r| reset_in_repo(r, &branch, trunk, ctx))).await;
        let report = OperationReport::from_outcomes("reset", outcomes)?;

        self.finish(&report, pre.stopped, before.as_deref())?;
        Ok(report)
    }

    /// Dirty-tree check, then the server guard. Nothing is mutated when this fails.
    async fn preflight(&self, repos: &[&TrackedRepo]) -> Result<Preflight, BranchError> {
        let states = join_all(repos.iter().map(|r| async move {
            (r.name().to_string(), r.repo.is_dirty().await)
        }))
        .await;

        let dirty: Vec<String> = states
            .into_iter()
            .filter_map(|(name, state)| match state {
                Ok(true) => Some(name),
                Ok(false) => None,
                Err(e) => {
                    warn!(repo = %name, "Could not read working tree status: {:#}", e);
                    None
                }
            })
            .collect();

        if !dirty.is_empty() {
            if self.settings.dirty_policy == DirtyPolicy::Abort {
                return Err(BranchError::DirtyWorkingTree { repos: dirty });
            }
            info!(repos = ?dirty, "Uncommitted changes will be stashed");
        }

        let stopped = match self
            .guard
            .ensure_no_running_server(self.settings.confirm_server_stop)
            .await?
        {
            GuardOutcome::Clear => None,
            GuardOutcome::Stopped(server) => Some(server),
        };

        Ok(Preflight { dirty, stopped })
    }

    fn step_context<'a>(&self, pre: &'a Preflight) -> StepContext<'a> {
        StepContext {
            dirty: &pre.dirty,
            auto_stash: self.settings.dirty_policy == DirtyPolicy::Stash,
        }
    }

    fn finish(
        &mut self,
        report: &OperationReport,
        stopped: Option<RunningServer>,
        active_before: Option<&str>,
    ) -> Result<(), BranchError> {
        if let Some(command) = stopped.and_then(|s| s.command) {
            self.catalog.record_server_command(&command)?;
        }

        match report.warning() {
            Some(warning) => warn!("{}", warning),
            None => info!(operation = %report.operation, repos = report.successes.len(), "Operation succeeded"),
        }

        self.events.emit(BranchEvent::OperationFinished {
            operation: report.operation.clone(),
            partial: report.is_partial(),
        });
        self.emit_changes(active_before);
        Ok(())
    }

    fn emit_changes(&self, active_before: Option<&str>) {
        let active = self.catalog.get_active();
        if active != active_before {
            self.events
                .emit(BranchEvent::ActiveChanged(active.map(ToString::to_string)));
        }
        self.events.emit(BranchEvent::Refresh);
    }
}

fn sequence_in(sequence: &[String], base: &str) -> usize {
    sequence.iter().position(|b| b == base).unwrap_or(usize::MAX)
}

fn validate_identifier(kind: &str, name: &str) -> Result<(), BranchError> {
    if name.trim().is_empty() {
        return Err(BranchError::validation(format!("{kind} name is empty")));
    }
    if name.chars().any(char::is_whitespace) {
        return Err(BranchError::validation(format!(
            "{kind} name '{name}' contains whitespace"
        )));
    }
    Ok(())
}

/// `branch` must be a development branch deriving from `base`
fn validate_derived(base: &str, branch: &str) -> Result<(), BranchError> {
    validate_identifier("base branch", base)?;
    validate_identifier("branch", branch)?;
    if !matches_base_pattern(base) {
        return Err(BranchError::validation(format!(
            "'{base}' is not a base branch name (expected NN.0, master or saas-NN.N)"
        )));
    }
    if is_base_branch(branch) {
        return Err(BranchError::validation(format!(
            "'{branch}' is a base branch, not a development branch"
        )));
    }
    let inferred = infer_base(branch);
    if inferred != base {
        return Err(BranchError::validation(format!(
            "'{branch}' derives from '{inferred}', not '{base}'"
        )));
    }
    Ok(())
}

fn stash_label(branch: &str) -> String {
    format!("{STASH_PREFIX}:{branch}")
}

fn failure(tracked: &TrackedRepo, context: &str, err: &anyhow::Error) -> RepoFailure {
    RepoFailure::new(tracked.name(), format!("{context}: {err:#}"))
}

fn noted(success: RepoSuccess, note: Option<String>) -> RepoSuccess {
    match note {
        Some(note) => success.with_note(note),
        None => success,
    }
}

/// Stash local changes under the current head's label when the repository is dirty.
///
/// Returns the head the changes were stashed from.
async fn stash_if_dirty(tracked: &TrackedRepo, ctx: StepContext<'_>) -> Result<Option<String>, RepoFailure> {
    if !ctx.auto_stash || !ctx.is_dirty(tracked.name()) {
        return Ok(None);
    }
    let head = tracked
        .repo
        .current_head()
        .await
        .map_err(|e| failure(tracked, "could not read current branch", &e))?;

    match tracked.repo.stash_push(&stash_label(&head)).await {
        Ok(true) => {
            debug!(repo = %tracked.name(), %head, "Stashed local changes");
            Ok(Some(head))
        }
        Ok(false) => Ok(None),
        Err(e) => Err(failure(tracked, "could not stash local changes", &e)),
    }
}

/// Re-apply changes stashed earlier for `branch`, if any
async fn restore_stash(tracked: &TrackedRepo, branch: &str, ctx: StepContext<'_>) -> Option<String> {
    if !ctx.auto_stash {
        return None;
    }
    match tracked.repo.stash_pop(&stash_label(branch)).await {
        Ok(true) => Some(format!("restored changes stashed on {branch}")),
        Ok(false) => None,
        Err(e) => {
            warn!(repo = %tracked.name(), %branch, "Could not re-apply stash: {:#}", e);
            Some(format!("changes stashed on {branch} left in the stash: {e:#}"))
        }
    }
}

/// Undo a step that failed after stashing: return to the head the changes
/// came from and re-apply them there.
async fn give_back(
    tracked: &TrackedRepo,
    stashed_from: Option<String>,
    ctx: StepContext<'_>,
    mut failed: RepoFailure,
) -> RepoFailure {
    let Some(head) = stashed_from else {
        return failed;
    };
    if let Err(e) = tracked.repo.checkout(&head).await {
        warn!(repo = %tracked.name(), %head, "Could not return to original branch: {:#}", e);
        failed.message = format!(
            "{}; changes stashed on {head} left in the stash as {}",
            failed.message,
            stash_label(&head)
        );
        return failed;
    }
    if let Some(note) = restore_stash(tracked, &head, ctx).await {
        failed.message = format!("{}; {note}", failed.message);
    }
    failed
}

async fn remote_for(tracked: &TrackedRepo, fork: Option<&str>) -> String {
    let remotes = match tracked.repo.remotes().await {
        Ok(remotes) => remotes,
        Err(e) => {
            warn!(repo = %tracked.name(), "Could not list remotes: {:#}", e);
            Vec::new()
        }
    };
    resolve_remote(&remotes, fork, tracked.default_remote.as_deref())
}

async fn probe_remote(tracked: &TrackedRepo, branch: &str, fork: Option<&str>) -> bool {
    let remote = remote_for(tracked, fork).await;
    match tracked.repo.remote_branch_exists(&remote, branch).await {
        Ok(found) => found,
        Err(e) => {
            warn!(repo = %tracked.name(), %remote, "Remote probe failed: {:#}", e);
            false
        }
    }
}

async fn fetch_in_repo(
    tracked: &TrackedRepo,
    base: &str,
    branch: &str,
    fork: Option<&str>,
    ctx: StepContext<'_>,
) -> RepoOutcome {
    let stashed_from = stash_if_dirty(tracked, ctx).await?;
    let remote = remote_for(tracked, fork).await;

    let fetched = match tracked.repo.fetch(&remote, branch).await {
        Ok(()) => tracked.repo.checkout(branch).await,
        Err(e) => Err(e),
    };

    let success = match fetched {
        Ok(()) => RepoSuccess::landed(tracked.name(), branch),
        Err(e) => {
            debug!(repo = %tracked.name(), %branch, "Fetch failed, falling back to base: {:#}", e);
            if let Err(fallback) = tracked.repo.checkout(base).await {
                let failed = RepoFailure::new(
                    tracked.name(),
                    format!("fetch {remote}/{branch} failed: {e:#}; checkout {base} failed: {fallback:#}"),
                );
                return Err(give_back(tracked, stashed_from, ctx, failed).await);
            }
            RepoSuccess::landed(tracked.name(), base)
                .with_note(format!("{branch} not available from {remote}, stayed on {base}"))
        }
    };

    let landed = success.landed_on.clone().unwrap_or_default();
    Ok(noted(success, restore_stash(tracked, &landed, ctx).await))
}

async fn create_in_repo(
    tracked: &TrackedRepo,
    base: &str,
    branch: &str,
    pull: bool,
    ctx: StepContext<'_>,
) -> RepoOutcome {
    let stashed_from = stash_if_dirty(tracked, ctx).await?;

    if let Err(e) = tracked.repo.checkout(base).await {
        let failed = failure(tracked, &format!("checkout {base} failed"), &e);
        return Err(give_back(tracked, stashed_from, ctx, failed).await);
    }

    let mut note = None;
    if pull {
        if let Err(e) = tracked.repo.pull().await {
            warn!(repo = %tracked.name(), %base, "Pull before create failed: {:#}", e);
            note = Some(format!("{base} could not be updated before branching"));
        }
    }

    if let Err(e) = tracked.repo.create_branch(branch, true).await {
        let failed = failure(tracked, &format!("create {branch} failed"), &e);
        return Err(give_back(tracked, stashed_from, ctx, failed).await);
    }

    Ok(noted(RepoSuccess::landed(tracked.name(), branch), note))
}

async fn align_to_trunk(tracked: &TrackedRepo, trunk: &str, ctx: StepContext<'_>) -> RepoOutcome {
    let stashed_from = stash_if_dirty(tracked, ctx).await?;
    if let Err(e) = tracked.repo.checkout(trunk).await {
        let failed = failure(tracked, &format!("checkout {trunk} failed"), &e);
        return Err(give_back(tracked, stashed_from, ctx, failed).await);
    }

    let success = RepoSuccess::landed(tracked.name(), trunk).with_note("follows trunk only");
    Ok(noted(success, restore_stash(tracked, trunk, ctx).await))
}

async fn checkout_in_repo(tracked: &TrackedRepo, branch: &str, trunk: &str, ctx: StepContext<'_>) -> RepoOutcome {
    let base = base_of(branch);
    let targets: Vec<&str> = if tracked.is_trunk_only() && base != trunk {
        vec![trunk]
    } else if base == branch {
        vec![branch]
    } else {
        vec![branch, base.as_str()]
    };

    let stashed_from = stash_if_dirty(tracked, ctx).await?;

    let mut errors = Vec::new();
    for target in targets {
        match tracked.repo.checkout(target).await {
            Ok(()) => {
                let success = RepoSuccess::landed(tracked.name(), target);
                let success = if target == branch {
                    success
                } else {
                    success.with_note(format!("{branch} not available, on {target}"))
                };
                return Ok(noted(success, restore_stash(tracked, target, ctx).await));
            }
            Err(e) => errors.push(format!("checkout {target} failed: {e:#}")),
        }
    }

    let failed = RepoFailure::new(tracked.name(), errors.join("; "));
    Err(give_back(tracked, stashed_from, ctx, failed).await)
}

async fn delete_in_repo(tracked: &TrackedRepo, base: &str, branch: &str, ctx: StepContext<'_>) -> RepoOutcome {
    let head = tracked
        .repo
        .current_head()
        .await
        .map_err(|e| failure(tracked, "could not read current branch", &e))?;

    let mut note = None;
    let moved = head == branch;
    if moved {
        let stashed_from = stash_if_dirty(tracked, ctx).await?;
        if let Err(e) = tracked.repo.checkout(base).await {
            let failed = failure(tracked, &format!("checkout {base} failed"), &e);
            return Err(give_back(tracked, stashed_from, ctx, failed).await);
        }
        // The branch is going away, so its changes move onto the base
        note = match stashed_from {
            Some(from) => restore_stash(tracked, &from, ctx).await,
            None => restore_stash(tracked, base, ctx).await,
        };
    }

    let exists = tracked
        .repo
        .branch_exists(branch)
        .await
        .map_err(|e| failure(tracked, "could not list branches", &e))?;

    if exists {
        tracked
            .repo
            .delete_branch(branch, true)
            .await
            .map_err(|e| failure(tracked, &format!("delete {branch} failed"), &e))?;
    }

    let success = match (moved, exists) {
        (true, _) => RepoSuccess::landed(tracked.name(), base),
        (false, true) => RepoSuccess::unchanged(tracked.name(), format!("deleted {branch}")),
        (false, false) => RepoSuccess::unchanged(tracked.name(), format!("{branch} not present")),
    };
    Ok(noted(success, note))
}

async fn rebase_in_repo(tracked: &TrackedRepo, trunk: &str, ctx: StepContext<'_>) -> RepoOutcome {
    let head = tracked
        .repo
        .current_head()
        .await
        .map_err(|e| failure(tracked, "could not read current branch", &e))?;

    let base = infer_base(&head);
    if base.is_empty() {
        return Err(RepoFailure::new(
            tracked.name(),
            format!("'{head}' has no base branch to rebase onto"),
        ));
    }
    if tracked.is_trunk_only() && base != trunk {
        return Err(RepoFailure::new(
            tracked.name(),
            format!("skipped: '{head}' is not based on {trunk}"),
        ));
    }

    let remote = remote_for(tracked, None).await;
    stash_if_dirty(tracked, ctx).await?;

    if let Err(e) = tracked.repo.pull_rebase(&remote, &base).await {
        restore_stash(tracked, &head, ctx).await;
        return Err(failure(tracked, &format!("rebase onto {remote}/{base} failed"), &e));
    }

    let success = RepoSuccess::unchanged(tracked.name(), format!("rebased {head} onto {remote}/{base}"));
    Ok(noted(success, restore_stash(tracked, &head, ctx).await))
}

async fn reset_in_repo(tracked: &TrackedRepo, branch: &str, trunk: &str, ctx: StepContext<'_>) -> RepoOutcome {
    let head = tracked
        .repo
        .current_head()
        .await
        .map_err(|e| failure(tracked, "could not read current branch", &e))?;

    if head != branch {
        return Ok(RepoSuccess::unchanged(
            tracked.name(),
            format!("on {head}, nothing to reset"),
        ));
    }
    if tracked.is_trunk_only() && base_of(branch) != trunk {
        return Err(RepoFailure::new(
            tracked.name(),
            format!("skipped: '{branch}' is not based on {trunk}"),
        ));
    }

    let remote = remote_for(tracked, None).await;
    stash_if_dirty(tracked, ctx).await?;

    let upstream = format!("{remote}/{branch}");
    let reset = match tracked.repo.fetch(&remote, branch).await {
        Ok(()) => tracked.repo.reset_hard(&upstream).await,
        Err(e) => Err(e),
    };
    if let Err(e) = reset {
        restore_stash(tracked, branch, ctx).await;
        return Err(failure(tracked, &format!("reset to {upstream} failed"), &e));
    }

    let success = RepoSuccess::unchanged(tracked.name(), format!("reset to {upstream}"));
    Ok(noted(success, restore_stash(tracked, branch, ctx).await))
}
