use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use branchctl::config::Config;
use branchctl::events::{BranchEvent, EventBus, RefreshDebouncer};
use branchctl::git::GitCli;
use branchctl::guard::{Confirm, FixedAnswer, NoServerProbe, PidFileProbe, ServerGuard, ServerProbe, StdinConfirm};
use branchctl::logging;
use branchctl::naming::infer_base;
use branchctl::reconcile::StateReconciler;
use branchctl::{BranchError, BranchOrchestrator, OperationReport};

/// Check that git is on PATH before touching any repository
fn check_git_available() -> Result<(), which::Error> {
    let path = which::which("git")?;
    tracing::debug!(path = %path.display(), "git available");
    Ok(())
}

/// Print a helpful error message when git is missing
fn print_git_error(err: &which::Error) {
    eprintln!("Error: {err}");
    eprintln!();
    eprintln!("git is required to run branchctl.");
    eprintln!();
    eprintln!("Install git:");
    eprintln!("  macOS:         brew install git");
    eprintln!("  Ubuntu/Debian: sudo apt install git");
    eprintln!("  Fedora/RHEL:   sudo dnf install git");
}

#[derive(Parser)]
#[command(name = "branchctl")]
#[command(about = "Keep one development branch checked out across related repositories")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file path
    #[arg(short, long)]
    config: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Stop a running server without asking
    #[arg(short = 'y', long)]
    yes: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the effective configuration to .branchctl/config.toml
    Init {
        /// Overwrite an existing project config
        #[arg(long)]
        force: bool,
    },

    /// Show the active branch and every repository's head
    Status,

    /// List known base branches
    Bases,

    /// List development branches
    Branches {
        /// Only branches of this base
        #[arg(short, long)]
        base: Option<String>,
    },

    /// Fetch a published branch into every repository
    Fetch {
        branch: String,

        /// Base branch (inferred from the name by default)
        #[arg(short, long)]
        base: Option<String>,

        /// Fork to fetch from (remote name or owner)
        #[arg(short, long)]
        fork: Option<String>,
    },

    /// Create a new branch from its base in every repository
    Create {
        branch: String,

        #[arg(short, long)]
        base: Option<String>,
    },

    /// Fetch the branch if it is published anywhere, otherwise create it
    Start {
        branch: String,

        #[arg(short, long)]
        base: Option<String>,

        #[arg(short, long)]
        fork: Option<String>,
    },

    /// Switch every repository to a branch, falling back to its base
    Checkout { branch: String },

    /// Delete a development branch everywhere
    Delete {
        branch: String,

        #[arg(short, long)]
        base: Option<String>,
    },

    /// Rebase the checked-out branches onto their bases
    Rebase,

    /// Hard-reset a branch to its remote (default: the active branch)
    Reset { branch: Option<String> },

    /// Compare the catalog with the repositories
    Reconcile {
        /// Replace the catalog with what the repositories contain
        #[arg(long)]
        apply: bool,
    },

    /// Register a base branch
    AddBase {
        name: String,

        /// Fail if the base is already known
        #[arg(long)]
        strict: bool,
    },

    /// Show recently used branches
    History {
        /// Show stopped server commands instead
        #[arg(long)]
        server: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration first (needed for logging setup)
    let config = Config::load(cli.config.as_deref())?;

    let logging_handle = logging::init_logging(&config, cli.debug)?;

    if let Err(err) = check_git_available() {
        print_git_error(&err);
        std::process::exit(1);
    }

    if let Some(Commands::Init { force }) = &cli.command {
        return cmd_init(&config, *force);
    }
    check_repositories(&config).await?;

    let events = spawn_event_listener(&config);
    let mut orchestrator = BranchOrchestrator::init(&config, build_guard(&config, cli.yes), events).await?;

    let result = run_command(&mut orchestrator, cli.command).await;
    orchestrator.teardown()?;

    if let Some(log_path) = logging_handle.log_file_path {
        if log_path.metadata().map(|m| m.len() > 0).unwrap_or(false) {
            eprintln!("Session log: {}", log_path.display());
        }
    }

    result
}

/// Every configured repository path must be a git checkout
async fn check_repositories(config: &Config) -> Result<()> {
    let repos = std::iter::once(&config.repositories.primary).chain(&config.repositories.auxiliaries);
    for repo in repos {
        let path = Config::repo_path(repo);
        if !GitCli::is_worktree(&path).await? {
            bail!("repository '{}' at {} is not a git checkout", repo.name, path.display());
        }
    }
    Ok(())
}

fn cmd_init(config: &Config, force: bool) -> Result<()> {
    let path = Config::project_config_path();
    if path.exists() && !force {
        bail!("{} already exists; pass --force to overwrite", path.display());
    }
    config.save()?;
    println!("Wrote {}", path.display());
    Ok(())
}

fn build_guard(config: &Config, yes: bool) -> ServerGuard {
    let probe: Arc<dyn ServerProbe> = match &config.server.pid_file {
        Some(pid_file) => Arc::new(PidFileProbe::new(pid_file)),
        None => Arc::new(NoServerProbe),
    };
    let confirm: Arc<dyn Confirm> = if yes {
        Arc::new(FixedAnswer(true))
    } else {
        Arc::new(StdinConfirm)
    };
    ServerGuard::new(probe, confirm)
}

/// Debounced event stream, logged for now
fn spawn_event_listener(config: &Config) -> EventBus {
    let (bus, rx) = EventBus::channel();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel();
    let window = Duration::from_millis(config.events.debounce_ms);

    tokio::spawn(RefreshDebouncer::new(rx, window).run(out_tx));
    tokio::spawn(async move {
        while let Some(event) = out_rx.recv().await {
            match event {
                BranchEvent::Refresh => tracing::debug!("Branch listing refreshed"),
                other => tracing::debug!(?other, "Branch event"),
            }
        }
    });
    bus
}

async fn run_command(orchestrator: &mut BranchOrchestrator, command: Option<Commands>) -> Result<()> {
    match command.unwrap_or(Commands::Status) {
        Commands::Init { .. } => bail!("init runs before any repository is opened"),
        Commands::Status => cmd_status(orchestrator).await,
        Commands::Bases => {
            cmd_bases(orchestrator);
            Ok(())
        }
        Commands::Branches { base } => {
            cmd_branches(orchestrator, base.as_deref());
            Ok(())
        }
        Commands::Fetch { branch, base, fork } => {
            let base = base_for(&branch, base)?;
            let report = orchestrator.fetch(&base, &branch, fork.as_deref()).await?;
            print_report(&report);
            Ok(())
        }
        Commands::Create { branch, base } => {
            let base = base_for(&branch, base)?;
            let report = orchestrator.create(&base, &branch).await?;
            print_report(&report);
            Ok(())
        }
        Commands::Start { branch, base, fork } => {
            let base = base_for(&branch, base)?;
            let report = orchestrator
                .fetch_or_create(&base, &branch, fork.as_deref())
                .await?;
            print_report(&report);
            Ok(())
        }
        Commands::Checkout { branch } => {
            let report = orchestrator.checkout(&branch).await?;
            print_report(&report);
            Ok(())
        }
        Commands::Delete { branch, base } => {
            let base = base_for(&branch, base)?;
            let report = orchestrator.delete(&base, &branch).await?;
            print_report(&report);
            Ok(())
        }
        Commands::Rebase => {
            let report = orchestrator.rebase().await?;
            print_report(&report);
            Ok(())
        }
        Commands::Reset { branch } => {
            let report = orchestrator.reset(branch.as_deref()).await?;
            print_report(&report);
            Ok(())
        }
        Commands::Reconcile { apply } => cmd_reconcile(orchestrator, apply).await,
        Commands::AddBase { name, strict } => {
            if orchestrator.add_base(&name, strict)? {
                println!("Added base branch {name}");
            } else {
                println!("Base branch {name} already known");
            }
            Ok(())
        }
        Commands::History { server } => {
            cmd_history(orchestrator, server);
            Ok(())
        }
    }
}

/// Explicit `--base`, else the base inferred from the branch name
fn base_for(branch: &str, base: Option<String>) -> Result<String> {
    if let Some(base) = base {
        return Ok(base);
    }
    let inferred = infer_base(branch);
    if inferred.is_empty() {
        bail!("cannot infer a base branch from '{branch}'; pass --base");
    }
    Ok(inferred)
}

fn print_report(report: &OperationReport) {
    for success in &report.successes {
        let place = success
            .landed_on
            .as_deref()
            .map_or_else(|| "unchanged".to_string(), |b| format!("on {b}"));
        match &success.note {
            Some(note) => println!("✓ {} {} ({})", success.repo, place, note),
            None => println!("✓ {} {}", success.repo, place),
        }
    }
    for failure in &report.failures {
        println!("✗ {failure}");
    }
    if let Some(warning) = report.warning() {
        eprintln!("Warning: {warning}");
    }
}

async fn cmd_status(orchestrator: &BranchOrchestrator) -> Result<()> {
    match orchestrator.active_branch() {
        Some(active) => println!("Active branch: {active}"),
        None => println!("Active branch: (none)"),
    }
    println!("{}", "─".repeat(60));

    let reconciler = StateReconciler::new(orchestrator.repos());
    for head in reconciler.read_heads().await {
        println!("{:<24} {}", head.repo, head.head);
    }

    match orchestrator.resolve_active_branch().await {
        Ok(Some(resolved)) if Some(resolved.as_str()) != orchestrator.active_branch() => {
            println!();
            println!("Repositories are on {resolved}; run `branchctl checkout {resolved}` to adopt it");
        }
        Ok(_) => {}
        Err(e @ (BranchError::AmbiguousState { .. } | BranchError::InconsistentState { .. })) => {
            println!();
            println!("{e}");
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

fn cmd_bases(orchestrator: &BranchOrchestrator) {
    let bases = orchestrator.base_branches();
    if bases.is_empty() {
        println!("No base branches known");
        return;
    }
    for base in bases {
        let marker = if orchestrator.active_branch() == Some(base.as_str()) {
            "▶"
        } else {
            " "
        };
        println!("{marker} {base} ({})", orchestrator.dev_branches(&base).len());
    }
}

fn cmd_branches(orchestrator: &BranchOrchestrator, base: Option<&str>) {
    let bases = match base {
        Some(base) => vec![base.to_string()],
        None => orchestrator.base_branches(),
    };

    let active = orchestrator.active_branch();
    for base in bases {
        let devs = orchestrator.dev_branches(&base);
        if devs.is_empty() {
            continue;
        }
        println!("{base}");
        for dev in devs {
            let marker = if active == Some(dev.as_str()) { "▶" } else { " " };
            println!("  {marker} {dev}");
        }
    }
}

async fn cmd_reconcile(orchestrator: &mut BranchOrchestrator, apply: bool) -> Result<()> {
    if apply {
        let report = orchestrator.reconcile().await?;
        println!(
            "Catalog rebuilt: {} base branches, {} development branches",
            report.bases.len(),
            report.dev_branches.values().map(|d| d.len()).sum::<usize>()
        );
        match report.active {
            Ok(Some(active)) => println!("Active branch: {active}"),
            Ok(None) => println!("Active branch: (undetermined)"),
            Err(e) => println!("Active branch unchanged: {e}"),
        }
        return Ok(());
    }

    let reconciler = StateReconciler::new(orchestrator.repos());
    let bases = reconciler.scan_base_branches().await?;
    let devs = reconciler.scan_dev_branches().await?;

    for base in &bases {
        if !orchestrator.base_branches().contains(base) {
            println!("+ base {base}");
        }
    }
    for (base, names) in &devs {
        for name in names {
            if !orchestrator.dev_branch_exists(base, name) {
                println!("+ {name}");
            }
        }
    }
    for base in orchestrator.base_branches() {
        for name in orchestrator.dev_branches(&base) {
            if !devs.get(&base).is_some_and(|d| d.contains(&name)) {
                println!("- {name}");
            }
        }
    }
    println!("Run with --apply to update the catalog");
    Ok(())
}

fn cmd_history(orchestrator: &BranchOrchestrator, server: bool) {
    let entries = if server {
        orchestrator.catalog().server_command_history()
    } else {
        orchestrator.catalog().branch_history()
    };
    if entries.is_empty() {
        println!("No history yet");
        return;
    }
    for entry in entries {
        println!("{entry}");
    }
}
