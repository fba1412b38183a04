//! Running-server guard.
//!
//! A local application server started from the repositories keeps their
//! files open and caches their code. It has to be stopped before branches
//! move underneath it.

use std::fmt;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::{info, warn};

use crate::error::BranchError;

/// A server process attached to the repositories
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningServer {
    pub pid: u32,
    /// Command line the server was started with, when known
    pub command: Option<String>,
}

impl fmt::Display for RunningServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.command {
            Some(cmd) => write!(f, "pid {} ({cmd})", self.pid),
            None => write!(f, "pid {}", self.pid),
        }
    }
}

/// Detects and stops the server
#[async_trait]
pub trait ServerProbe: Send + Sync {
    async fn detect(&self) -> Result<Option<RunningServer>>;

    async fn terminate(&self, server: &RunningServer) -> Result<()>;
}

/// Asks the user before stopping a server
#[async_trait]
pub trait Confirm: Send + Sync {
    async fn confirm(&self, prompt: &str) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardOutcome {
    /// Nothing was running
    Clear,
    /// A server was running and has been stopped
    Stopped(RunningServer),
}

pub struct ServerGuard {
    probe: Arc<dyn ServerProbe>,
    confirm: Arc<dyn Confirm>,
}

impl ServerGuard {
    pub fn new(probe: Arc<dyn ServerProbe>, confirm: Arc<dyn Confirm>) -> Self {
        Self { probe, confirm }
    }

    /// Guard that never finds a server
    pub fn disabled() -> Self {
        Self::new(Arc::new(NoServerProbe), Arc::new(FixedAnswer(true)))
    }

    /// Make sure no server is running before repositories are touched.
    ///
    /// With `confirm`, the user is asked first and a refusal aborts the
    /// operation with [`BranchError::ServerRunning`].
    pub async fn ensure_no_running_server(&self, confirm: bool) -> Result<GuardOutcome, BranchError> {
        let server = self
            .probe
            .detect()
            .await
            .map_err(|e| BranchError::ServerRunning(format!("could not determine server state: {e:#}")))?;

        let Some(server) = server else {
            return Ok(GuardOutcome::Clear);
        };

        if confirm {
            let prompt = format!("A server is running ({server}). Stop it to continue?");
            if !self.confirm.confirm(&prompt).await {
                return Err(BranchError::ServerRunning(format!("{server} left running")));
            }
        }

        self.probe
            .terminate(&server)
            .await
            .map_err(|e| BranchError::ServerRunning(format!("{server} could not be stopped: {e:#}")))?;

        info!(pid = server.pid, "Stopped running server");
        Ok(GuardOutcome::Stopped(server))
    }
}

/// Probe for setups without a managed server
pub struct NoServerProbe;

#[async_trait]
impl ServerProbe for NoServerProbe {
    async fn detect(&self) -> Result<Option<RunningServer>> {
        Ok(None)
    }

    async fn terminate(&self, _server: &RunningServer) -> Result<()> {
        Ok(())
    }
}

/// Server tracked through a pid file.
///
/// The first line holds the pid. An optional second line holds the command
/// line the server was started with.
pub struct PidFileProbe {
    pid_file: PathBuf,
    /// How long to wait for the process to exit after the kill signal
    stop_timeout: Duration,
}

impl PidFileProbe {
    pub fn new(pid_file: impl Into<PathBuf>) -> Self {
        Self {
            pid_file: pid_file.into(),
            stop_timeout: Duration::from_secs(5),
        }
    }

    /// Full process table scan, kept off the async workers
    async fn scan<T, F>(pid: u32, inspect: F) -> Result<Option<T>>
    where
        T: Send + 'static,
        F: FnOnce(&sysinfo::Process) -> T + Send + 'static,
    {
        tokio::task::spawn_blocking(move || {
            let mut sys = System::new();
            sys.refresh_processes(ProcessesToUpdate::All, true);
            sys.process(Pid::from_u32(pid)).map(inspect)
        })
        .await
        .context("Process scan task failed")
    }

    async fn is_process_running(pid: u32) -> Result<bool> {
        Ok(Self::scan(pid, |_| ()).await?.is_some())
    }

    fn parse_pid_file(contents: &str) -> Option<RunningServer> {
        let mut lines = contents.lines();
        let pid = lines.next()?.trim().parse().ok()?;
        let command = lines
            .next()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(ToString::to_string);
        Some(RunningServer { pid, command })
    }
}

#[async_trait]
impl ServerProbe for PidFileProbe {
    async fn detect(&self) -> Result<Option<RunningServer>> {
        if !self.pid_file.exists() {
            return Ok(None);
        }
        let contents = tokio::fs::read_to_string(&self.pid_file)
            .await
            .with_context(|| format!("Failed to read {}", self.pid_file.display()))?;

        let Some(server) = Self::parse_pid_file(&contents) else {
            warn!(path = %self.pid_file.display(), "Ignoring malformed pid file");
            return Ok(None);
        };

        if Self::is_process_running(server.pid).await? {
            Ok(Some(server))
        } else {
            Ok(None)
        }
    }

    async fn terminate(&self, server: &RunningServer) -> Result<()> {
        if Self::scan(server.pid, sysinfo::Process::kill).await? == Some(false) {
            anyhow::bail!("kill signal was not delivered");
        }

        let deadline = tokio::time::Instant::now() + self.stop_timeout;
        while Self::is_process_running(server.pid).await? {
            if tokio::time::Instant::now() >= deadline {
                anyhow::bail!("still running after {:?}", self.stop_timeout);
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        if let Err(e) = tokio::fs::remove_file(&self.pid_file).await {
            warn!(path = %self.pid_file.display(), "Could not remove pid file: {}", e);
        }
        Ok(())
    }
}

/// Prompt on the terminal
pub struct StdinConfirm;

#[async_trait]
impl Confirm for StdinConfirm {
    async fn confirm(&self, prompt: &str) -> bool {
        let prompt = prompt.to_string();
        tokio::task::spawn_blocking(move || {
            print!("{prompt} [y/N] ");
            let _ = io::stdout().flush();
            let mut answer = String::new();
            if io::stdin().lock().read_line(&mut answer).is_err() {
                return false;
            }
            matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
        })
        .await
        .unwrap_or(false)
    }
}

/// Same answer every time (`--yes`, non-interactive use)
pub struct FixedAnswer(pub bool);

#[async_trait]
impl Confirm for FixedAnswer {
    async fn confirm(&self, _prompt: &str) -> bool {
        self.0
    }
}
