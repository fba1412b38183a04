use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub repositories: RepositoriesConfig,
    #[serde(default)]
    pub branches: BranchesConfig,
    #[serde(default)]
    pub operations: OperationsConfig,
    #[serde(default)]
    pub server: ServerConfig,
    pub paths: PathsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub events: EventsConfig,
}

/// The tracked repository set: one primary plus auxiliaries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoriesConfig {
    pub primary: RepoConfig,
    #[serde(default)]
    pub auxiliaries: Vec<RepoConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RepoConfig {
    pub name: String,
    pub path: String,
    /// Remote used when no fork is requested (falls back to "origin")
    #[serde(default)]
    pub default_remote: Option<String>,
    /// Only follows the trunk base branch (e.g. an upgrade-scripts repository)
    #[serde(default)]
    pub trunk_only: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchesConfig {
    /// The mainline base branch trunk-only repositories are limited to
    #[serde(default = "default_trunk")]
    pub trunk: String,
    /// Display order of base branches; unlisted bases sort after these
    #[serde(default)]
    pub base_sequence: Vec<String>,
}

fn default_trunk() -> String {
    "master".to_string()
}

impl Default for BranchesConfig {
    fn default() -> Self {
        Self {
            trunk: default_trunk(),
            base_sequence: vec!["master".to_string()],
        }
    }
}

/// What to do when a repository has uncommitted changes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirtyPolicy {
    /// Stash under a per-branch label, pop when returning to that branch
    #[default]
    Stash,
    /// Refuse to start the operation
    Abort,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationsConfig {
    #[serde(default)]
    pub dirty_policy: DirtyPolicy,
    /// Pull the base branch before creating a branch from it (best effort)
    #[serde(default = "default_true")]
    pub pull_on_create: bool,
    /// Ask before stopping a running server
    #[serde(default = "default_true")]
    pub confirm_server_stop: bool,
}

fn default_true() -> bool {
    true
}

impl Default for OperationsConfig {
    fn default() -> Self {
        Self {
            dirty_policy: DirtyPolicy::default(),
            pull_on_create: true,
            confirm_server_stop: true,
        }
    }
}

/// Local application server that must not survive a branch switch
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ServerConfig {
    /// File holding the pid of the running server, if any
    #[serde(default)]
    pub pid_file: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    pub state: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to log to a file under the state directory instead of stderr
    #[serde(default)]
    pub to_file: bool,
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            to_file: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Window in which refresh notifications are coalesced
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

fn default_debounce_ms() -> u64 {
    200
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
        }
    }
}

impl Config {
    /// Path to the project config file
    pub fn project_config_path() -> PathBuf {
        PathBuf::from(".branchctl/config.toml")
    }

    pub fn load(config_path: Option<&str>) -> Result<Self> {
        // Start with embedded defaults so branchctl works without config files
        let defaults = Config::default();
        let defaults_json =
            serde_json::to_string(&defaults).context("Failed to serialize default config")?;

        let mut builder = config::Config::builder().add_source(config::File::from_str(
            &defaults_json,
            config::FileFormat::Json,
        ));

        let project_config = Self::project_config_path();
        if project_config.exists() {
            builder = builder.add_source(config::File::from(project_config));
        }

        // User config in ~/.config/branchctl/ (optional global overrides)
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("branchctl").join("config.toml");
            if user_config.exists() {
                builder = builder.add_source(config::File::from(user_config));
            }
        }

        // Explicit config file (CLI override)
        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path));
        }

        // Environment variables with BRANCHCTL_ prefix
        builder = builder.add_source(
            config::Environment::with_prefix("BRANCHCTL")
                .separator("__")
                .try_parsing(true),
        );

        let config: Config = builder
            .build()
            .context("Failed to load configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Reject repository sets the engine cannot reason about
    pub fn validate(&self) -> Result<()> {
        let trunk_only = self
            .repositories
            .auxiliaries
            .iter()
            .filter(|r| r.trunk_only)
            .count();
        if trunk_only > 1 {
            bail!("at most one auxiliary repository may be trunk_only (found {trunk_only})");
        }
        if self.repositories.primary.trunk_only {
            bail!("the primary repository cannot be trunk_only");
        }

        let mut names: Vec<&str> = std::iter::once(&self.repositories.primary)
            .chain(&self.repositories.auxiliaries)
            .map(|r| r.name.as_str())
            .collect();
        names.sort_unstable();
        if let Some(dup) = names.windows(2).find(|w| w[0] == w[1]) {
            bail!("repository name '{}' is configured twice", dup[0]);
        }
        if self.branches.trunk.trim().is_empty() {
            bail!("branches.trunk must not be empty");
        }
        Ok(())
    }

    /// Save config to .branchctl/config.toml
    pub fn save(&self) -> Result<()> {
        let config_path = Self::project_config_path();

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let toml_str =
            toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        std::fs::write(&config_path, toml_str).context("Failed to write config file")?;

        Ok(())
    }

    /// Get absolute path to state directory
    pub fn state_path(&self) -> PathBuf {
        absolute(&self.paths.state)
    }

    /// Get absolute path to logs directory
    pub fn logs_path(&self) -> PathBuf {
        self.state_path().join("logs")
    }

    /// Absolute path of a configured repository
    pub fn repo_path(repo: &RepoConfig) -> PathBuf {
        absolute(&repo.path)
    }
}

fn absolute(path: &str) -> PathBuf {
    let path = PathBuf::from(path);
    if path.is_absolute() {
        path
    } else {
        std::env::current_dir().unwrap_or_default().join(path)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            repositories: RepositoriesConfig {
                primary: RepoConfig {
                    name: "main".to_string(),
                    path: ".".to_string(),
                    default_remote: None,
                    trunk_only: false,
                },
                auxiliaries: Vec::new(),
            },
            branches: BranchesConfig::default(),
            operations: OperationsConfig::default(),
            server: ServerConfig::default(),
            paths: PathsConfig {
                state: ".branchctl".to_string(),
            },
            logging: LoggingConfig::default(),
            events: EventsConfig::default(),
        }
    }
}
