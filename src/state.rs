//! Persisted key-value state.
//!
//! A single JSON document under the state directory. Top-level keys:
//! `base-branches`, `active-branch`, `branch-history`,
//! `server-command-history`, `updated_at`, plus one list per base branch
//! keyed by the base branch's exact name.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Maximum entries kept in each recall history
pub const HISTORY_LIMIT: usize = 50;

const STATE_FILE: &str = "state.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BaseEntry {
    pub name: String,
    pub sequence: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DevEntry {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct State {
    #[serde(rename = "base-branches", default)]
    pub base_branches: Vec<BaseEntry>,

    #[serde(rename = "active-branch", default)]
    pub active_branch: Option<String>,

    #[serde(rename = "branch-history", default)]
    pub branch_history: Vec<String>,

    #[serde(rename = "server-command-history", default)]
    pub server_command_history: Vec<String>,

    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,

    /// Development branches per base branch, keyed by the base name
    #[serde(flatten)]
    pub dev_branches: BTreeMap<String, Vec<DevEntry>>,

    #[serde(skip)]
    state_path: PathBuf,
}

impl State {
    /// Load state from `state_dir`, starting empty when nothing was saved yet
    pub fn load(state_dir: &Path) -> Result<Self> {
        fs::create_dir_all(state_dir).context("Failed to create state directory")?;

        let state_file = state_dir.join(STATE_FILE);

        if state_file.exists() {
            let contents = fs::read_to_string(&state_file).context("Failed to read state file")?;
            let mut state: State =
                serde_json::from_str(&contents).context("Failed to parse state file")?;
            state.state_path = state_dir.to_path_buf();
            Ok(state)
        } else {
            Ok(Self {
                state_path: state_dir.to_path_buf(),
                ..Self::default()
            })
        }
    }

    /// Write the whole document; a crash mid-write leaves the previous file intact
    pub fn save(&mut self) -> Result<()> {
        self.updated_at = Some(Utc::now());

        let state_file = self.state_path.join(STATE_FILE);
        let tmp_file = self.state_path.join(format!("{STATE_FILE}.tmp"));
        let contents = serde_json::to_string_pretty(self)?;

        fs::write(&tmp_file, contents).context("Failed to write state file")?;
        fs::rename(&tmp_file, &state_file).context("Failed to replace state file")?;
        Ok(())
    }

    pub fn path(&self) -> PathBuf {
        self.state_path.join(STATE_FILE)
    }

    pub fn push_branch_history(&mut self, entry: &str) -> Result<()> {
        push_bounded(&mut self.branch_history, entry);
        self.save()
    }

    pub fn push_server_command(&mut self, entry: &str) -> Result<()> {
        push_bounded(&mut self.server_command_history, entry);
        self.save()
    }
}

/// Most recent first, no duplicates, at most [`HISTORY_LIMIT`] entries
fn push_bounded(list: &mut Vec<String>, entry: &str) {
    let entry = entry.trim();
    if entry.is_empty() {
        return;
    }
    list.retain(|e| e != entry);
    list.insert(0, entry.to_string());
    list.truncate(HISTORY_LIMIT);
}
