//! Branch catalog: the authoritative record of known base branches, their
//! development branches, and the active branch.
//!
//! The catalog is the single writer of [`State`]. Every mutation is written
//! through before the call returns.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use tracing::{debug, info};

use crate::error::BranchError;
use crate::state::{BaseEntry, DevEntry, State};

pub struct BranchCatalog {
    state: State,
}

impl BranchCatalog {
    /// Open the catalog persisted under `state_dir`
    pub fn open(state_dir: &Path) -> Result<Self, BranchError> {
        let state = State::load(state_dir).map_err(BranchError::Storage)?;
        Ok(Self { state })
    }

    fn persist(&mut self) -> Result<(), BranchError> {
        self.state.save().map_err(BranchError::Storage)
    }

    pub fn is_empty(&self) -> bool {
        self.state.base_branches.is_empty()
    }

    /// Register a base branch.
    ///
    /// Returns whether it was inserted. With `strict`, an existing base is an
    /// [`BranchError::AlreadyExists`] instead of a no-op.
    pub fn add_base(&mut self, id: &str, sequence: usize, strict: bool) -> Result<bool, BranchError> {
        if id.trim().is_empty() {
            return Err(BranchError::validation("base branch name is empty"));
        }
        if self.has_base(id) {
            if strict {
                return Err(BranchError::AlreadyExists {
                    base: id.to_string(),
                    name: id.to_string(),
                });
            }
            return Ok(false);
        }

        self.state.base_branches.push(BaseEntry {
            name: id.to_string(),
            sequence,
        });
        self.persist()?;
        info!(base = %id, "Registered base branch");
        Ok(true)
    }

    pub fn has_base(&self, id: &str) -> bool {
        self.state.base_branches.iter().any(|b| b.name == id)
    }

    pub fn add_dev(&mut self, base: &str, name: &str) -> Result<(), BranchError> {
        if self.exists(base, name) {
            return Err(BranchError::AlreadyExists {
                base: base.to_string(),
                name: name.to_string(),
            });
        }
        self.state
            .dev_branches
            .entry(base.to_string())
            .or_default()
            .push(DevEntry {
                name: name.to_string(),
            });
        self.persist()?;
        debug!(%base, %name, "Recorded development branch");
        Ok(())
    }

    pub fn remove_dev(&mut self, base: &str, name: &str) -> Result<(), BranchError> {
        let entries = self
            .state
            .dev_branches
            .get_mut(base)
            .filter(|e| e.iter().any(|d| d.name == name))
            .ok_or_else(|| BranchError::NotFound {
                base: base.to_string(),
                name: name.to_string(),
            })?;

        entries.retain(|d| d.name != name);
        if entries.is_empty() {
            self.state.dev_branches.remove(base);
        }
        self.persist()?;
        debug!(%base, %name, "Forgot development branch");
        Ok(())
    }

    pub fn exists(&self, base: &str, name: &str) -> bool {
        self.state
            .dev_branches
            .get(base)
            .is_some_and(|e| e.iter().any(|d| d.name == name))
    }

    /// Base branches in display order (sequence, then name)
    pub fn list_bases(&self) -> Vec<String> {
        let mut bases: Vec<&BaseEntry> = self.state.base_branches.iter().collect();
        bases.sort_by(|a, b| a.sequence.cmp(&b.sequence).then_with(|| a.name.cmp(&b.name)));
        bases.into_iter().map(|b| b.name.clone()).collect()
    }

    pub fn list_dev(&self, base: &str) -> BTreeSet<String> {
        self.state
            .dev_branches
            .get(base)
            .map(|e| e.iter().map(|d| d.name.clone()).collect())
            .unwrap_or_default()
    }

    pub fn get_active(&self) -> Option<&str> {
        self.state.active_branch.as_deref()
    }

    pub fn set_active(&mut self, id: Option<&str>) -> Result<(), BranchError> {
        if self.state.active_branch.as_deref() == id {
            return Ok(());
        }
        self.state.active_branch = id.map(ToString::to_string);
        self.persist()
    }

    /// Replace every base and development branch in one write.
    ///
    /// `bases` carries `(name, sequence)` pairs. The active branch is left as is.
    pub fn rebuild(
        &mut self,
        bases: Vec<(String, usize)>,
        devs: BTreeMap<String, BTreeSet<String>>,
    ) -> Result<(), BranchError> {
        self.state.base_branches = bases
            .into_iter()
            .map(|(name, sequence)| BaseEntry { name, sequence })
            .collect();
        self.state.dev_branches = devs
            .into_iter()
            .filter(|(_, names)| !names.is_empty())
            .map(|(base, names)| {
                let entries = names.into_iter().map(|name| DevEntry { name }).collect();
                (base, entries)
            })
            .collect();
        self.persist()?;
        info!(
            bases = self.state.base_branches.len(),
            "Rebuilt branch catalog"
        );
        Ok(())
    }

    pub fn branch_history(&self) -> &[String] {
        &self.state.branch_history
    }

    pub fn server_command_history(&self) -> &[String] {
        &self.state.server_command_history
    }

    pub fn record_branch(&mut self, name: &str) -> Result<(), BranchError> {
        self.state
            .push_branch_history(name)
            .map_err(BranchError::Storage)
    }

    pub fn record_server_command(&mut self, command: &str) -> Result<(), BranchError> {
        self.state
            .push_server_command(command)
            .map_err(BranchError::Storage)
    }

    /// Flush the current state to disk
    pub fn flush(&mut self) -> Result<(), BranchError> {
        self.persist()
    }
}
