//! branchctl - keep one development branch checked out across a primary
//! repository and its auxiliaries.
//!
//! The engine lives in [`ops::BranchOrchestrator`]. It fans each branch
//! operation out over a [`repos::RepositorySet`], records the result in the
//! [`catalog::BranchCatalog`], and reports per-repository failures without
//! aborting the others.

pub mod catalog;
pub mod config;
pub mod error;
pub mod events;
pub mod git;
pub mod guard;
pub mod logging;
pub mod naming;
pub mod ops;
pub mod reconcile;
pub mod repos;
pub mod state;

pub use error::BranchError;
pub use ops::{BranchOrchestrator, OperationReport};
