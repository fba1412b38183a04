//! Git access: CLI wrapper, the repository abstraction, and a mock.

mod cli;
mod mock;
mod repository;

pub use cli::{GitCli, Remote, StashEntry};
pub use mock::{MockCommand, MockRepository};
pub use repository::{GitRepository, Repository};
