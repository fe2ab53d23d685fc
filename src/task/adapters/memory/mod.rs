//! In-memory adapters for tests and ephemeral runs.

mod execution;
mod pull_request;
mod store;
mod vcs;

pub use execution::{InMemoryExecution, ScriptedRun};
pub use pull_request::{InMemoryPullRequests, PullRequestOperation};
pub use store::InMemoryTaskStore;
pub use vcs::{InMemoryVcs, VcsCall, VcsOperation};
