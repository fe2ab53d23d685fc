//! Port contracts for task lifecycle orchestration.
//!
//! Ports define infrastructure-agnostic interfaces used by task services:
//! the Task Record Store and the three gateways over version control,
//! isolated execution and pull request hosting.

pub mod execution;
pub mod pull_request;
pub mod store;
pub mod vcs;

pub use execution::{
    ExecutionContext, ExecutionError, ExecutionErrorKind, ExecutionGateway, ExecutionOutcome,
    ExecutionResult,
};
pub use pull_request::{
    CreatePullRequest, PullRequestError, PullRequestErrorKind, PullRequestGateway,
    PullRequestResult,
};
pub use store::{FeedbackAppend, StoreError, StoreResult, TaskStore};
pub use vcs::{VcsError, VcsErrorKind, VcsResult, VersionControlGateway};
