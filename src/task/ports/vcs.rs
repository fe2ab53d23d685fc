//! Version-Control Gateway port: branch, commit and push primitives.

use crate::task::domain::{BranchName, CommitHash};
use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

/// Result type for version-control operations.
pub type VcsResult<T> = Result<T, VcsError>;

/// Thin facade over the version-control tool.
///
/// Operations are scoped to a task branch so adapters may keep one working
/// tree per branch. Each call is atomic from the orchestrator's view: it
/// either succeeds or reports a categorized error with the tool's raw output.
#[async_trait]
pub trait VersionControlGateway: Send + Sync {
    /// Creates `branch` and publishes it to the remote.
    ///
    /// # Errors
    ///
    /// Returns [`VcsErrorKind::BranchExists`] when the branch already exists
    /// locally or on the remote.
    async fn create_and_push_branch(&self, branch: &BranchName) -> VcsResult<()>;

    /// Checks out `branch` and fast-forwards it from the remote.
    async fn checkout_and_pull(&self, branch: &BranchName) -> VcsResult<()>;

    /// Reports whether the branch's working tree holds uncommitted changes.
    async fn has_uncommitted_changes(&self, branch: &BranchName) -> VcsResult<bool>;

    /// Stages everything and commits it, returning the new commit hash.
    async fn commit_all(&self, branch: &BranchName, message: &str) -> VcsResult<CommitHash>;

    /// Pushes `branch` to the remote.
    async fn push(&self, branch: &BranchName) -> VcsResult<()>;
}

/// Category of a version-control failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VcsErrorKind {
    /// The branch already exists.
    BranchExists,
    /// No usable remote is configured.
    NoRemote,
    /// The remote could not be reached.
    NetworkFailure,
    /// Pulling or merging produced conflicts or a non-fast-forward state.
    MergeConflict,
    /// The remote rejected the push.
    Rejected,
    /// The working directory is not a repository.
    NotARepository,
    /// Any other tool failure.
    CommandFailed,
}

impl VcsErrorKind {
    /// Returns the canonical name of the category.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BranchExists => "branch_exists",
            Self::NoRemote => "no_remote",
            Self::NetworkFailure => "network_failure",
            Self::MergeConflict => "merge_conflict",
            Self::Rejected => "rejected",
            Self::NotARepository => "not_a_repository",
            Self::CommandFailed => "command_failed",
        }
    }
}

impl fmt::Display for VcsErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Version-control failure with its category and raw tool output.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct VcsError {
    kind: VcsErrorKind,
    message: String,
}

impl VcsError {
    /// Creates an error of the given category.
    #[must_use]
    pub fn new(kind: VcsErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Returns the failure category.
    #[must_use]
    pub const fn kind(&self) -> VcsErrorKind {
        self.kind
    }

    /// Returns the raw tool output.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}
