//! PR Gateway port: locate, open and promote pull requests for a branch.

use crate::task::domain::{BranchName, PullRequestRef};
use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

/// Result type for pull request operations.
pub type PullRequestResult<T> = Result<T, PullRequestError>;

/// Parameters for opening a pull request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatePullRequest {
    /// Head branch.
    pub branch: BranchName,
    /// Pull request title.
    pub title: String,
    /// Pull request body.
    pub body: String,
    /// Whether to open the pull request as a draft.
    pub draft: bool,
}

/// Code-hosting pull request facade.
///
/// Callers must look a branch up with [`Self::find_by_branch`] before
/// calling [`Self::create`]; a branch never gets two pull requests.
#[async_trait]
pub trait PullRequestGateway: Send + Sync {
    /// Finds the pull request whose head is `branch`, in any state.
    async fn find_by_branch(
        &self,
        branch: &BranchName,
    ) -> PullRequestResult<Option<PullRequestRef>>;

    /// Opens a pull request.
    async fn create(&self, request: &CreatePullRequest) -> PullRequestResult<PullRequestRef>;

    /// Marks a draft pull request ready for review.
    async fn mark_ready(&self, pr_ref: &PullRequestRef) -> PullRequestResult<()>;
}

/// Category of a pull request failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PullRequestErrorKind {
    /// The referenced pull request or repository does not exist.
    NotFound,
    /// The hosting CLI is not authenticated.
    Unauthenticated,
    /// The hosting CLI printed something that could not be interpreted.
    UnparseableOutput,
    /// Any other hosting failure.
    CommandFailed,
}

impl PullRequestErrorKind {
    /// Returns the canonical name of the category.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Unauthenticated => "unauthenticated",
            Self::UnparseableOutput => "unparseable_output",
            Self::CommandFailed => "command_failed",
        }
    }
}

impl fmt::Display for PullRequestErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pull request failure with its category and raw tool output.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("pull request {kind}: {message}")]
pub struct PullRequestError {
    kind: PullRequestErrorKind,
    message: String,
}

impl PullRequestError {
    /// Creates an error of the given category.
    #[must_use]
    pub fn new(kind: PullRequestErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Returns the failure category.
    #[must_use]
    pub const fn kind(&self) -> PullRequestErrorKind {
        self.kind
    }

    /// Returns the raw tool output.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}
