//! Error types for task domain validation and parsing.

use super::{PullRequestRef, TaskId, TaskStatus};
use thiserror::Error;

/// Errors returned while constructing or mutating domain task values.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TaskDomainError {
    /// The task description is empty after trimming.
    #[error("task description must not be empty")]
    EmptyDescription,

    /// Feedback content is empty after trimming.
    #[error("feedback content must not be empty")]
    EmptyFeedback,

    /// The branch name does not satisfy ref-format rules.
    #[error("invalid branch name '{0}'")]
    InvalidBranchName(String),

    /// The pull request reference is malformed.
    #[error("invalid pull request reference '{0}'")]
    InvalidPullRequestRef(String),

    /// The task identifier is not a UUID.
    #[error("invalid task identifier '{0}'")]
    InvalidTaskId(String),

    /// The commit hash is malformed.
    #[error("invalid commit hash '{0}'")]
    InvalidCommitHash(String),

    /// The requested state transition is not an edge of the lifecycle graph.
    #[error("task {task_id} cannot transition from {from} to {to}")]
    InvalidStateTransition {
        /// Task being transitioned.
        task_id: TaskId,
        /// Current state.
        from: TaskStatus,
        /// Requested state.
        to: TaskStatus,
    },

    /// The worker tried to attach a second, different pull request.
    #[error("task {task_id} is already associated with pull request {existing}")]
    PullRequestAlreadyAssociated {
        /// Task carrying the association.
        task_id: TaskId,
        /// Reference already stored on the task.
        existing: PullRequestRef,
    },

    /// A continuation targeted a task that is still active.
    #[error("task {task_id} is {status}; only completed or failed tasks accept feedback")]
    NotReopenable {
        /// Task that rejected the continuation.
        task_id: TaskId,
        /// Current state.
        status: TaskStatus,
    },

    /// A continuation targeted a task whose branch was never created.
    #[error("task {0} failed before its branch was created and cannot be continued")]
    BranchNeverCreated(TaskId),
}

/// Error returned while parsing task states from persistence or requests.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown task status: {0}")]
pub struct ParseTaskStatusError(pub String);

/// Error returned while parsing pull request modes.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown pull request mode: {0}")]
pub struct ParsePrModeError(pub String);
