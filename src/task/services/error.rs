//! Service-level error taxonomy.

use crate::task::{
    domain::{BranchName, PullRequestRef, TaskDomainError, TaskId, TaskStatus},
    ports::{ExecutionError, PullRequestError, StoreError, VcsError},
};
use std::time::Duration;
use thiserror::Error;

/// Result type for orchestrator operations.
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// Errors returned by the orchestrator.
#[derive(Debug, Clone, Error)]
pub enum OrchestratorError {
    /// An external tool failed.
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    /// The request conflicts with the task's current state.
    #[error(transparent)]
    Conflict(#[from] ConflictError),
    /// The referenced task does not exist.
    #[error(transparent)]
    NotFound(#[from] NotFoundError),
    /// Execution exceeded its ceiling.
    #[error(transparent)]
    Timeout(#[from] TimeoutError),
    /// Persistence failed; existing records are untouched.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The request was rejected by domain validation.
    #[error(transparent)]
    Domain(TaskDomainError),
}

impl From<TaskDomainError> for OrchestratorError {
    fn from(err: TaskDomainError) -> Self {
        match err {
            TaskDomainError::NotReopenable { task_id, status } => {
                Self::Conflict(ConflictError::TaskActive { task_id, status })
            }
            TaskDomainError::BranchNeverCreated(task_id) => {
                Self::Conflict(ConflictError::BranchNeverCreated(task_id))
            }
            other => Self::Domain(other),
        }
    }
}

/// Failure of one of the external gateways, tagged with its sub-kind.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// Version-control failure.
    #[error("version control: {0}")]
    VersionControl(#[from] VcsError),
    /// Execution environment failure.
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    /// Code-hosting failure.
    #[error(transparent)]
    PullRequest(#[from] PullRequestError),
}

/// Conflicts between a request and the current task state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConflictError {
    /// The task has an active worker or is not in a terminal state.
    #[error("task {task_id} is {status}; wait for it to finish before continuing it")]
    TaskActive {
        /// Task that rejected the request.
        task_id: TaskId,
        /// Current state.
        status: TaskStatus,
    },
    /// Another task already owns the requested branch.
    #[error("branch {branch} is already bound to task {owner}")]
    BranchInUse {
        /// Requested branch.
        branch: BranchName,
        /// Task owning the branch.
        owner: TaskId,
    },
    /// Another task already owns the requested pull request reference.
    #[error("pull request {pull_request} is already bound to task {owner}")]
    PullRequestInUse {
        /// Requested pull request reference.
        pull_request: PullRequestRef,
        /// Task owning the reference.
        owner: TaskId,
    },
    /// A short identifier matched more than one task.
    #[error("task id prefix '{prefix}' is ambiguous ({matches} matches)")]
    AmbiguousTaskPrefix {
        /// Prefix supplied by the caller.
        prefix: String,
        /// Number of matching tasks.
        matches: usize,
    },
    /// Cancellation was requested for a task outside its execution step.
    #[error(
        "task {task_id} is {status} and not inside its execution step; \
         only an executing run can be cancelled"
    )]
    NotCancellable {
        /// Task that rejected the request.
        task_id: TaskId,
        /// Current state.
        status: TaskStatus,
    },
    /// The task failed before its branch existed.
    #[error("task {0} failed before its branch was created and cannot be continued")]
    BranchNeverCreated(TaskId),
    /// Purge was requested for a task that is still active.
    #[error("task {task_id} is {status}; only finished, idle tasks can be purged")]
    NotPurgeable {
        /// Task that rejected the request.
        task_id: TaskId,
        /// Current state.
        status: TaskStatus,
    },
    /// The orchestrator is shutting down and no longer accepts work.
    #[error("orchestrator is shutting down")]
    ShuttingDown,
}

/// Unknown task or pull request lookups.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotFoundError {
    /// No task has this identifier.
    #[error("task not found: {0}")]
    Task(TaskId),
    /// No task matched the identifier, prefix or pull request reference.
    #[error("no task matches '{0}'")]
    Identifier(String),
    /// The task has no stored log for the requested run.
    #[error("task {task_id} has no output for run {run}")]
    Output {
        /// Task queried.
        task_id: TaskId,
        /// Run requested.
        run: u32,
    },
}

/// Execution exceeded the configured ceiling.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("execution of task {task_id} timed out after {}s", .limit.as_secs())]
pub struct TimeoutError {
    /// Task whose run timed out.
    pub task_id: TaskId,
    /// Ceiling that was exceeded.
    pub limit: Duration,
}
