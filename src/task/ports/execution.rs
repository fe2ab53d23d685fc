//! Execution Gateway port: runs a task inside an isolated environment.

use crate::task::domain::{BranchName, FeedbackEntry, TaskId};
use async_trait::async_trait;
use std::fmt;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Result type for execution operations.
pub type ExecutionResult<T> = Result<T, ExecutionError>;

/// Everything the execution environment needs for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionContext {
    /// Task being executed.
    pub task_id: TaskId,
    /// 1-based run number for this task.
    pub run: u32,
    /// Branch whose working tree the run modifies.
    pub branch: BranchName,
    /// Original task description.
    pub description: String,
    /// Full feedback history in append order.
    pub feedback: Vec<FeedbackEntry>,
    /// Rendered instruction handed to the agent.
    pub prompt: String,
}

/// Terminal result of a run that reached completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    /// Whether the run reported success.
    pub success: bool,
    /// Collected output.
    pub output_log: String,
    /// Exit status reported by the environment, if any.
    pub exit_status: Option<i32>,
}

impl ExecutionOutcome {
    /// Creates a successful outcome.
    #[must_use]
    pub fn succeeded(output_log: impl Into<String>) -> Self {
        Self {
            success: true,
            output_log: output_log.into(),
            exit_status: Some(0),
        }
    }

    /// Creates a failed outcome with an exit status.
    #[must_use]
    pub fn failed(output_log: impl Into<String>, exit_status: i32) -> Self {
        Self {
            success: false,
            output_log: output_log.into(),
            exit_status: Some(exit_status),
        }
    }
}

/// Isolated execution environment.
///
/// `run` blocks until the environment reports a terminal result. When
/// `cancel` fires, implementations abort the run and return
/// [`ExecutionErrorKind::Cancelled`]; on any return nothing started by the
/// call may keep running.
#[async_trait]
pub trait ExecutionGateway: Send + Sync {
    /// Runs the task and waits for its terminal result.
    async fn run(
        &self,
        context: &ExecutionContext,
        cancel: CancellationToken,
    ) -> ExecutionResult<ExecutionOutcome>;
}

/// Category of an execution infrastructure failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionErrorKind {
    /// The environment could not be started.
    Unavailable,
    /// The run was aborted through its cancellation token.
    Cancelled,
    /// The environment died without reporting a result.
    Crashed,
    /// The run finished and reported failure.
    Failed,
}

impl ExecutionErrorKind {
    /// Returns the canonical name of the category.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unavailable => "unavailable",
            Self::Cancelled => "cancelled",
            Self::Crashed => "crashed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ExecutionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Execution failure with its category and raw message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("execution {kind}: {message}")]
pub struct ExecutionError {
    kind: ExecutionErrorKind,
    message: String,
}

impl ExecutionError {
    /// Creates an error of the given category.
    #[must_use]
    pub fn new(kind: ExecutionErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Creates a cancellation error.
    #[must_use]
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ExecutionErrorKind::Cancelled, message)
    }

    /// Returns the failure category.
    #[must_use]
    pub const fn kind(&self) -> ExecutionErrorKind {
        self.kind
    }

    /// Returns the raw message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}
