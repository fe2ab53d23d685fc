//! Task Record Store port: durable persistence of task records, feedback
//! history and run logs.

use crate::task::domain::{FeedbackEntry, PullRequestRef, Task, TaskId, TaskStatus};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Result type for task store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Outcome of [`TaskStore::append_feedback`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedbackAppend {
    /// The entry was appended; carries the updated task.
    Appended(Task),
    /// An identical `{content, timestamp}` entry was already recorded.
    AlreadyPresent(Task),
}

impl FeedbackAppend {
    /// Returns the task as stored after the call.
    #[must_use]
    pub const fn task(&self) -> &Task {
        match self {
            Self::Appended(task) | Self::AlreadyPresent(task) => task,
        }
    }
}

/// Task persistence contract.
///
/// Every write is a whole-task upsert that either fully lands or is not
/// observed after a restart. Callers serialize writes per task id.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Inserts or replaces the record for `task.id()` and refreshes the pull
    /// request index.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] or [`StoreError::Serialization`] when the
    /// record cannot be written; the previous record stays intact.
    async fn put(&self, task: &Task) -> StoreResult<()>;

    /// Finds a task by identifier.
    ///
    /// Returns `None` when the task does not exist.
    async fn get(&self, id: TaskId) -> StoreResult<Option<Task>>;

    /// Lists tasks, newest first, optionally filtered by status.
    async fn list(&self, status: Option<TaskStatus>) -> StoreResult<Vec<Task>>;

    /// Finds the task associated with a pull request reference.
    async fn find_by_pr_ref(&self, pr_ref: &PullRequestRef) -> StoreResult<Option<Task>>;

    /// Appends a feedback entry to a stored task.
    ///
    /// Resubmissions with identical content and timestamp are not appended.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the task does not exist.
    async fn append_feedback(
        &self,
        id: TaskId,
        entry: FeedbackEntry,
    ) -> StoreResult<FeedbackAppend>;

    /// Removes a task record, its logs and its index entry.
    ///
    /// Returns `false` when nothing was stored under `id`.
    async fn delete(&self, id: TaskId) -> StoreResult<bool>;

    /// Stores the output log of execution run `run` (1-based).
    async fn save_log(&self, id: TaskId, run: u32, content: &str) -> StoreResult<()>;

    /// Reads the output log of execution run `run`.
    async fn read_log(&self, id: TaskId, run: u32) -> StoreResult<Option<String>>;

    /// Returns the highest run number with a stored log.
    async fn latest_log_run(&self, id: TaskId) -> StoreResult<Option<u32>>;
}

/// Errors returned by task store implementations.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The task was not found.
    #[error("task not found: {0}")]
    NotFound(TaskId),

    /// A stored record failed validation and was not loaded.
    #[error("corrupt task record {location}: {reason}")]
    Corrupt {
        /// Record location (path or key).
        location: String,
        /// Validation failure.
        reason: String,
    },

    /// Encoding or decoding failure.
    #[error("task record serialization error: {0}")]
    Serialization(Arc<dyn std::error::Error + Send + Sync>),

    /// Persistence-layer failure.
    #[error("persistence error: {0}")]
    Io(Arc<dyn std::error::Error + Send + Sync>),
}

impl StoreError {
    /// Wraps a persistence error.
    #[must_use]
    pub fn io(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Io(Arc::new(err))
    }

    /// Wraps an encoding or decoding error.
    #[must_use]
    pub fn serialization(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Serialization(Arc::new(err))
    }
}
