//! Task aggregate root and related task lifecycle types.

use super::{
    BranchName, CommitHash, FeedbackEntry, FeedbackOrigin, ParsePrModeError,
    ParseTaskStatusError, PullRequestRef, TaskDomainError, TaskId,
};
use chrono::{DateTime, Utc};
use mockable::Clock;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Detail recorded when a failure arrives without any message text.
const UNKNOWN_FAILURE_DETAIL: &str = "task failed without an error message";

/// Task lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Task has been accepted but its branch does not exist yet.
    Submitted,
    /// The task branch exists on the remote.
    BranchCreated,
    /// A draft pull request was opened before execution.
    PrCreated,
    /// The execution environment is working on the task.
    Running,
    /// Execution finished; changes are being committed and pushed.
    Committing,
    /// The run finished successfully.
    Completed,
    /// The run failed; see the task's error detail.
    Failed,
}

impl TaskStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [Self; 7] = [
        Self::Submitted,
        Self::BranchCreated,
        Self::PrCreated,
        Self::Running,
        Self::Committing,
        Self::Completed,
        Self::Failed,
    ];

    /// Returns the canonical storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::BranchCreated => "branch_created",
            Self::PrCreated => "pr_created",
            Self::Running => "running",
            Self::Committing => "committing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Returns `true` for `completed` and `failed`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Reports whether the worker may move a task from `self` to `target`.
    ///
    /// Continuations re-entering `branch_created` from a terminal state are
    /// handled by [`Task::reopen`] and are not edges of this graph.
    #[must_use]
    pub const fn can_transition_to(self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Submitted, Self::BranchCreated)
                | (Self::BranchCreated, Self::PrCreated | Self::Running)
                | (Self::PrCreated, Self::Running)
                | (Self::Running, Self::Committing)
                | (Self::Committing, Self::Completed)
                | (
                    Self::Submitted
                        | Self::BranchCreated
                        | Self::PrCreated
                        | Self::Running
                        | Self::Committing,
                    Self::Failed
                )
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for TaskStatus {
    type Error = ParseTaskStatusError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let normalized = value.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == normalized)
            .ok_or_else(|| ParseTaskStatusError(value.to_owned()))
    }
}

/// When the worker opens the task's pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrMode {
    /// Open a draft pull request right after the branch is pushed.
    EagerPr,
    /// Open the pull request after the first commit lands.
    #[default]
    DeferredPr,
}

impl PrMode {
    /// Returns the canonical storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::EagerPr => "eager_pr",
            Self::DeferredPr => "deferred_pr",
        }
    }
}

impl fmt::Display for PrMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for PrMode {
    type Error = ParsePrModeError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.trim().to_ascii_lowercase().as_str() {
            "eager_pr" | "eager" => Ok(Self::EagerPr),
            "deferred_pr" | "deferred" => Ok(Self::DeferredPr),
            _ => Err(ParsePrModeError(value.to_owned())),
        }
    }
}

/// Validated inputs for creating a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTask {
    /// Natural-language goal.
    pub description: String,
    /// Explicit branch, or `None` to derive one from the id and description.
    pub branch: Option<BranchName>,
    /// Pull request policy.
    pub mode: PrMode,
    /// Where the description came from.
    pub origin: FeedbackOrigin,
    /// Additional entries supplied at submission time, in order.
    pub feedback: Vec<FeedbackEntry>,
}

/// Task aggregate root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    id: TaskId,
    description: String,
    branch: BranchName,
    mode: PrMode,
    status: TaskStatus,
    pull_request_ref: Option<PullRequestRef>,
    commit_hash: Option<CommitHash>,
    error_detail: Option<String>,
    feedback_history: Vec<FeedbackEntry>,
    created_at: DateTime<Utc>,
    branch_created_at: Option<DateTime<Utc>>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    last_continued_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

/// Parameter object for reconstructing a persisted task aggregate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedTaskData {
    /// Persisted task identifier.
    pub id: TaskId,
    /// Persisted description.
    pub description: String,
    /// Persisted branch name.
    pub branch: BranchName,
    /// Persisted pull request policy.
    pub mode: PrMode,
    /// Persisted lifecycle state.
    pub status: TaskStatus,
    /// Persisted pull request reference, if any.
    pub pull_request_ref: Option<PullRequestRef>,
    /// Persisted latest commit hash, if any.
    pub commit_hash: Option<CommitHash>,
    /// Persisted failure detail, if any.
    pub error_detail: Option<String>,
    /// Persisted feedback history in append order.
    pub feedback_history: Vec<FeedbackEntry>,
    /// Persisted creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Persisted branch creation timestamp.
    pub branch_created_at: Option<DateTime<Utc>>,
    /// Persisted first execution start.
    pub started_at: Option<DateTime<Utc>>,
    /// Persisted first terminal timestamp.
    pub completed_at: Option<DateTime<Utc>>,
    /// Persisted latest continuation timestamp.
    pub last_continued_at: Option<DateTime<Utc>>,
    /// Persisted latest mutation timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Creates a new task in the `submitted` state.
    ///
    /// The description becomes the first feedback entry, followed by any
    /// submission-time entries in the order given.
    ///
    /// # Errors
    ///
    /// Returns [`TaskDomainError::EmptyDescription`] when the description is
    /// blank.
    pub fn new(new_task: NewTask, clock: &impl Clock) -> Result<Self, TaskDomainError> {
        let timestamp = clock.utc();
        let description = new_task.description.trim().to_owned();
        if description.is_empty() {
            return Err(TaskDomainError::EmptyDescription);
        }

        let id = TaskId::new();
        let branch = new_task
            .branch
            .unwrap_or_else(|| BranchName::derive(id, &description));
        let initial = FeedbackEntry::new(timestamp, description.clone(), new_task.origin)?;
        let mut feedback_history = Vec::with_capacity(new_task.feedback.len() + 1);
        feedback_history.push(initial);
        for entry in new_task.feedback {
            if !feedback_history.iter().any(|existing| existing.is_same_submission(&entry)) {
                feedback_history.push(entry);
            }
        }

        Ok(Self {
            id,
            description,
            branch,
            mode: new_task.mode,
            status: TaskStatus::Submitted,
            pull_request_ref: None,
            commit_hash: None,
            error_detail: None,
            feedback_history,
            created_at: timestamp,
            branch_created_at: None,
            started_at: None,
            completed_at: None,
            last_continued_at: None,
            updated_at: timestamp,
        })
    }

    /// Reconstructs a task from persisted storage.
    #[must_use]
    pub fn from_persisted(data: PersistedTaskData) -> Self {
        Self {
            id: data.id,
            description: data.description,
            branch: data.branch,
            mode: data.mode,
            status: data.status,
            pull_request_ref: data.pull_request_ref,
            commit_hash: data.commit_hash,
            error_detail: data.error_detail,
            feedback_history: data.feedback_history,
            created_at: data.created_at,
            branch_created_at: data.branch_created_at,
            started_at: data.started_at,
            completed_at: data.completed_at,
            last_continued_at: data.last_continued_at,
            updated_at: data.updated_at,
        }
    }

    /// Returns the task identifier.
    #[must_use]
    pub const fn id(&self) -> TaskId {
        self.id
    }

    /// Returns the immutable task description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Returns the branch bound to this task.
    #[must_use]
    pub const fn branch(&self) -> &BranchName {
        &self.branch
    }

    /// Returns the pull request policy.
    #[must_use]
    pub const fn mode(&self) -> PrMode {
        self.mode
    }

    /// Returns the task lifecycle state.
    #[must_use]
    pub const fn status(&self) -> TaskStatus {
        self.status
    }

    /// Returns the associated pull request reference, if any.
    #[must_use]
    pub const fn pull_request_ref(&self) -> Option<&PullRequestRef> {
        self.pull_request_ref.as_ref()
    }

    /// Returns the most recent commit made for this task, if any.
    #[must_use]
    pub const fn commit_hash(&self) -> Option<&CommitHash> {
        self.commit_hash.as_ref()
    }

    /// Returns the failure detail; present only while `failed`.
    #[must_use]
    pub fn error_detail(&self) -> Option<&str> {
        self.error_detail.as_deref()
    }

    /// Returns the feedback history in append order.
    #[must_use]
    pub fn feedback_history(&self) -> &[FeedbackEntry] {
        &self.feedback_history
    }

    /// Returns the number of entries appended after the initial one.
    #[must_use]
    pub fn continuation_count(&self) -> usize {
        self.feedback_history.len().saturating_sub(1)
    }

    /// Returns the creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns when the branch was first created, if it has been.
    #[must_use]
    pub const fn branch_created_at(&self) -> Option<DateTime<Utc>> {
        self.branch_created_at
    }

    /// Returns when execution first started.
    #[must_use]
    pub const fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// Returns when the task first reached a terminal state.
    #[must_use]
    pub const fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// Returns when the task was last continued.
    #[must_use]
    pub const fn last_continued_at(&self) -> Option<DateTime<Utc>> {
        self.last_continued_at
    }

    /// Returns the latest mutation timestamp.
    #[must_use]
    pub const fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Reports whether the history already holds a resubmission of `entry`.
    #[must_use]
    pub fn has_feedback(&self, entry: &FeedbackEntry) -> bool {
        self.feedback_history
            .iter()
            .any(|existing| existing.is_same_submission(entry))
    }

    /// Moves the task along one edge of the lifecycle graph.
    ///
    /// Entering `branch_created` for the first time records the branch
    /// creation timestamp, entering `running` for the first time records the
    /// start timestamp, and entering `completed` records the completion
    /// timestamp unless a previous run already set it.
    ///
    /// # Errors
    ///
    /// Returns [`TaskDomainError::InvalidStateTransition`] when the edge does
    /// not exist. Use [`Self::fail`] for failures.
    pub fn transition_to(
        &mut self,
        target: TaskStatus,
        clock: &impl Clock,
    ) -> Result<(), TaskDomainError> {
        if target == TaskStatus::Failed || !self.status.can_transition_to(target) {
            return Err(self.invalid_transition(target));
        }

        let timestamp = clock.utc();
        match target {
            TaskStatus::BranchCreated => {
                self.branch_created_at.get_or_insert(timestamp);
            }
            TaskStatus::Running => {
                self.started_at.get_or_insert(timestamp);
            }
            TaskStatus::Completed => {
                self.completed_at.get_or_insert(timestamp);
            }
            _ => {}
        }
        self.status = target;
        self.updated_at = timestamp;
        Ok(())
    }

    /// Moves the task to `failed`, recording `detail` verbatim.
    ///
    /// An empty detail is replaced with a generic message so that failed
    /// tasks always explain themselves.
    ///
    /// # Errors
    ///
    /// Returns [`TaskDomainError::InvalidStateTransition`] when the task is
    /// already terminal.
    pub fn fail(
        &mut self,
        detail: impl Into<String>,
        clock: &impl Clock,
    ) -> Result<(), TaskDomainError> {
        if !self.status.can_transition_to(TaskStatus::Failed) {
            return Err(self.invalid_transition(TaskStatus::Failed));
        }

        let timestamp = clock.utc();
        let raw = detail.into();
        let detail = if raw.trim().is_empty() {
            UNKNOWN_FAILURE_DETAIL.to_owned()
        } else {
            raw
        };
        self.error_detail = Some(detail);
        self.completed_at.get_or_insert(timestamp);
        self.status = TaskStatus::Failed;
        self.updated_at = timestamp;
        Ok(())
    }

    /// Associates the pull request opened by the worker.
    ///
    /// # Errors
    ///
    /// Returns [`TaskDomainError::PullRequestAlreadyAssociated`] when a
    /// different pull request is already set.
    pub fn associate_pull_request(
        &mut self,
        pr_ref: PullRequestRef,
        clock: &impl Clock,
    ) -> Result<(), TaskDomainError> {
        match &self.pull_request_ref {
            Some(existing) if *existing == pr_ref => return Ok(()),
            Some(existing) => {
                return Err(TaskDomainError::PullRequestAlreadyAssociated {
                    task_id: self.id,
                    existing: existing.clone(),
                });
            }
            None => {}
        }
        self.pull_request_ref = Some(pr_ref);
        self.touch(clock);
        Ok(())
    }

    /// Replaces the pull request reference on explicit request.
    pub fn replace_pull_request(&mut self, pr_ref: PullRequestRef, clock: &impl Clock) {
        self.pull_request_ref = Some(pr_ref);
        self.touch(clock);
    }

    /// Records the latest commit pushed for this task.
    pub fn record_commit(&mut self, commit_hash: CommitHash, clock: &impl Clock) {
        self.commit_hash = Some(commit_hash);
        self.touch(clock);
    }

    /// Appends a feedback entry without changing the lifecycle state.
    ///
    /// Returns `false` when the entry is a resubmission and was skipped.
    pub fn append_feedback(&mut self, entry: FeedbackEntry, clock: &impl Clock) -> bool {
        if self.has_feedback(&entry) {
            return false;
        }
        self.feedback_history.push(entry);
        self.touch(clock);
        true
    }

    /// Re-opens a terminal task with a new feedback entry.
    ///
    /// The task re-enters `branch_created`, the error detail is cleared, and
    /// the entry is appended unless it is a resubmission.
    ///
    /// # Errors
    ///
    /// Returns [`TaskDomainError::NotReopenable`] for non-terminal tasks and
    /// [`TaskDomainError::BranchNeverCreated`] when the task failed before
    /// its branch existed.
    pub fn reopen(
        &mut self,
        entry: FeedbackEntry,
        clock: &impl Clock,
    ) -> Result<(), TaskDomainError> {
        if !self.status.is_terminal() {
            return Err(TaskDomainError::NotReopenable {
                task_id: self.id,
                status: self.status,
            });
        }
        if self.branch_created_at.is_none() {
            return Err(TaskDomainError::BranchNeverCreated(self.id));
        }

        let timestamp = clock.utc();
        self.append_feedback(entry, clock);
        self.status = TaskStatus::BranchCreated;
        self.error_detail = None;
        self.last_continued_at = Some(timestamp);
        self.updated_at = timestamp;
        Ok(())
    }

    fn invalid_transition(&self, target: TaskStatus) -> TaskDomainError {
        TaskDomainError::InvalidStateTransition {
            task_id: self.id,
            from: self.status,
            to: target,
        }
    }

    /// Updates the `updated_at` timestamp to the current clock time.
    fn touch(&mut self, clock: &impl Clock) {
        self.updated_at = clock.utc();
    }
}

/// Compact view of a task used by list queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSummary {
    /// Task identifier.
    pub id: TaskId,
    /// First line of the description.
    pub title: String,
    /// Branch bound to the task.
    pub branch: BranchName,
    /// Current state.
    pub status: TaskStatus,
    /// Pull request reference, if any.
    pub pull_request_ref: Option<PullRequestRef>,
    /// Number of continuations.
    pub continuation_count: usize,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl From<&Task> for TaskSummary {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id(),
            title: task
                .description()
                .lines()
                .next()
                .unwrap_or_default()
                .to_owned(),
            branch: task.branch().clone(),
            status: task.status(),
            pull_request_ref: task.pull_request_ref().cloned(),
            continuation_count: task.continuation_count(),
            created_at: task.created_at(),
        }
    }
}
