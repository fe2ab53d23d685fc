//! Request and response payloads for the orchestrator.

use crate::task::domain::{
    BranchName, FeedbackEntry, FeedbackOrigin, PrMode, PullRequestRef, TaskDomainError, TaskId,
    TaskStatus,
};
use chrono::{DateTime, Utc};

/// Request to submit a new task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitTaskRequest {
    description: String,
    branch: Option<String>,
    mode: Option<PrMode>,
    origin: FeedbackOrigin,
    feedback: Vec<FeedbackEntry>,
}

impl SubmitTaskRequest {
    /// Creates a request with a description and default options.
    #[must_use]
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            branch: None,
            mode: None,
            origin: FeedbackOrigin::Inline,
            feedback: Vec::new(),
        }
    }

    /// Uses an explicit branch name instead of deriving one.
    #[must_use]
    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    /// Sets the pull request policy; the orchestrator default applies
    /// otherwise.
    #[must_use]
    pub const fn with_mode(mut self, mode: PrMode) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Records where the description came from.
    #[must_use]
    pub const fn with_origin(mut self, origin: FeedbackOrigin) -> Self {
        self.origin = origin;
        self
    }

    /// Adds feedback entries recorded after the description.
    #[must_use]
    pub fn with_feedback(mut self, feedback: impl IntoIterator<Item = FeedbackEntry>) -> Self {
        self.feedback.extend(feedback);
        self
    }

    /// Returns the description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Returns the explicit branch, if any.
    #[must_use]
    pub fn branch(&self) -> Option<&str> {
        self.branch.as_deref()
    }

    /// Returns the requested mode, if any.
    #[must_use]
    pub const fn mode(&self) -> Option<PrMode> {
        self.mode
    }

    /// Returns the description origin.
    #[must_use]
    pub const fn origin(&self) -> FeedbackOrigin {
        self.origin
    }

    pub(crate) fn into_feedback(self) -> Vec<FeedbackEntry> {
        self.feedback
    }
}

/// Response to a successful submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitTaskResponse {
    /// New task identifier.
    pub task_id: TaskId,
    /// Branch bound to the task.
    pub branch: BranchName,
    /// Status at the time of the response.
    pub status: TaskStatus,
}

/// Request to continue a finished task with new feedback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContinueTaskRequest {
    identifier: String,
    content: String,
    origin: FeedbackOrigin,
    timestamp: Option<DateTime<Utc>>,
    pull_request: Option<String>,
}

impl ContinueTaskRequest {
    /// Creates a continuation for the task matched by `identifier`.
    ///
    /// The identifier may be a task id, a unique id prefix or a pull request
    /// reference.
    #[must_use]
    pub fn new(identifier: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            content: content.into(),
            origin: FeedbackOrigin::Inline,
            timestamp: None,
            pull_request: None,
        }
    }

    /// Records where the feedback came from.
    #[must_use]
    pub const fn with_origin(mut self, origin: FeedbackOrigin) -> Self {
        self.origin = origin;
        self
    }

    /// Uses the client's submission timestamp for idempotent retries.
    #[must_use]
    pub const fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Replaces the task's pull request reference.
    #[must_use]
    pub fn with_pull_request(mut self, pull_request: impl Into<String>) -> Self {
        self.pull_request = Some(pull_request.into());
        self
    }

    /// Returns the task identifier as supplied.
    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Returns the feedback content.
    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Returns the feedback origin.
    #[must_use]
    pub const fn origin(&self) -> FeedbackOrigin {
        self.origin
    }

    /// Returns the client timestamp, if any.
    #[must_use]
    pub const fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp
    }

    /// Returns the pull request override, if any.
    #[must_use]
    pub fn pull_request(&self) -> Option<&str> {
        self.pull_request.as_deref()
    }

    pub(crate) fn parsed_pull_request(&self) -> Result<Option<PullRequestRef>, TaskDomainError> {
        self.pull_request
            .as_deref()
            .map(PullRequestRef::new)
            .transpose()
    }
}

/// Response to a continuation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContinueTaskResponse {
    /// Task that received the feedback.
    pub task_id: TaskId,
    /// Status at the time of the response.
    pub status: TaskStatus,
    /// `false` when the feedback was a resubmission and nothing was
    /// scheduled.
    pub scheduled: bool,
}
