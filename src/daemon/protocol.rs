//! Wire types for the daemon's JSON-lines socket protocol.
//!
//! Each request is one JSON object on its own line, tagged by `action`. Each
//! response is one line tagged by `status`: `ok` carries a `result`, `error`
//! carries `{kind, message}`.

use crate::task::{
    domain::{
        FeedbackEntry, FeedbackOrigin, PrMode, Task, TaskDomainError, TaskId, TaskStatus,
        TaskSummary,
    },
    services::{
        ContinueTaskRequest, ContinueTaskResponse, OrchestratorError, RunOutput,
        SubmitTaskRequest, SubmitTaskResponse,
    },
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A client request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Request {
    /// Submit a new task.
    Submit {
        /// Natural-language goal.
        description: String,
        /// Explicit branch name.
        #[serde(default)]
        branch: Option<String>,
        /// Pull request policy; the daemon default applies when absent.
        #[serde(default)]
        mode: Option<PrMode>,
        /// Where the description came from.
        #[serde(default)]
        origin: FeedbackOrigin,
        /// Additional entries recorded after the description.
        #[serde(default)]
        feedback: Vec<FeedbackInput>,
    },
    /// Continue a finished task with feedback.
    Continue {
        /// Task id, unique id prefix, or pull request reference.
        task: String,
        /// Feedback content.
        content: String,
        /// Where the content came from.
        #[serde(default)]
        origin: FeedbackOrigin,
        /// Client submission time, used to detect resubmissions.
        #[serde(default)]
        timestamp: Option<DateTime<Utc>>,
        /// Replacement pull request reference.
        #[serde(default)]
        pull_request: Option<String>,
    },
    /// Fetch the full record of one task.
    Status {
        /// Task id, unique id prefix, or pull request reference.
        task: String,
    },
    /// List task summaries.
    List {
        /// Only tasks in this state.
        #[serde(default)]
        status: Option<TaskStatus>,
    },
    /// Cancel a running task.
    Cancel {
        /// Task id, unique id prefix, or pull request reference.
        task: String,
    },
    /// Fetch a stored run log.
    Output {
        /// Task id, unique id prefix, or pull request reference.
        task: String,
        /// Run number; the latest run when absent.
        #[serde(default)]
        run: Option<u32>,
    },
    /// Search task descriptions.
    Search {
        /// Case-insensitive substring.
        query: String,
    },
    /// List recent tasks.
    History {
        /// Only tasks bound to this branch.
        #[serde(default)]
        branch: Option<String>,
        /// Maximum number of entries.
        #[serde(default)]
        limit: Option<usize>,
    },
}

/// Feedback supplied with a submission.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct FeedbackInput {
    /// Instruction text.
    pub content: String,
    /// Where the content came from.
    #[serde(default)]
    pub origin: FeedbackOrigin,
    /// Submission time; the daemon clock applies when absent.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl FeedbackInput {
    fn into_entry(self, now: DateTime<Utc>) -> Result<FeedbackEntry, TaskDomainError> {
        FeedbackEntry::new(self.timestamp.unwrap_or(now), self.content, self.origin)
    }
}

/// Builds a submission from the wire fields.
///
/// # Errors
///
/// Returns [`TaskDomainError::EmptyFeedback`] when an extra entry is blank.
pub fn submit_request(
    description: String,
    branch: Option<String>,
    mode: Option<PrMode>,
    origin: FeedbackOrigin,
    feedback: Vec<FeedbackInput>,
    now: DateTime<Utc>,
) -> Result<SubmitTaskRequest, TaskDomainError> {
    let entries = feedback
        .into_iter()
        .map(|input| input.into_entry(now))
        .collect::<Result<Vec<_>, _>>()?;
    let mut request = SubmitTaskRequest::new(description)
        .with_origin(origin)
        .with_feedback(entries);
    if let Some(name) = branch {
        request = request.with_branch(name);
    }
    if let Some(selected) = mode {
        request = request.with_mode(selected);
    }
    Ok(request)
}

/// Builds a continuation from the wire fields.
#[must_use]
pub fn continue_request(
    task: String,
    content: String,
    origin: FeedbackOrigin,
    timestamp: Option<DateTime<Utc>>,
    pull_request: Option<String>,
) -> ContinueTaskRequest {
    let mut request = ContinueTaskRequest::new(task, content).with_origin(origin);
    if let Some(at) = timestamp {
        request = request.with_timestamp(at);
    }
    if let Some(reference) = pull_request {
        request = request.with_pull_request(reference);
    }
    request
}

/// A daemon reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    /// The request succeeded.
    Ok {
        /// Action-specific payload.
        result: Payload,
    },
    /// The request failed.
    Error {
        /// Failure category and message.
        error: ErrorBody,
    },
}

impl Response {
    /// Wraps a successful payload.
    #[must_use]
    pub const fn ok(result: Payload) -> Self {
        Self::Ok { result }
    }

    /// Wraps a failure.
    #[must_use]
    pub const fn error(kind: ErrorKind, message: String) -> Self {
        Self::Error {
            error: ErrorBody { kind, message },
        }
    }
}

impl From<&OrchestratorError> for Response {
    fn from(err: &OrchestratorError) -> Self {
        Self::error(ErrorKind::from(err), err.to_string())
    }
}

/// Successful payloads, one shape per action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    /// Reply to `submit`.
    Submitted(SubmittedView),
    /// Reply to `continue`.
    Continued(ContinuedView),
    /// Reply to `status`.
    Task(Box<TaskView>),
    /// Reply to `list`, `search` and `history`.
    Tasks(Vec<TaskSummary>),
    /// Reply to `cancel`.
    Cancelled(CancelledView),
    /// Reply to `output`.
    Output(OutputView),
}

/// Failure category reported to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// An external tool failed.
    Gateway,
    /// The request conflicts with the task's state.
    Conflict,
    /// No task matched.
    NotFound,
    /// Execution exceeded its ceiling.
    Timeout,
    /// Persistence failed.
    Store,
    /// The request could not be parsed or was rejected by validation.
    InvalidRequest,
}

impl From<&OrchestratorError> for ErrorKind {
    fn from(err: &OrchestratorError) -> Self {
        match err {
            OrchestratorError::Gateway(_) => Self::Gateway,
            OrchestratorError::Conflict(_) => Self::Conflict,
            OrchestratorError::NotFound(_) => Self::NotFound,
            OrchestratorError::Timeout(_) => Self::Timeout,
            OrchestratorError::Store(_) => Self::Store,
            OrchestratorError::Domain(_) => Self::InvalidRequest,
        }
    }
}

/// Error payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Failure category.
    pub kind: ErrorKind,
    /// Human-readable detail.
    pub message: String,
}

/// Reply to `submit`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmittedView {
    /// New task id.
    pub task_id: TaskId,
    /// Bound branch.
    pub branch: String,
    /// Status at reply time.
    pub status: TaskStatus,
}

impl From<SubmitTaskResponse> for SubmittedView {
    fn from(response: SubmitTaskResponse) -> Self {
        Self {
            task_id: response.task_id,
            branch: response.branch.as_str().to_owned(),
            status: response.status,
        }
    }
}

/// Reply to `continue`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContinuedView {
    /// Continued task.
    pub task_id: TaskId,
    /// Status at reply time.
    pub status: TaskStatus,
    /// `false` for resubmissions.
    pub scheduled: bool,
}

impl From<ContinueTaskResponse> for ContinuedView {
    fn from(response: ContinueTaskResponse) -> Self {
        Self {
            task_id: response.task_id,
            status: response.status,
            scheduled: response.scheduled,
        }
    }
}

/// Reply to `cancel`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CancelledView {
    /// Task whose execution was signalled.
    pub task_id: TaskId,
}

/// Reply to `output`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputView {
    /// Task that ran.
    pub task_id: TaskId,
    /// Run number.
    pub run: u32,
    /// Captured output.
    pub log: String,
}

impl From<RunOutput> for OutputView {
    fn from(output: RunOutput) -> Self {
        Self {
            task_id: output.task_id,
            run: output.run,
            log: output.log,
        }
    }
}

/// Full task record as sent to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskView {
    /// Task id.
    pub id: TaskId,
    /// Original description.
    pub description: String,
    /// Bound branch.
    pub branch: String,
    /// Pull request policy.
    pub mode: PrMode,
    /// Current state.
    pub status: TaskStatus,
    /// Pull request reference.
    pub pull_request: Option<String>,
    /// Latest commit.
    pub commit: Option<String>,
    /// Failure detail while failed.
    pub error_detail: Option<String>,
    /// Feedback history in append order.
    pub feedback: Vec<FeedbackView>,
    /// Number of continuations.
    pub continuation_count: usize,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// First branch creation.
    pub branch_created_at: Option<DateTime<Utc>>,
    /// First execution start.
    pub started_at: Option<DateTime<Utc>>,
    /// First terminal state.
    pub completed_at: Option<DateTime<Utc>>,
    /// Latest continuation.
    pub last_continued_at: Option<DateTime<Utc>>,
    /// Latest mutation.
    pub updated_at: DateTime<Utc>,
}

/// One feedback entry as sent to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedbackView {
    /// Submission time.
    pub timestamp: DateTime<Utc>,
    /// Instruction text.
    pub content: String,
    /// Where the content came from.
    pub origin: FeedbackOrigin,
}

impl From<&Task> for TaskView {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id(),
            description: task.description().to_owned(),
            branch: task.branch().as_str().to_owned(),
            mode: task.mode(),
            status: task.status(),
            pull_request: task.pull_request_ref().map(ToString::to_string),
            commit: task.commit_hash().map(ToString::to_string),
            error_detail: task.error_detail().map(str::to_owned),
            feedback: task
                .feedback_history()
                .iter()
                .map(|entry| FeedbackView {
                    timestamp: entry.timestamp(),
                    content: entry.content().to_owned(),
                    origin: entry.origin(),
                })
                .collect(),
            continuation_count: task.continuation_count(),
            created_at: task.created_at(),
            branch_created_at: task.branch_created_at(),
            started_at: task.started_at(),
            completed_at: task.completed_at(),
            last_continued_at: task.last_continued_at(),
            updated_at: task.updated_at(),
        }
    }
}
