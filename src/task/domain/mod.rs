//! Domain model for task lifecycle orchestration.
//!
//! The task domain models submission, the branch-to-pull-request state
//! machine, feedback history, and continuation while keeping all
//! infrastructure concerns outside of the domain boundary.

mod branch;
mod error;
mod feedback;
mod ids;
mod pull_request;
mod task;

pub use branch::BranchName;
pub use error::{ParsePrModeError, ParseTaskStatusError, TaskDomainError};
pub use feedback::{FeedbackEntry, FeedbackOrigin};
pub use ids::{CommitHash, MIN_TASK_ID_PREFIX_LEN, TaskId};
pub use pull_request::PullRequestRef;
pub use task::{NewTask, PersistedTaskData, PrMode, Task, TaskStatus, TaskSummary};
