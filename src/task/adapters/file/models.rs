//! Serialized record models for file-backed task persistence.

use crate::task::{
    domain::{
        BranchName, CommitHash, FeedbackEntry, FeedbackOrigin, PersistedTaskData, PrMode,
        PullRequestRef, Task, TaskId, TaskStatus,
    },
    ports::StoreError,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Current on-disk record format version.
pub(super) const RECORD_VERSION: u32 = 1;

/// Envelope written to `tasks/<id>.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(super) struct StoredRecord {
    /// Record format version.
    pub version: u32,
    /// Lowercase hex SHA-256 of the compact JSON encoding of `task`.
    pub digest: String,
    /// Task payload.
    pub task: TaskRecord,
}

/// Flat, primitive representation of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(super) struct TaskRecord {
    pub id: Uuid,
    pub description: String,
    pub branch: String,
    pub mode: String,
    pub status: String,
    pub pull_request_ref: Option<String>,
    pub commit_hash: Option<String>,
    pub error_detail: Option<String>,
    pub feedback_history: Vec<FeedbackRecord>,
    pub created_at: DateTime<Utc>,
    pub branch_created_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_continued_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Serialized feedback entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(super) struct FeedbackRecord {
    pub timestamp: DateTime<Utc>,
    pub content: String,
    pub origin: FeedbackOrigin,
}

/// Secondary index written to `pr_index.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(super) struct PullRequestIndex {
    /// Pull request reference to owning task.
    pub entries: BTreeMap<String, Uuid>,
}

impl StoredRecord {
    /// Wraps a task, computing its digest.
    pub fn seal(task: &Task) -> Result<Self, StoreError> {
        let record = TaskRecord::from(task);
        let digest = digest_of(&record)?;
        Ok(Self {
            version: RECORD_VERSION,
            digest,
            task: record,
        })
    }

    /// Verifies the envelope and rebuilds the task aggregate.
    pub fn open(self, location: &str) -> Result<Task, StoreError> {
        if self.version != RECORD_VERSION {
            return Err(corrupt(
                location,
                format!("unsupported record version {}", self.version),
            ));
        }
        let expected = digest_of(&self.task)?;
        if expected != self.digest {
            return Err(corrupt(location, "record digest mismatch"));
        }
        self.task.into_task(location)
    }
}

impl From<&Task> for TaskRecord {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id().into_inner(),
            description: task.description().to_owned(),
            branch: task.branch().as_str().to_owned(),
            mode: task.mode().as_str().to_owned(),
            status: task.status().as_str().to_owned(),
            pull_request_ref: task.pull_request_ref().map(|pr| pr.as_str().to_owned()),
            commit_hash: task.commit_hash().map(|hash| hash.as_str().to_owned()),
            error_detail: task.error_detail().map(str::to_owned),
            feedback_history: task
                .feedback_history()
                .iter()
                .map(|entry| FeedbackRecord {
                    timestamp: entry.timestamp(),
                    content: entry.content().to_owned(),
                    origin: entry.origin(),
                })
                .collect(),
            created_at: task.created_at(),
            branch_created_at: task.branch_created_at(),
            started_at: task.started_at(),
            completed_at: task.completed_at(),
            last_continued_at: task.last_continued_at(),
            updated_at: task.updated_at(),
        }
    }
}

impl TaskRecord {
    fn into_task(self, location: &str) -> Result<Task, StoreError> {
        let invalid = |err: &dyn std::fmt::Display| corrupt(location, err.to_string());

        let branch = BranchName::new(self.branch).map_err(|err| invalid(&err))?;
        let mode = PrMode::try_from(self.mode.as_str()).map_err(|err| invalid(&err))?;
        let status = TaskStatus::try_from(self.status.as_str()).map_err(|err| invalid(&err))?;
        let pull_request_ref = self
            .pull_request_ref
            .map(PullRequestRef::new)
            .transpose()
            .map_err(|err| invalid(&err))?;
        let commit_hash = self
            .commit_hash
            .map(CommitHash::new)
            .transpose()
            .map_err(|err| invalid(&err))?;
        let feedback_history = self
            .feedback_history
            .into_iter()
            .map(|entry| FeedbackEntry::new(entry.timestamp, entry.content, entry.origin))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| invalid(&err))?;
        if feedback_history.is_empty() {
            return Err(corrupt(location, "feedback history is empty"));
        }

        Ok(Task::from_persisted(PersistedTaskData {
            id: TaskId::from_uuid(self.id),
            description: self.description,
            branch,
            mode,
            status,
            pull_request_ref,
            commit_hash,
            error_detail: self.error_detail,
            feedback_history,
            created_at: self.created_at,
            branch_created_at: self.branch_created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            last_continued_at: self.last_continued_at,
            updated_at: self.updated_at,
        }))
    }
}

fn digest_of(record: &TaskRecord) -> Result<String, StoreError> {
    let bytes = serde_json::to_vec(record).map_err(StoreError::serialization)?;
    Ok(format!("{:x}", Sha256::digest(&bytes)))
}

fn corrupt(location: &str, reason: impl Into<String>) -> StoreError {
    StoreError::Corrupt {
        location: location.to_owned(),
        reason: reason.into(),
    }
}
