//! Feedback entries forming a task's ordered conversation history.

use super::TaskDomainError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a feedback entry's content came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackOrigin {
    /// Content passed directly on the command line or request body.
    #[default]
    Inline,
    /// Content read from a file.
    File,
    /// Content captured from an interactive editor session.
    Editor,
}

impl FeedbackOrigin {
    /// Returns the canonical storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Inline => "inline",
            Self::File => "file",
            Self::Editor => "editor",
        }
    }
}

impl fmt::Display for FeedbackOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single appended instruction in a task's history.
///
/// Entries are immutable once recorded. Two entries are considered the same
/// submission when both their content and timestamp match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackEntry {
    timestamp: DateTime<Utc>,
    content: String,
    origin: FeedbackOrigin,
}

impl FeedbackEntry {
    /// Creates a feedback entry.
    ///
    /// # Errors
    ///
    /// Returns [`TaskDomainError::EmptyFeedback`] when the content is empty
    /// after trimming.
    pub fn new(
        timestamp: DateTime<Utc>,
        content: impl Into<String>,
        origin: FeedbackOrigin,
    ) -> Result<Self, TaskDomainError> {
        let raw = content.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(TaskDomainError::EmptyFeedback);
        }
        Ok(Self {
            timestamp,
            content: trimmed.to_owned(),
            origin,
        })
    }

    /// Returns when the entry was submitted.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Returns the entry content.
    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Returns where the content came from.
    #[must_use]
    pub const fn origin(&self) -> FeedbackOrigin {
        self.origin
    }

    /// Reports whether `other` is a resubmission of this entry.
    #[must_use]
    pub fn is_same_submission(&self, other: &Self) -> bool {
        self.timestamp == other.timestamp && self.content == other.content
    }
}
