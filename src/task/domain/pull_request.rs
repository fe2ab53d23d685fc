//! Pull-request reference value object.

use super::TaskDomainError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum length for a stored pull request reference.
const MAX_PULL_REQUEST_REF_LENGTH: usize = 512;

/// Handle to a pull request on the code-hosting service.
///
/// The handle is either the pull request URL reported by the hosting CLI or
/// a bare pull request number. Trailing slashes are removed and a leading
/// `#` on numbers is dropped so that the same pull request always maps to
/// the same index key.
///
/// # Examples
///
///     use taskwright::task::domain::PullRequestRef;
///
///     let pr = PullRequestRef::new("https://github.com/acme/widgets/pull/42/")
///         .expect("valid PR ref");
///     assert_eq!(pr.as_str(), "https://github.com/acme/widgets/pull/42");
///     assert_eq!(pr.number(), Some(42));
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PullRequestRef(String);

impl PullRequestRef {
    /// Creates a normalized pull request reference.
    ///
    /// # Errors
    ///
    /// Returns [`TaskDomainError::InvalidPullRequestRef`] when the value is
    /// empty, contains whitespace, or exceeds the length limit.
    pub fn new(value: impl Into<String>) -> Result<Self, TaskDomainError> {
        let raw = value.into();
        let trimmed = raw.trim().trim_end_matches('/');
        let normalized = trimmed.strip_prefix('#').unwrap_or(trimmed);

        let is_invalid = normalized.is_empty()
            || normalized.len() > MAX_PULL_REQUEST_REF_LENGTH
            || normalized.chars().any(char::is_whitespace);
        if is_invalid {
            return Err(TaskDomainError::InvalidPullRequestRef(raw));
        }

        Ok(Self(normalized.to_owned()))
    }

    /// Returns the canonical reference string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Extracts the pull request number.
    ///
    /// Bare numbers are returned directly; URLs of the form
    /// `…/pull/<number>` yield the trailing number.
    #[must_use]
    pub fn number(&self) -> Option<u64> {
        if let Ok(number) = self.0.parse::<u64>() {
            return Some(number);
        }
        let (prefix, number) = self.0.rsplit_once('/')?;
        if !prefix.ends_with("/pull") {
            return None;
        }
        number.parse().ok()
    }

    /// Reports whether this reference is a URL rather than a bare number.
    #[must_use]
    pub fn is_url(&self) -> bool {
        self.0.starts_with("http://") || self.0.starts_with("https://")
    }
}

impl AsRef<str> for PullRequestRef {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for PullRequestRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<&str> for PullRequestRef {
    type Error = TaskDomainError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}
