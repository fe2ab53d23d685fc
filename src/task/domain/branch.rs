//! Branch-name value object bound to a task for its whole lifetime.

use super::{TaskDomainError, TaskId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum length for a validated branch name.
const MAX_BRANCH_NAME_LENGTH: usize = 200;

/// Maximum number of characters taken from the description when deriving a
/// branch name.
const MAX_SLUG_LENGTH: usize = 40;

/// Prefix for derived branch names.
const DERIVED_BRANCH_PREFIX: &str = "task/";

/// Characters `git check-ref-format` rejects anywhere in a ref name.
const FORBIDDEN_CHARS: [char; 8] = [':', '~', '^', '?', '*', '[', '\\', ' '];

/// Validated Git branch name.
///
/// Branch names must be non-empty after trimming, must follow the subset of
/// `git check-ref-format` rules that matter for branch creation, and must not
/// exceed `MAX_BRANCH_NAME_LENGTH` characters.
///
/// # Examples
///
///     use taskwright::task::domain::BranchName;
///
///     let name = BranchName::new("feature/retry-fetch").expect("valid");
///     assert_eq!(name.as_str(), "feature/retry-fetch");
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BranchName(String);

impl BranchName {
    /// Creates a validated branch name.
    ///
    /// # Errors
    ///
    /// Returns [`TaskDomainError::InvalidBranchName`] when the value is empty,
    /// violates ref-format rules, or exceeds the length limit.
    pub fn new(value: impl Into<String>) -> Result<Self, TaskDomainError> {
        let raw = value.into();
        let normalized = raw.trim();

        if Self::is_invalid_branch_name(normalized) {
            return Err(TaskDomainError::InvalidBranchName(raw));
        }

        Ok(Self(normalized.to_owned()))
    }

    /// Derives the deterministic branch name for a task.
    ///
    /// The name is `task/<slug>-<short id>`, where the slug comes from the
    /// first line of the description. Descriptions without any usable
    /// characters produce `task/<short id>`.
    #[must_use]
    pub fn derive(task_id: TaskId, description: &str) -> Self {
        let slug = slugify(description.lines().next().unwrap_or_default());
        let name = if slug.is_empty() {
            format!("{DERIVED_BRANCH_PREFIX}{}", task_id.short())
        } else {
            format!("{DERIVED_BRANCH_PREFIX}{slug}-{}", task_id.short())
        };
        Self(name)
    }

    /// Validates branch name constraints.
    fn is_invalid_branch_name(name: &str) -> bool {
        let is_empty = name.is_empty();
        let exceeds_length_limit = name.len() > MAX_BRANCH_NAME_LENGTH;
        let contains_forbidden_char = name
            .chars()
            .any(|ch| FORBIDDEN_CHARS.contains(&ch) || ch.is_control() || ch.is_whitespace());
        let has_bad_sequence = name.contains("..") || name.contains("//") || name.contains("@{");
        let has_bad_edges = name.starts_with('/')
            || name.starts_with('-')
            || name.ends_with('/')
            || name.ends_with('.')
            || name.ends_with(".lock");

        is_empty
            || exceeds_length_limit
            || contains_forbidden_char
            || has_bad_sequence
            || has_bad_edges
    }

    /// Returns the branch name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns a filesystem-safe single-segment form of the name.
    #[must_use]
    pub fn to_path_segment(&self) -> String {
        self.0.replace('/', "--")
    }
}

impl AsRef<str> for BranchName {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for BranchName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<&str> for BranchName {
    type Error = TaskDomainError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

/// Lowercases ASCII alphanumerics and collapses everything else to single
/// hyphens.
fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(MAX_SLUG_LENGTH);
    let mut pending_hyphen = false;
    for ch in text.chars() {
        if slug.len() >= MAX_SLUG_LENGTH {
            break;
        }
        if ch.is_ascii_alphanumeric() {
            if pending_hyphen && !slug.is_empty() {
                slug.push('-');
            }
            pending_hyphen = false;
            slug.push(ch.to_ascii_lowercase());
        } else {
            pending_hyphen = true;
        }
    }
    slug.truncate(MAX_SLUG_LENGTH);
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}
