//! In-memory version-control gateway that records every call.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::task::{
    domain::{BranchName, CommitHash},
    ports::{VcsError, VcsErrorKind, VcsResult, VersionControlGateway},
};

/// Gateway operation, used to inspect calls and inject failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VcsOperation {
    /// [`VersionControlGateway::create_and_push_branch`].
    CreateAndPushBranch,
    /// [`VersionControlGateway::checkout_and_pull`].
    CheckoutAndPull,
    /// [`VersionControlGateway::has_uncommitted_changes`].
    HasUncommittedChanges,
    /// [`VersionControlGateway::commit_all`].
    CommitAll,
    /// [`VersionControlGateway::push`].
    Push,
}

/// A recorded gateway call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VcsCall {
    /// Operation invoked.
    pub operation: VcsOperation,
    /// Branch the operation targeted.
    pub branch: BranchName,
    /// Commit message, for [`VcsOperation::CommitAll`].
    pub message: Option<String>,
}

/// Thread-safe fake repository.
///
/// Branches live in a set, working trees are either clean or dirty, and
/// commits produce sequential hexadecimal hashes.
#[derive(Debug, Clone, Default)]
pub struct InMemoryVcs {
    state: Arc<Mutex<InMemoryVcsState>>,
}

#[derive(Debug, Default)]
struct InMemoryVcsState {
    branches: HashSet<BranchName>,
    dirty: HashSet<BranchName>,
    commits: HashMap<BranchName, Vec<CommitHash>>,
    next_commit: u64,
    calls: Vec<VcsCall>,
    failures: HashMap<VcsOperation, VecDeque<VcsError>>,
}

impl InMemoryVcs {
    /// Creates an empty fake repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a branch as already existing on the remote.
    pub fn seed_branch(&self, branch: &BranchName) {
        self.lock().branches.insert(branch.clone());
    }

    /// Marks the branch's working tree as modified.
    pub fn mark_dirty(&self, branch: &BranchName) {
        self.lock().dirty.insert(branch.clone());
    }

    /// Queues a one-shot failure for the next call of `operation`.
    pub fn fail_next(&self, operation: VcsOperation, error: VcsError) {
        self.lock()
            .failures
            .entry(operation)
            .or_default()
            .push_back(error);
    }

    /// Returns every recorded call in order.
    #[must_use]
    pub fn calls(&self) -> Vec<VcsCall> {
        self.lock().calls.clone()
    }

    /// Returns how many times `operation` was called.
    #[must_use]
    pub fn call_count(&self, operation: VcsOperation) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| call.operation == operation)
            .count()
    }

    /// Reports whether the branch exists.
    #[must_use]
    pub fn has_branch(&self, branch: &BranchName) -> bool {
        self.lock().branches.contains(branch)
    }

    /// Returns the commits made on `branch`, oldest first.
    #[must_use]
    pub fn commits(&self, branch: &BranchName) -> Vec<CommitHash> {
        self.lock()
            .commits
            .get(branch)
            .cloned()
            .unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, InMemoryVcsState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Records the call and pops any injected failure for it.
    fn begin(
        &self,
        operation: VcsOperation,
        branch: &BranchName,
        message: Option<&str>,
    ) -> VcsResult<MutexGuard<'_, InMemoryVcsState>> {
        let mut state = self.lock();
        state.calls.push(VcsCall {
            operation,
            branch: branch.clone(),
            message: message.map(str::to_owned),
        });
        if let Some(error) = state
            .failures
            .get_mut(&operation)
            .and_then(VecDeque::pop_front)
        {
            return Err(error);
        }
        Ok(state)
    }
}

fn missing_branch(branch: &BranchName) -> VcsError {
    VcsError::new(
        VcsErrorKind::CommandFailed,
        format!("branch '{branch}' does not exist"),
    )
}

#[async_trait]
impl VersionControlGateway for InMemoryVcs {
    async fn create_and_push_branch(&self, branch: &BranchName) -> VcsResult<()> {
        let mut state = self.begin(VcsOperation::CreateAndPushBranch, branch, None)?;
        if !state.branches.insert(branch.clone()) {
            return Err(VcsError::new(
                VcsErrorKind::BranchExists,
                format!("a branch named '{branch}' already exists"),
            ));
        }
        Ok(())
    }

    async fn checkout_and_pull(&self, branch: &BranchName) -> VcsResult<()> {
        let state = self.begin(VcsOperation::CheckoutAndPull, branch, None)?;
        if !state.branches.contains(branch) {
            return Err(missing_branch(branch));
        }
        Ok(())
    }

    async fn has_uncommitted_changes(&self, branch: &BranchName) -> VcsResult<bool> {
        let state = self.begin(VcsOperation::HasUncommittedChanges, branch, None)?;
        Ok(state.dirty.contains(branch))
    }

    async fn commit_all(&self, branch: &BranchName, message: &str) -> VcsResult<CommitHash> {
        let mut state = self.begin(VcsOperation::CommitAll, branch, Some(message))?;
        if !state.branches.contains(branch) {
            return Err(missing_branch(branch));
        }
        if !state.dirty.remove(branch) {
            return Err(VcsError::new(
                VcsErrorKind::CommandFailed,
                "nothing to commit, working tree clean",
            ));
        }
        state.next_commit += 1;
        let hash = CommitHash::new(format!("{:040x}", state.next_commit))
            .map_err(|err| VcsError::new(VcsErrorKind::CommandFailed, err.to_string()))?;
        state
            .commits
            .entry(branch.clone())
            .or_default()
            .push(hash.clone());
        Ok(hash)
    }

    async fn push(&self, branch: &BranchName) -> VcsResult<()> {
        let state = self.begin(VcsOperation::Push, branch, None)?;
        if !state.branches.contains(branch) {
            return Err(missing_branch(branch));
        }
        Ok(())
    }
}
