//! In-memory pull request gateway.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::task::{
    domain::{BranchName, PullRequestRef},
    ports::{
        CreatePullRequest, PullRequestError, PullRequestErrorKind, PullRequestGateway,
        PullRequestResult,
    },
};

/// Base URL of pull requests opened by the fake host.
const PULL_REQUEST_BASE_URL: &str = "https://example.test/acme/widgets/pull";

/// Gateway operation, used to inject failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PullRequestOperation {
    /// [`PullRequestGateway::find_by_branch`].
    FindByBranch,
    /// [`PullRequestGateway::create`].
    Create,
    /// [`PullRequestGateway::mark_ready`].
    MarkReady,
}

/// Fake code host keeping one pull request per branch.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPullRequests {
    state: Arc<Mutex<InMemoryPullRequestState>>,
}

#[derive(Debug, Default)]
struct InMemoryPullRequestState {
    by_branch: HashMap<BranchName, PullRequestRef>,
    created: Vec<CreatePullRequest>,
    ready: HashSet<PullRequestRef>,
    lookups: usize,
    next_number: u64,
    failures: HashMap<PullRequestOperation, VecDeque<PullRequestError>>,
}

impl InMemoryPullRequests {
    /// Creates a host with no pull requests.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a pull request that exists outside the orchestrator.
    pub fn seed(&self, branch: &BranchName, pr_ref: PullRequestRef) {
        self.lock().by_branch.insert(branch.clone(), pr_ref);
    }

    /// Queues a one-shot failure for the next call of `operation`.
    pub fn fail_next(&self, operation: PullRequestOperation, error: PullRequestError) {
        self.lock()
            .failures
            .entry(operation)
            .or_default()
            .push_back(error);
    }

    /// Returns every create request in order.
    #[must_use]
    pub fn created(&self) -> Vec<CreatePullRequest> {
        self.lock().created.clone()
    }

    /// Returns how many branch lookups were made.
    #[must_use]
    pub fn lookups(&self) -> usize {
        self.lock().lookups
    }

    /// Reports whether `pr_ref` was marked ready for review.
    #[must_use]
    pub fn is_ready(&self, pr_ref: &PullRequestRef) -> bool {
        self.lock().ready.contains(pr_ref)
    }

    fn lock(&self) -> MutexGuard<'_, InMemoryPullRequestState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn begin(
        &self,
        operation: PullRequestOperation,
    ) -> PullRequestResult<MutexGuard<'_, InMemoryPullRequestState>> {
        let mut state = self.lock();
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

#[async_trait]
impl PullRequestGateway for InMemoryPullRequests {
    async fn find_by_branch(
        &self,
        branch: &BranchName,
    ) -> PullRequestResult<Option<PullRequestRef>> {
        let mut state = self.begin(PullRequestOperation::FindByBranch)?;
        state.lookups += 1;
        Ok(state.by_branch.get(branch).cloned())
    }

    async fn create(&self, request: &CreatePullRequest) -> PullRequestResult<PullRequestRef> {
        let mut state = self.begin(PullRequestOperation::Create)?;
        if let Some(existing) = state.by_branch.get(&request.branch) {
            return Err(PullRequestError::new(
                PullRequestErrorKind::CommandFailed,
                format!(
                    "a pull request for branch \"{}\" already exists: {existing}",
                    request.branch
                ),
            ));
        }
        state.next_number += 1;
        let url = format!("{PULL_REQUEST_BASE_URL}/{}", state.next_number);
        let pr_ref = PullRequestRef::new(url).map_err(|err| {
            PullRequestError::new(PullRequestErrorKind::UnparseableOutput, err.to_string())
        })?;
        state.by_branch.insert(request.branch.clone(), pr_ref.clone());
        state.created.push(request.clone());
        Ok(pr_ref)
    }

    async fn mark_ready(&self, pr_ref: &PullRequestRef) -> PullRequestResult<()> {
        let mut state = self.begin(PullRequestOperation::MarkReady)?;
        if !state.by_branch.values().any(|known| known == pr_ref) {
            return Err(PullRequestError::new(
                PullRequestErrorKind::NotFound,
                format!("no pull request found for {pr_ref}"),
            ));
        }
        state.ready.insert(pr_ref.clone());
        Ok(())
    }
}
