//! Shared fixtures for orchestrator and worker unit tests.

use crate::task::{
    adapters::memory::{InMemoryExecution, InMemoryPullRequests, InMemoryTaskStore, InMemoryVcs},
    domain::{Task, TaskId},
    services::{Gateways, Orchestrator, OrchestratorSettings},
};
use mockable::DefaultClock;
use std::sync::Arc;
use std::time::Duration;

/// Orchestrator wired to in-memory adapters.
pub type TestOrchestrator = Orchestrator<
    InMemoryTaskStore,
    InMemoryVcs,
    InMemoryExecution,
    InMemoryPullRequests,
    DefaultClock,
>;

/// How long a test waits for background workers.
pub const SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

/// In-memory adapters plus the orchestrator driving them.
pub struct Harness {
    pub store: Arc<InMemoryTaskStore>,
    pub vcs: Arc<InMemoryVcs>,
    pub execution: Arc<InMemoryExecution>,
    pub pull_requests: Arc<InMemoryPullRequests>,
    pub orchestrator: TestOrchestrator,
}

impl Harness {
    pub fn new(settings: OrchestratorSettings) -> Self {
        let store = Arc::new(InMemoryTaskStore::new());
        let vcs = InMemoryVcs::new();
        let execution = Arc::new(InMemoryExecution::linked_to(vcs.clone()));
        let vcs_handle = Arc::new(vcs);
        let pull_requests = Arc::new(InMemoryPullRequests::new());
        let orchestrator = Orchestrator::new(
            Arc::clone(&store),
            Gateways {
                vcs: Arc::clone(&vcs_handle),
                execution: Arc::clone(&execution),
                pull_requests: Arc::clone(&pull_requests),
            },
            Arc::new(DefaultClock),
            settings,
        );
        Self {
            store,
            vcs: vcs_handle,
            execution,
            pull_requests,
            orchestrator,
        }
    }

    /// Waits until the task is terminal and its worker has released it.
    pub async fn settle(&self, id: TaskId) -> Task {
        let poll = async {
            loop {
                let task = self
                    .orchestrator
                    .status(&id.to_string())
                    .await
                    .expect("task exists");
                if task.status().is_terminal() && !self.orchestrator.is_active(id) {
                    return task;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };
        tokio::time::timeout(SETTLE_TIMEOUT, poll)
            .await
            .expect("task settles in time")
    }
}
