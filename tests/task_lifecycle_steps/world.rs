//! Shared world state for task lifecycle BDD scenarios.

use std::sync::Arc;
use std::time::Duration;

use eyre::eyre;
use mockable::DefaultClock;
use rstest::fixture;
use taskwright::task::{
    adapters::memory::{InMemoryExecution, InMemoryPullRequests, InMemoryTaskStore, InMemoryVcs},
    domain::{Task, TaskId},
    services::{
        ContinueTaskResponse, Gateways, Orchestrator, OrchestratorError, OrchestratorSettings,
    },
};

/// Orchestrator type used by the BDD world.
pub type TestOrchestrator = Orchestrator<
    InMemoryTaskStore,
    InMemoryVcs,
    InMemoryExecution,
    InMemoryPullRequests,
    DefaultClock,
>;

const SETTLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Scenario world for task lifecycle behaviour tests.
pub struct LifecycleWorld {
    pub vcs: Arc<InMemoryVcs>,
    pub execution: Arc<InMemoryExecution>,
    pub pull_requests: Arc<InMemoryPullRequests>,
    pub orchestrator: TestOrchestrator,
    pub task_id: Option<TaskId>,
    pub last_continuation: Option<Result<ContinueTaskResponse, OrchestratorError>>,
}

impl LifecycleWorld {
    /// Creates a world over fresh in-memory adapters.
    #[must_use]
    pub fn new() -> Self {
        let vcs = InMemoryVcs::new();
        let execution = Arc::new(InMemoryExecution::linked_to(vcs.clone()));
        let vcs_handle = Arc::new(vcs);
        let pull_requests = Arc::new(InMemoryPullRequests::new());
        let orchestrator = Orchestrator::new(
            Arc::new(InMemoryTaskStore::new()),
            Gateways {
                vcs: Arc::clone(&vcs_handle),
                execution: Arc::clone(&execution),
                pull_requests: Arc::clone(&pull_requests),
            },
            Arc::new(DefaultClock),
            OrchestratorSettings::default(),
        );
        Self {
            vcs: vcs_handle,
            execution,
            pull_requests,
            orchestrator,
            task_id: None,
            last_continuation: None,
        }
    }

    /// Returns the id of the task under test.
    ///
    /// # Errors
    ///
    /// Returns an error when no task was submitted yet.
    pub fn task_id(&self) -> Result<TaskId, eyre::Report> {
        self.task_id
            .ok_or_else(|| eyre!("no task submitted in this scenario"))
    }

    /// Reads the current record of the task under test.
    ///
    /// # Errors
    ///
    /// Returns an error when the task cannot be resolved.
    pub fn task(&self) -> Result<Task, eyre::Report> {
        let id = self.task_id()?;
        Ok(run_async(self.orchestrator.status(&id.to_string()))?)
    }

    /// Waits until the task under test is terminal and idle.
    ///
    /// # Errors
    ///
    /// Returns an error when the task does not settle in time.
    pub fn settle(&self) -> Result<Task, eyre::Report> {
        let id = self.task_id()?;
        let poll = async {
            loop {
                let task = self.orchestrator.status(&id.to_string()).await?;
                if task.status().is_terminal() && !self.orchestrator.is_active(id) {
                    return Ok::<_, eyre::Report>(task);
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };
        run_async(tokio::time::timeout(SETTLE_TIMEOUT, poll))
            .map_err(|_| eyre!("task {id} did not settle"))?
    }
}

impl Default for LifecycleWorld {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixture that creates a new scenario world.
#[fixture]
pub fn world() -> LifecycleWorld {
    LifecycleWorld::default()
}

/// Runs an async operation within sync step definitions.
pub fn run_async<T>(future: impl std::future::Future<Output = T>) -> T {
    tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(future))
}
