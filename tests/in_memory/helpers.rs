//! Shared fixtures for in-memory orchestrator integration tests.

use std::sync::Arc;
use std::time::Duration;

use eyre::{Result, WrapErr, eyre};
use mockable::DefaultClock;
use rstest::fixture;
use taskwright::task::{
    adapters::memory::{InMemoryExecution, InMemoryPullRequests, InMemoryTaskStore, InMemoryVcs},
    domain::{Task, TaskId},
    services::{
        Gateways, Orchestrator, OrchestratorSettings, SubmitTaskRequest, WorkerPolicy,
    },
};

/// Orchestrator wired to the in-memory adapters.
pub type TestOrchestrator = Orchestrator<
    InMemoryTaskStore,
    InMemoryVcs,
    InMemoryExecution,
    InMemoryPullRequests,
    DefaultClock,
>;

/// Upper bound on how long a test waits for background workers.
pub const SETTLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Adapters and the orchestrator driving them.
pub struct Harness {
    pub store: Arc<InMemoryTaskStore>,
    pub vcs: Arc<InMemoryVcs>,
    pub execution: Arc<InMemoryExecution>,
    pub pull_requests: Arc<InMemoryPullRequests>,
    pub orchestrator: TestOrchestrator,
}

impl Harness {
    /// Builds a harness with fresh adapters.
    pub fn new(settings: OrchestratorSettings) -> Self {
        Self::over(Arc::new(InMemoryTaskStore::new()), settings)
    }

    /// Builds a harness whose orchestrator reads an existing store, as a
    /// restarted daemon would.
    pub fn over(store: Arc<InMemoryTaskStore>, settings: OrchestratorSettings) -> Self {
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

    /// Submits `description` with default options and returns the task id.
    ///
    /// # Errors
    ///
    /// Returns an error if the orchestrator rejects the submission.
    pub async fn submit(&self, description: &str) -> Result<TaskId> {
        let response = self
            .orchestrator
            .submit(SubmitTaskRequest::new(description))
            .await
            .wrap_err("submit task")?;
        Ok(response.task_id)
    }

    /// Waits until the task is terminal and no worker holds it.
    ///
    /// # Errors
    ///
    /// Returns an error if the task cannot be read or does not settle in
    /// time.
    pub async fn settle(&self, id: TaskId) -> Result<Task> {
        let poll = async {
            loop {
                let task = self.orchestrator.status(&id.to_string()).await?;
                if task.status().is_terminal() && !self.orchestrator.is_active(id) {
                    return Ok::<_, eyre::Report>(task);
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };
        tokio::time::timeout(SETTLE_TIMEOUT, poll)
            .await
            .map_err(|_| eyre!("task {id} did not settle within {SETTLE_TIMEOUT:?}"))?
    }
}

/// Default settings.
#[fixture]
pub fn harness() -> Harness {
    Harness::new(OrchestratorSettings::default())
}

/// Settings with a short execution ceiling.
pub fn with_timeout(limit: Duration) -> OrchestratorSettings {
    OrchestratorSettings {
        policy: WorkerPolicy {
            execution_timeout: limit,
            ..WorkerPolicy::default()
        },
        ..OrchestratorSettings::default()
    }
}

/// Settings with a custom worker bound.
pub fn with_max_concurrent(max_concurrent_tasks: usize) -> OrchestratorSettings {
    OrchestratorSettings {
        max_concurrent_tasks,
        ..OrchestratorSettings::default()
    }
}
