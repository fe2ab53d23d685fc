//! Daemon core: accepts submissions and continuations, answers queries, and
//! runs one bounded worker per active task.

use super::{
    error::{ConflictError, NotFoundError, OrchestratorError, OrchestratorResult},
    registry::{ActiveTasks, TaskClaim},
    requests::{ContinueTaskRequest, ContinueTaskResponse, SubmitTaskRequest, SubmitTaskResponse},
    templates::TaskTemplates,
    worker::{TaskEvent, TaskWorker, WorkerPolicy},
};
use crate::task::{
    domain::{
        BranchName, FeedbackEntry, MIN_TASK_ID_PREFIX_LEN, NewTask, PrMode, PullRequestRef, Task,
        TaskId, TaskStatus, TaskSummary,
    },
    ports::{ExecutionGateway, PullRequestGateway, TaskStore, VersionControlGateway},
};
use chrono::{DateTime, Utc};
use mockable::Clock;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore, broadcast};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, info, warn};

/// Default bound on concurrently running workers.
pub const DEFAULT_MAX_CONCURRENT_TASKS: usize = 3;

/// Detail recorded on tasks found mid-flight after a restart.
pub const INTERRUPTED_BY_RESTART: &str =
    "interrupted by restart; submit a continuation to resume the task";

/// Detail recorded on non-terminal tasks whose worker is gone when a
/// continuation arrives.
pub const WORKER_STOPPED: &str =
    "worker stopped before the task finished; resumed by continuation";

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Tunables for the orchestrator and its workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorSettings {
    /// Maximum number of workers past their queueing point.
    pub max_concurrent_tasks: usize,
    /// Pull request policy for submissions that do not name one.
    pub default_mode: PrMode,
    /// Behaviour applied by every worker.
    pub policy: WorkerPolicy,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: DEFAULT_MAX_CONCURRENT_TASKS,
            default_mode: PrMode::default(),
            policy: WorkerPolicy::default(),
        }
    }
}

/// The three external collaborators driven by workers.
#[derive(Debug)]
pub struct Gateways<V, E, P> {
    /// Version-control gateway.
    pub vcs: Arc<V>,
    /// Execution environment gateway.
    pub execution: Arc<E>,
    /// Code-hosting gateway.
    pub pull_requests: Arc<P>,
}

/// Log of one execution run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutput {
    /// Task that ran.
    pub task_id: TaskId,
    /// One-based run number.
    pub run: u32,
    /// Output captured from the execution environment.
    pub log: String,
}

/// Tasks touched by [`Orchestrator::recover`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Tasks found in `submitted` and queued again.
    pub requeued: Vec<TaskId>,
    /// Tasks found mid-flight and marked failed.
    pub interrupted: Vec<TaskId>,
}

/// Task lifecycle orchestrator.
///
/// Request handling never waits on a gateway: workers run on spawned tasks
/// gated by a semaphore, and only the per-task claim decides whether a task
/// accepts new work.
pub struct Orchestrator<S, V, E, P, C> {
    worker: TaskWorker<S, V, E, P, C>,
    active: ActiveTasks,
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
    submissions: Mutex<()>,
    default_mode: PrMode,
}

impl<S, V, E, P, C> Orchestrator<S, V, E, P, C>
where
    S: TaskStore + 'static,
    V: VersionControlGateway + 'static,
    E: ExecutionGateway + 'static,
    P: PullRequestGateway + 'static,
    C: Clock + Send + Sync + 'static,
{
    /// Creates an orchestrator over `store` and `gateways`.
    #[must_use]
    pub fn new(
        store: Arc<S>,
        gateways: Gateways<V, E, P>,
        clock: Arc<C>,
        settings: OrchestratorSettings,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let worker = TaskWorker {
            store,
            vcs: gateways.vcs,
            execution: gateways.execution,
            pull_requests: gateways.pull_requests,
            clock,
            templates: Arc::new(TaskTemplates::new()),
            events,
            policy: settings.policy,
            shutdown: CancellationToken::new(),
        };
        Self {
            worker,
            active: ActiveTasks::default(),
            permits: Arc::new(Semaphore::new(settings.max_concurrent_tasks.max(1))),
            tracker: TaskTracker::new(),
            submissions: Mutex::new(()),
            default_mode: settings.default_mode,
        }
    }

    /// Subscribes to lifecycle events published after each persisted change.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.worker.events.subscribe()
    }

    /// Returns the orchestrator clock's current time.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.worker.clock.utc()
    }

    /// Reports whether `id` currently owns a worker.
    #[must_use]
    pub fn is_active(&self, id: TaskId) -> bool {
        self.active.is_active(id)
    }

    /// Returns the number of tasks that currently own a worker.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Accepts a new task and queues its worker.
    ///
    /// The task is persisted in `submitted` before this returns; the worker
    /// starts once a concurrency permit is free.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Domain`] for an empty description or an
    /// invalid branch, [`ConflictError::BranchInUse`] when another task owns
    /// the requested branch, and [`OrchestratorError::Store`] when the record
    /// cannot be written.
    pub async fn submit(
        &self,
        request: SubmitTaskRequest,
    ) -> OrchestratorResult<SubmitTaskResponse> {
        self.ensure_accepting()?;
        let branch = request.branch().map(BranchName::new).transpose()?;
        let mode = request.mode().unwrap_or(self.default_mode);
        let new_task = NewTask {
            description: request.description().to_owned(),
            branch,
            mode,
            origin: request.origin(),
            feedback: request.into_feedback(),
        };
        let task = Task::new(new_task, &*self.worker.clock)?;

        let guard = self.submissions.lock().await;
        self.ensure_branch_free(&task).await?;
        let claim = self.claim(&task)?;
        self.worker.store.put(&task).await?;
        drop(guard);

        info!(task_id = %task.id(), branch = %task.branch(), mode = %mode, "task submitted");
        self.worker.publish(&task, None);
        let response = SubmitTaskResponse {
            task_id: task.id(),
            branch: task.branch().clone(),
            status: task.status(),
        };
        self.spawn(task, claim, false);
        Ok(response)
    }

    /// Appends feedback to a finished task and runs it again.
    ///
    /// A resubmission of an entry already in the history returns the current
    /// status with `scheduled: false` and changes nothing. A task left
    /// non-terminal with no worker is failed with [`WORKER_STOPPED`] first.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::NotFound`] when no task matches,
    /// [`ConflictError::TaskActive`] when the task has a worker, and
    /// [`ConflictError::BranchNeverCreated`] when the task failed before its
    /// branch existed.
    pub async fn continue_task(
        &self,
        request: ContinueTaskRequest,
    ) -> OrchestratorResult<ContinueTaskResponse> {
        self.ensure_accepting()?;
        let resolved = self.resolve(request.identifier()).await?;
        let timestamp = request
            .timestamp()
            .unwrap_or_else(|| self.worker.clock.utc());
        let entry = FeedbackEntry::new(timestamp, request.content(), request.origin())?;
        let pr_override = request.parsed_pull_request()?;
        if resolved.has_feedback(&entry) {
            return Ok(unscheduled(&resolved));
        }

        let Some(claim) = self.active.try_claim(resolved.id(), &self.worker.shutdown) else {
            return Err(ConflictError::TaskActive {
                task_id: resolved.id(),
                status: resolved.status(),
            }
            .into());
        };
        let mut task = self
            .worker
            .store
            .get(resolved.id())
            .await?
            .ok_or(NotFoundError::Task(resolved.id()))?;
        if task.has_feedback(&entry) {
            return Ok(unscheduled(&task));
        }

        let guard = self.submissions.lock().await;
        if let Some(pr_ref) = &pr_override {
            self.ensure_pull_request_free(task.id(), pr_ref).await?;
        }
        if !task.status().is_terminal() {
            self.fail_stalled(&mut task).await?;
        }
        let previous = task.status();
        task.reopen(entry, &*self.worker.clock)?;
        if let Some(pr_ref) = pr_override {
            task.replace_pull_request(pr_ref, &*self.worker.clock);
        }
        self.worker.store.put(&task).await?;
        drop(guard);
        info!(
            task_id = %task.id(),
            continuation = task.continuation_count(),
            "task continued"
        );
        self.worker.publish(&task, Some(previous));

        let response = ContinueTaskResponse {
            task_id: task.id(),
            status: task.status(),
            scheduled: true,
        };
        self.spawn(task, claim, true);
        Ok(response)
    }

    /// Returns the full record of the task matched by `identifier`.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::NotFound`] or
    /// [`ConflictError::AmbiguousTaskPrefix`] when the identifier does not
    /// select exactly one task.
    pub async fn status(&self, identifier: &str) -> OrchestratorResult<Task> {
        self.resolve(identifier).await
    }

    /// Lists task summaries, newest first, optionally filtered by state.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Store`] when the store cannot be read.
    pub async fn list(&self, status: Option<TaskStatus>) -> OrchestratorResult<Vec<TaskSummary>> {
        let tasks = self.worker.store.list(status).await?;
        Ok(tasks.iter().map(TaskSummary::from).collect())
    }

    /// Lists tasks whose description contains `query`, ignoring case.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Store`] when the store cannot be read.
    pub async fn search(&self, query: &str) -> OrchestratorResult<Vec<TaskSummary>> {
        let needle = query.trim().to_lowercase();
        let tasks = self.worker.store.list(None).await?;
        Ok(tasks
            .iter()
            .filter(|task| task.description().to_lowercase().contains(&needle))
            .map(TaskSummary::from)
            .collect())
    }

    /// Lists recent tasks, newest first, optionally for one branch.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Store`] when the store cannot be read.
    pub async fn history(
        &self,
        branch: Option<&str>,
        limit: Option<usize>,
    ) -> OrchestratorResult<Vec<TaskSummary>> {
        let tasks = self.worker.store.list(None).await?;
        Ok(tasks
            .iter()
            .filter(|task| branch.is_none_or(|name| task.branch().as_str() == name.trim()))
            .take(limit.unwrap_or(usize::MAX))
            .map(TaskSummary::from)
            .collect())
    }

    /// Returns the stored log of `run`, or of the latest run when `None`.
    ///
    /// # Errors
    ///
    /// Returns [`NotFoundError::Output`] when no log exists for the run.
    pub async fn output(
        &self,
        identifier: &str,
        run: Option<u32>,
    ) -> OrchestratorResult<RunOutput> {
        let task = self.resolve(identifier).await?;
        let task_id = task.id();
        let requested = match run {
            Some(number) => number,
            None => self
                .worker
                .store
                .latest_log_run(task_id)
                .await?
                .ok_or(NotFoundError::Output { task_id, run: 1 })?,
        };
        let log = self
            .worker
            .store
            .read_log(task_id, requested)
            .await?
            .ok_or(NotFoundError::Output {
                task_id,
                run: requested,
            })?;
        Ok(RunOutput {
            task_id,
            run: requested,
            log,
        })
    }

    /// Aborts the execution step of a running task.
    ///
    /// The worker records the cancellation and moves the task to `failed`.
    ///
    /// # Errors
    ///
    /// Returns [`ConflictError::NotCancellable`] unless the task is inside
    /// its execution step.
    pub async fn cancel(&self, identifier: &str) -> OrchestratorResult<TaskId> {
        let task = self.resolve(identifier).await?;
        if self.active.cancel_execution(task.id()) {
            info!(task_id = %task.id(), "cancellation requested");
            return Ok(task.id());
        }
        Err(ConflictError::NotCancellable {
            task_id: task.id(),
            status: task.status(),
        }
        .into())
    }

    /// Deletes a finished task together with its logs and index entry.
    ///
    /// # Errors
    ///
    /// Returns [`ConflictError::NotPurgeable`] while the task is active or
    /// not terminal.
    pub async fn purge(&self, identifier: &str) -> OrchestratorResult<TaskId> {
        let task = self.resolve(identifier).await?;
        let not_purgeable = || ConflictError::NotPurgeable {
            task_id: task.id(),
            status: task.status(),
        };
        if !task.status().is_terminal() {
            return Err(not_purgeable().into());
        }
        let Some(claim) = self.active.try_claim(task.id(), &self.worker.shutdown) else {
            return Err(not_purgeable().into());
        };
        let removed = self.worker.store.delete(task.id()).await?;
        drop(claim);
        if !removed {
            return Err(NotFoundError::Task(task.id()).into());
        }
        info!(task_id = %task.id(), "task purged");
        Ok(task.id())
    }

    /// Reconciles persisted tasks after a restart.
    ///
    /// Tasks still in `submitted` are queued again, oldest first. Tasks
    /// persisted mid-flight lost their worker and are marked failed so they
    /// can be continued explicitly.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Store`] when the store cannot be read or
    /// a failure cannot be recorded.
    pub async fn recover(&self) -> OrchestratorResult<RecoveryReport> {
        let mut report = RecoveryReport::default();
        let mut tasks = self.worker.store.list(None).await?;
        tasks.reverse();
        for mut task in tasks {
            let status = task.status();
            if status.is_terminal() {
                continue;
            }
            let Some(claim) = self.active.try_claim(task.id(), &self.worker.shutdown) else {
                debug!(task_id = %task.id(), "task already has a worker; skipping recovery");
                continue;
            };
            if status == TaskStatus::Submitted {
                info!(task_id = %task.id(), "requeueing submitted task");
                report.requeued.push(task.id());
                self.spawn(task, claim, false);
                continue;
            }
            task.fail(INTERRUPTED_BY_RESTART, &*self.worker.clock)?;
            self.worker.store.put(&task).await?;
            warn!(task_id = %task.id(), from = %status, "task interrupted by restart");
            self.worker.publish(&task, Some(status));
            report.interrupted.push(task.id());
        }
        Ok(report)
    }

    /// Stops accepting work, cancels running executions and waits for every
    /// worker to finish.
    ///
    /// Workers still queued for a permit exit without touching their task,
    /// which stays `submitted` for the next [`Self::recover`].
    pub async fn shutdown(&self) {
        info!(active = self.active.len(), "orchestrator shutting down");
        self.worker.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        info!("orchestrator stopped");
    }

    fn ensure_accepting(&self) -> OrchestratorResult<()> {
        if self.worker.shutdown.is_cancelled() {
            return Err(ConflictError::ShuttingDown.into());
        }
        Ok(())
    }

    fn claim(&self, task: &Task) -> OrchestratorResult<TaskClaim> {
        self.active
            .try_claim(task.id(), &self.worker.shutdown)
            .ok_or_else(|| {
                ConflictError::TaskActive {
                    task_id: task.id(),
                    status: task.status(),
                }
                .into()
            })
    }

    async fn ensure_branch_free(&self, task: &Task) -> OrchestratorResult<()> {
        let tasks = self.worker.store.list(None).await?;
        tasks
            .iter()
            .find(|other| other.branch() == task.branch())
            .map_or(Ok(()), |owner| {
                Err(ConflictError::BranchInUse {
                    branch: task.branch().clone(),
                    owner: owner.id(),
                }
                .into())
            })
    }

    /// Fails a non-terminal task that the caller holds the claim for.
    async fn fail_stalled(&self, task: &mut Task) -> OrchestratorResult<()> {
        let status = task.status();
        task.fail(WORKER_STOPPED, &*self.worker.clock)?;
        self.worker.store.put(task).await?;
        warn!(task_id = %task.id(), from = %status, "stalled task failed before continuing");
        self.worker.publish(task, Some(status));
        Ok(())
    }

    async fn ensure_pull_request_free(
        &self,
        task_id: TaskId,
        pr_ref: &PullRequestRef,
    ) -> OrchestratorResult<()> {
        match self.worker.store.find_by_pr_ref(pr_ref).await? {
            Some(owner) if owner.id() != task_id => Err(ConflictError::PullRequestInUse {
                pull_request: pr_ref.clone(),
                owner: owner.id(),
            }
            .into()),
            _ => Ok(()),
        }
    }

    /// Finds the task named by a full id, a pull request reference or
    /// number, or a unique id prefix.
    async fn resolve(&self, identifier: &str) -> OrchestratorResult<Task> {
        let trimmed = identifier.trim();
        if let Ok(id) = TaskId::parse(trimmed) {
            return self
                .worker
                .store
                .get(id)
                .await?
                .ok_or_else(|| NotFoundError::Task(id).into());
        }

        let pr_ref = PullRequestRef::new(trimmed).ok();
        if let Some(reference) = &pr_ref {
            if let Some(task) = self.worker.store.find_by_pr_ref(reference).await? {
                return Ok(task);
            }
        }

        let tasks = self.worker.store.list(None).await?;
        let bare_number = pr_ref
            .as_ref()
            .filter(|reference| !reference.is_url())
            .and_then(PullRequestRef::number);
        if let Some(number) = bare_number {
            let by_number = tasks.iter().find(|task| {
                task.pull_request_ref()
                    .and_then(PullRequestRef::number)
                    .is_some_and(|candidate| candidate == number)
            });
            if let Some(task) = by_number {
                return Ok(task.clone());
            }
        }

        if trimmed.len() < MIN_TASK_ID_PREFIX_LEN {
            return Err(NotFoundError::Identifier(trimmed.to_owned()).into());
        }
        let mut matches: Vec<Task> = tasks
            .into_iter()
            .filter(|task| task.id().matches_prefix(trimmed))
            .collect();
        match matches.len() {
            0 => Err(NotFoundError::Identifier(trimmed.to_owned()).into()),
            1 => matches
                .pop()
                .ok_or_else(|| NotFoundError::Identifier(trimmed.to_owned()).into()),
            count => Err(ConflictError::AmbiguousTaskPrefix {
                prefix: trimmed.to_owned(),
                matches: count,
            }
            .into()),
        }
    }

    /// Queues the worker for `task`; it starts once a permit is free.
    fn spawn(&self, task: Task, claim: TaskClaim, continuation: bool) {
        let worker = self.worker.clone();
        let permits = Arc::clone(&self.permits);
        self.tracker.spawn(async move {
            let task_id = claim.id();
            let acquired = tokio::select! {
                biased;
                () = claim.token().cancelled() => {
                    debug!(task_id = %task_id, "shutdown before worker started");
                    return;
                }
                permit = permits.acquire_owned() => permit,
            };
            let Ok(_permit) = acquired else {
                warn!(task_id = %task_id, "worker permits closed");
                return;
            };
            match worker.run(task, &claim, continuation).await {
                Ok(finished) => {
                    debug!(task_id = %task_id, status = %finished.status(), "worker finished");
                }
                Err(OrchestratorError::Store(err)) => {
                    warn!(task_id = %task_id, error = %err, "worker stopped on store failure");
                }
                Err(err) => debug!(task_id = %task_id, error = %err, "worker ended with failure"),
            }
        });
    }
}

const fn unscheduled(task: &Task) -> ContinueTaskResponse {
    ContinueTaskResponse {
        task_id: task.id(),
        status: task.status(),
        scheduled: false,
    }
}
