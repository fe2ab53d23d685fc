//! Per-task worker driving one pass through the lifecycle state machine.

use super::{
    error::{GatewayError, OrchestratorError, OrchestratorResult, TimeoutError},
    registry::TaskClaim,
    templates::TaskTemplates,
};
use crate::task::{
    domain::{PrMode, Task, TaskId, TaskStatus},
    ports::{
        CreatePullRequest, ExecutionContext, ExecutionError, ExecutionErrorKind,
        ExecutionGateway, ExecutionOutcome, ExecutionResult, PullRequestGateway, TaskStore,
        VersionControlGateway,
    },
};
use chrono::{DateTime, Utc};
use mockable::Clock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

/// Default execution ceiling.
pub const DEFAULT_EXECUTION_TIMEOUT: Duration = Duration::from_secs(3600);

/// Lines of execution output copied into the error detail of a failed run.
const FAILURE_TAIL_LINES: usize = 20;

/// Lifecycle change published by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskEvent {
    /// Task that changed.
    pub task_id: TaskId,
    /// Previous state; `None` for newly submitted tasks.
    pub from: Option<TaskStatus>,
    /// New state.
    pub to: TaskStatus,
    /// When the change was persisted.
    pub at: DateTime<Utc>,
}

/// Behaviour applied by every worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerPolicy {
    /// Ceiling for one execution run.
    pub execution_timeout: Duration,
    /// Whether a draft pull request is marked ready when a run completes.
    pub mark_ready_on_completion: bool,
}

impl Default for WorkerPolicy {
    fn default() -> Self {
        Self {
            execution_timeout: DEFAULT_EXECUTION_TIMEOUT,
            mark_ready_on_completion: false,
        }
    }
}

/// Collaborators shared by every worker.
pub(crate) struct TaskWorker<S, V, E, P, C> {
    pub store: Arc<S>,
    pub vcs: Arc<V>,
    pub execution: Arc<E>,
    pub pull_requests: Arc<P>,
    pub clock: Arc<C>,
    pub templates: Arc<TaskTemplates>,
    pub events: broadcast::Sender<TaskEvent>,
    pub policy: WorkerPolicy,
    pub shutdown: CancellationToken,
}

impl<S, V, E, P, C> Clone for TaskWorker<S, V, E, P, C> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            vcs: Arc::clone(&self.vcs),
            execution: Arc::clone(&self.execution),
            pull_requests: Arc::clone(&self.pull_requests),
            clock: Arc::clone(&self.clock),
            templates: Arc::clone(&self.templates),
            events: self.events.clone(),
            policy: self.policy,
            shutdown: self.shutdown.clone(),
        }
    }
}

/// How the execution step ended.
enum RunEnd {
    Finished(ExecutionResult<ExecutionOutcome>),
    TimedOut,
}

impl<S, V, E, P, C> TaskWorker<S, V, E, P, C>
where
    S: TaskStore,
    V: VersionControlGateway,
    E: ExecutionGateway,
    P: PullRequestGateway,
    C: Clock + Send + Sync,
{
    /// Drives `task` from its current state to a terminal one.
    ///
    /// `continuation` prepends a checkout-and-pull before execution. Gateway
    /// failures are persisted on the task before being returned; store
    /// failures stop the worker and leave the last persisted state.
    #[instrument(skip_all, fields(task_id = %claim.id(), branch = %task.branch()))]
    pub async fn run(
        &self,
        mut task: Task,
        claim: &TaskClaim,
        continuation: bool,
    ) -> OrchestratorResult<Task> {
        if task.status() == TaskStatus::Submitted {
            if let Err(err) = self.vcs.create_and_push_branch(task.branch()).await {
                return self.fail_with(task, GatewayError::from(err).into()).await;
            }
            self.advance(&mut task, TaskStatus::BranchCreated).await?;
        }

        if task.mode() == PrMode::EagerPr && task.pull_request_ref().is_none() {
            if let Err(err) = self.open_pull_request(&mut task).await {
                return self.fail_with(task, err).await;
            }
            self.advance(&mut task, TaskStatus::PrCreated).await?;
        }

        if continuation {
            if let Err(err) = self.vcs.checkout_and_pull(task.branch()).await {
                return self.fail_with(task, GatewayError::from(err).into()).await;
            }
        }

        // Cancellable from the moment `running` becomes visible.
        claim.set_executing(true);
        self.advance(&mut task, TaskStatus::Running).await?;
        let run = self
            .store
            .latest_log_run(task.id())
            .await?
            .map_or(1, |latest| latest.saturating_add(1));
        if let Err(err) = self.execute(&task, run, claim).await? {
            return self.fail_with(task, err).await;
        }

        self.advance(&mut task, TaskStatus::Committing).await?;
        if let Err(err) = self.commit_and_publish(&mut task, run).await {
            return self.fail_with(task, err).await;
        }
        self.advance(&mut task, TaskStatus::Completed).await?;
        Ok(task)
    }

    /// Runs the execution step under the timeout and stores its log.
    ///
    /// The outer result carries store failures; the inner one carries the
    /// failure to record on the task.
    async fn execute(
        &self,
        task: &Task,
        run: u32,
        claim: &TaskClaim,
    ) -> OrchestratorResult<Result<(), OrchestratorError>> {
        let prompt = self.templates.prompt(task).unwrap_or_else(|err| {
            warn!(error = %err, "prompt template failed; sending the raw description");
            task.description().to_owned()
        });
        let context = ExecutionContext {
            task_id: task.id(),
            run,
            branch: task.branch().clone(),
            description: task.description().to_owned(),
            feedback: task.feedback_history().to_vec(),
            prompt,
        };

        let end = self.run_with_timeout(&context, claim.token()).await;
        claim.set_executing(false);

        let (log, result) = self.interpret(task.id(), end);
        self.store.save_log(task.id(), run, &log).await?;
        debug!(run, log_bytes = log.len(), "stored run output");
        Ok(result)
    }

    async fn run_with_timeout(
        &self,
        context: &ExecutionContext,
        cancel: &CancellationToken,
    ) -> RunEnd {
        let run = self.execution.run(context, cancel.clone());
        tokio::pin!(run);
        tokio::select! {
            result = &mut run => RunEnd::Finished(result),
            () = tokio::time::sleep(self.policy.execution_timeout) => {
                warn!(limit_secs = self.policy.execution_timeout.as_secs(), "execution timed out");
                cancel.cancel();
                if let Err(err) = run.await {
                    debug!(error = %err, "timed-out run stopped");
                }
                RunEnd::TimedOut
            }
        }
    }

    /// Returns the log to store and the failure to record, if any.
    fn interpret(
        &self,
        task_id: TaskId,
        end: RunEnd,
    ) -> (String, Result<(), OrchestratorError>) {
        match end {
            RunEnd::Finished(Ok(outcome)) if outcome.success => (outcome.output_log, Ok(())),
            RunEnd::Finished(Ok(outcome)) => {
                let status = outcome
                    .exit_status
                    .map_or_else(|| "unknown".to_owned(), |code| code.to_string());
                let detail = format!(
                    "run reported failure (exit status {status})\n{}",
                    tail(&outcome.output_log, FAILURE_TAIL_LINES)
                );
                let err = ExecutionError::new(ExecutionErrorKind::Failed, detail);
                (outcome.output_log, Err(GatewayError::from(err).into()))
            }
            RunEnd::Finished(Err(err)) => {
                let reason = match err.kind() {
                    ExecutionErrorKind::Cancelled if self.shutdown.is_cancelled() => {
                        ExecutionError::cancelled("orchestrator shut down during execution")
                    }
                    ExecutionErrorKind::Cancelled => {
                        ExecutionError::cancelled("cancelled by request")
                    }
                    _ => err,
                };
                (reason.to_string(), Err(GatewayError::from(reason).into()))
            }
            RunEnd::TimedOut => {
                let timeout = TimeoutError {
                    task_id,
                    limit: self.policy.execution_timeout,
                };
                (timeout.to_string(), Err(timeout.into()))
            }
        }
    }

    /// Commits pending changes, pushes them and makes sure a pull request
    /// exists once the branch carries a commit.
    async fn commit_and_publish(&self, task: &mut Task, run: u32) -> OrchestratorResult<()> {
        let branch = task.branch().clone();
        let dirty = self
            .vcs
            .has_uncommitted_changes(&branch)
            .await
            .map_err(GatewayError::from)?;
        if dirty {
            let message = self
                .templates
                .commit_message(task, run)
                .unwrap_or_else(|_| self.templates.pull_request_title(task));
            let hash = self
                .vcs
                .commit_all(&branch, &message)
                .await
                .map_err(GatewayError::from)?;
            info!(commit = %hash, "committed run changes");
            task.record_commit(hash, &*self.clock);
            self.vcs.push(&branch).await.map_err(GatewayError::from)?;
        } else {
            info!("run left no changes; nothing to commit");
        }

        if task.pull_request_ref().is_none() && task.commit_hash().is_some() {
            self.open_pull_request(task).await?;
        }

        if self.policy.mark_ready_on_completion {
            if let Some(pr_ref) = task.pull_request_ref() {
                self.pull_requests
                    .mark_ready(pr_ref)
                    .await
                    .map_err(GatewayError::from)?;
            }
        }
        Ok(())
    }

    /// Associates the branch's pull request, creating a draft only when the
    /// host reports none.
    async fn open_pull_request(&self, task: &mut Task) -> OrchestratorResult<()> {
        let existing = self
            .pull_requests
            .find_by_branch(task.branch())
            .await
            .map_err(GatewayError::from)?;
        let pr_ref = if let Some(found) = existing {
            info!(pull_request = %found, "reusing existing pull request");
            found
        } else {
            let body = self
                .templates
                .pull_request_body(task, task.commit_hash())
                .unwrap_or_else(|_| task.description().to_owned());
            let request = CreatePullRequest {
                branch: task.branch().clone(),
                title: self.templates.pull_request_title(task),
                body,
                draft: true,
            };
            let created = self
                .pull_requests
                .create(&request)
                .await
                .map_err(GatewayError::from)?;
            info!(pull_request = %created, "opened draft pull request");
            created
        };
        task.associate_pull_request(pr_ref, &*self.clock)?;
        Ok(())
    }

    /// Applies one lifecycle edge, persists it and publishes the event.
    ///
    /// `task` is only updated once the store accepted the new state.
    async fn advance(&self, task: &mut Task, target: TaskStatus) -> OrchestratorResult<()> {
        let from = task.status();
        let mut next = task.clone();
        next.transition_to(target, &*self.clock)?;
        self.store.put(&next).await?;
        *task = next;
        info!(task_id = %task.id(), from = %from, to = %target, "task transitioned");
        self.publish(task, Some(from));
        Ok(())
    }

    /// Records `err` on the task, persists the failure and returns `err`.
    async fn fail_with(&self, mut task: Task, err: OrchestratorError) -> OrchestratorResult<Task> {
        let from = task.status();
        task.fail(err.to_string(), &*self.clock)?;
        self.store.put(&task).await?;
        warn!(task_id = %task.id(), from = %from, error = %err, "task failed");
        self.publish(&task, Some(from));
        Err(err)
    }

    /// Publishes the task's current state to event subscribers.
    pub fn publish(&self, task: &Task, from: Option<TaskStatus>) {
        let event = TaskEvent {
            task_id: task.id(),
            from,
            to: task.status(),
            at: task.updated_at(),
        };
        if self.events.send(event).is_err() {
            trace!("no task event subscribers");
        }
    }
}

/// Last `lines` lines of `text`.
fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().collect();
    let start = all.len().saturating_sub(lines);
    all.get(start..).map(|kept| kept.join("\n")).unwrap_or_default()
}
