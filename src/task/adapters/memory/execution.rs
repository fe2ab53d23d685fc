//! Scripted in-memory execution gateway.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::InMemoryVcs;
use crate::task::ports::{
    ExecutionContext, ExecutionError, ExecutionErrorKind, ExecutionGateway, ExecutionOutcome,
    ExecutionResult,
};

/// Scripted result of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedRun {
    /// The run succeeds; `changes` marks the branch's working tree dirty.
    Succeed {
        /// Output log returned by the run.
        output: String,
        /// Whether the run modified files.
        changes: bool,
    },
    /// The run reports failure with an exit status.
    Fail {
        /// Output log returned by the run.
        output: String,
        /// Exit status returned by the run.
        exit_status: i32,
    },
    /// The environment fails before reporting a result.
    Error(ExecutionError),
}

impl ScriptedRun {
    /// Succeeds and leaves file changes behind.
    #[must_use]
    pub fn with_changes(output: impl Into<String>) -> Self {
        Self::Succeed {
            output: output.into(),
            changes: true,
        }
    }

    /// Succeeds without touching any file.
    #[must_use]
    pub fn without_changes(output: impl Into<String>) -> Self {
        Self::Succeed {
            output: output.into(),
            changes: false,
        }
    }
}

/// Execution gateway that replays scripted outcomes.
///
/// Runs without a script succeed and modify the working tree. While the
/// gateway is held, runs block until [`Self::release`] or cancellation.
#[derive(Debug, Clone)]
pub struct InMemoryExecution {
    state: Arc<Mutex<InMemoryExecutionState>>,
    hold: Arc<watch::Sender<bool>>,
    started: Arc<watch::Sender<usize>>,
    vcs: Option<InMemoryVcs>,
}

#[derive(Debug, Default)]
struct InMemoryExecutionState {
    scripts: VecDeque<ScriptedRun>,
    contexts: Vec<ExecutionContext>,
    cancelled: usize,
    active: usize,
    peak_active: usize,
}

impl Default for InMemoryExecution {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryExecution {
    /// Creates a gateway that does not touch any repository.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::default(),
            hold: Arc::new(watch::channel(false).0),
            started: Arc::new(watch::channel(0).0),
            vcs: None,
        }
    }

    /// Creates a gateway that marks `vcs` working trees dirty on changes.
    #[must_use]
    pub fn linked_to(vcs: InMemoryVcs) -> Self {
        Self {
            vcs: Some(vcs),
            ..Self::new()
        }
    }

    /// Queues the result of the next unscripted run.
    pub fn push_script(&self, script: ScriptedRun) {
        self.lock().scripts.push_back(script);
    }

    /// Blocks every subsequent run until [`Self::release`].
    pub fn hold(&self) {
        self.hold.send_replace(true);
    }

    /// Lets held runs proceed.
    pub fn release(&self) {
        self.hold.send_replace(false);
    }

    /// Returns the contexts of every started run, in start order.
    #[must_use]
    pub fn contexts(&self) -> Vec<ExecutionContext> {
        self.lock().contexts.clone()
    }

    /// Returns how many runs observed cancellation.
    #[must_use]
    pub fn cancelled_runs(&self) -> usize {
        self.lock().cancelled
    }

    /// Returns the highest number of runs that were in flight together.
    #[must_use]
    pub fn peak_active(&self) -> usize {
        self.lock().peak_active
    }

    /// Waits until at least `count` runs have started.
    ///
    /// Returns `false` when `timeout` elapses first.
    pub async fn wait_for_started(&self, count: usize, timeout: Duration) -> bool {
        let mut receiver = self.started.subscribe();
        let reached = async {
            loop {
                if *receiver.borrow_and_update() >= count {
                    return true;
                }
                if receiver.changed().await.is_err() {
                    return false;
                }
            }
        };
        tokio::time::timeout(timeout, reached)
            .await
            .unwrap_or(false)
    }

    fn lock(&self) -> MutexGuard<'_, InMemoryExecutionState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn start(&self, context: &ExecutionContext) -> Option<ScriptedRun> {
        let script = {
            let mut state = self.lock();
            state.contexts.push(context.clone());
            state.active += 1;
            state.peak_active = state.peak_active.max(state.active);
            state.scripts.pop_front()
        };
        self.started.send_modify(|started| *started += 1);
        script
    }

    fn finish(&self, cancelled: bool) {
        let mut state = self.lock();
        state.active = state.active.saturating_sub(1);
        if cancelled {
            state.cancelled += 1;
        }
    }

    /// Waits while the gateway is held; returns `false` on cancellation.
    async fn wait_while_held(&self, cancel: &CancellationToken) -> bool {
        let mut receiver = self.hold.subscribe();
        loop {
            if !*receiver.borrow_and_update() {
                return true;
            }
            tokio::select! {
                () = cancel.cancelled() => return false,
                changed = receiver.changed() => {
                    if changed.is_err() {
                        return true;
                    }
                }
            }
        }
    }

    fn apply(
        &self,
        context: &ExecutionContext,
        script: ScriptedRun,
    ) -> ExecutionResult<ExecutionOutcome> {
        match script {
            ScriptedRun::Succeed { output, changes } => {
                if changes {
                    if let Some(vcs) = &self.vcs {
                        vcs.mark_dirty(&context.branch);
                    }
                }
                Ok(ExecutionOutcome::succeeded(output))
            }
            ScriptedRun::Fail {
                output,
                exit_status,
            } => Ok(ExecutionOutcome::failed(output, exit_status)),
            ScriptedRun::Error(error) => Err(error),
        }
    }
}

#[async_trait]
impl ExecutionGateway for InMemoryExecution {
    async fn run(
        &self,
        context: &ExecutionContext,
        cancel: CancellationToken,
    ) -> ExecutionResult<ExecutionOutcome> {
        let script = self.start(context);
        if !self.wait_while_held(&cancel).await || cancel.is_cancelled() {
            self.finish(true);
            return Err(ExecutionError::new(
                ExecutionErrorKind::Cancelled,
                format!("run {} of task {} was cancelled", context.run, context.task_id),
            ));
        }
        let outcome = self.apply(
            context,
            script.unwrap_or_else(|| {
                ScriptedRun::with_changes(format!("completed run {}", context.run))
            }),
        );
        self.finish(false);
        outcome
    }
}
