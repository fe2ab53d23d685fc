//! In-memory task store for tests and ephemeral deployments.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use crate::task::{
    domain::{FeedbackEntry, PullRequestRef, Task, TaskId, TaskStatus},
    ports::{FeedbackAppend, StoreError, StoreResult, TaskStore},
};
use mockable::DefaultClock;

/// Thread-safe in-memory task store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTaskStore {
    state: Arc<RwLock<InMemoryStoreState>>,
    fail_writes: Arc<AtomicBool>,
}

#[derive(Debug, Default)]
struct InMemoryStoreState {
    tasks: HashMap<TaskId, Task>,
    pull_request_index: HashMap<PullRequestRef, TaskId>,
    logs: HashMap<TaskId, BTreeMap<u32, String>>,
}

impl InMemoryTaskStore {
    /// Creates an empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent write fail until reset.
    pub fn fail_writes(&self, enabled: bool) {
        self.fail_writes.store(enabled, Ordering::SeqCst);
    }

    fn check_writable(&self) -> StoreResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::io(std::io::Error::other(
                "injected write failure",
            )));
        }
        Ok(())
    }

    fn read_state(&self) -> StoreResult<std::sync::RwLockReadGuard<'_, InMemoryStoreState>> {
        self.state
            .read()
            .map_err(|err| StoreError::io(std::io::Error::other(err.to_string())))
    }

    fn write_state(&self) -> StoreResult<std::sync::RwLockWriteGuard<'_, InMemoryStoreState>> {
        self.state
            .write()
            .map_err(|err| StoreError::io(std::io::Error::other(err.to_string())))
    }
}

/// Replaces `task` and keeps the pull request index consistent with it.
fn upsert(state: &mut InMemoryStoreState, task: &Task) {
    if let Some(old_pr) = state
        .tasks
        .get(&task.id())
        .and_then(|old| old.pull_request_ref().cloned())
    {
        if state.pull_request_index.get(&old_pr) == Some(&task.id()) {
            state.pull_request_index.remove(&old_pr);
        }
    }
    if let Some(pr_ref) = task.pull_request_ref() {
        state.pull_request_index.insert(pr_ref.clone(), task.id());
    }
    state.tasks.insert(task.id(), task.clone());
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn put(&self, task: &Task) -> StoreResult<()> {
        self.check_writable()?;
        let mut state = self.write_state()?;
        upsert(&mut state, task);
        Ok(())
    }

    async fn get(&self, id: TaskId) -> StoreResult<Option<Task>> {
        let state = self.read_state()?;
        Ok(state.tasks.get(&id).cloned())
    }

    async fn list(&self, status: Option<TaskStatus>) -> StoreResult<Vec<Task>> {
        let state = self.read_state()?;
        let mut tasks: Vec<Task> = state
            .tasks
            .values()
            .filter(|task| status.is_none_or(|wanted| task.status() == wanted))
            .cloned()
            .collect();
        tasks.sort_by(|a, b| b.created_at().cmp(&a.created_at()).then(a.id().cmp(&b.id())));
        Ok(tasks)
    }

    async fn find_by_pr_ref(&self, pr_ref: &PullRequestRef) -> StoreResult<Option<Task>> {
        let state = self.read_state()?;
        Ok(state
            .pull_request_index
            .get(pr_ref)
            .and_then(|id| state.tasks.get(id))
            .cloned())
    }

    async fn append_feedback(
        &self,
        id: TaskId,
        entry: FeedbackEntry,
    ) -> StoreResult<FeedbackAppend> {
        self.check_writable()?;
        let mut state = self.write_state()?;
        let task = state.tasks.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if task.append_feedback(entry, &DefaultClock) {
            Ok(FeedbackAppend::Appended(task.clone()))
        } else {
            Ok(FeedbackAppend::AlreadyPresent(task.clone()))
        }
    }

    async fn delete(&self, id: TaskId) -> StoreResult<bool> {
        self.check_writable()?;
        let mut state = self.write_state()?;
        let Some(task) = state.tasks.remove(&id) else {
            return Ok(false);
        };
        if let Some(pr_ref) = task.pull_request_ref() {
            if state.pull_request_index.get(pr_ref) == Some(&id) {
                state.pull_request_index.remove(pr_ref);
            }
        }
        state.logs.remove(&id);
        Ok(true)
    }

    async fn save_log(&self, id: TaskId, run: u32, content: &str) -> StoreResult<()> {
        self.check_writable()?;
        let mut state = self.write_state()?;
        if !state.tasks.contains_key(&id) {
            return Err(StoreError::NotFound(id));
        }
        state
            .logs
            .entry(id)
            .or_default()
            .insert(run, content.to_owned());
        Ok(())
    }

    async fn read_log(&self, id: TaskId, run: u32) -> StoreResult<Option<String>> {
        let state = self.read_state()?;
        Ok(state.logs.get(&id).and_then(|runs| runs.get(&run)).cloned())
    }

    async fn latest_log_run(&self, id: TaskId) -> StoreResult<Option<u32>> {
        let state = self.read_state()?;
        Ok(state
            .logs
            .get(&id)
            .and_then(|runs| runs.keys().next_back().copied()))
    }
}

