//! Registry of tasks that currently have a worker.
//!
//! Holding a [`TaskClaim`] is the per-task lock: at most one claim exists per
//! task id, and the claim is released when the worker that owns it drops it.

use crate::task::domain::TaskId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
struct ActiveEntry {
    cancel: CancellationToken,
    executing: bool,
}

/// Shared map of claimed task ids.
#[derive(Debug, Clone, Default)]
pub(crate) struct ActiveTasks {
    entries: Arc<Mutex<HashMap<TaskId, ActiveEntry>>>,
}

impl ActiveTasks {
    /// Claims `id`, returning `None` when another worker holds it.
    ///
    /// The claim's cancellation token is a child of `parent`.
    pub fn try_claim(&self, id: TaskId, parent: &CancellationToken) -> Option<TaskClaim> {
        let mut entries = self.lock();
        if entries.contains_key(&id) {
            return None;
        }
        let cancel = parent.child_token();
        entries.insert(
            id,
            ActiveEntry {
                cancel: cancel.clone(),
                executing: false,
            },
        );
        Some(TaskClaim {
            id,
            registry: self.clone(),
            cancel,
        })
    }

    /// Reports whether `id` is claimed.
    pub fn is_active(&self, id: TaskId) -> bool {
        self.lock().contains_key(&id)
    }

    /// Cancels the run of `id` if it is executing.
    ///
    /// Returns `false` when the task is not in its execution step.
    pub fn cancel_execution(&self, id: TaskId) -> bool {
        let entries = self.lock();
        match entries.get(&id) {
            Some(entry) if entry.executing => {
                entry.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    /// Returns the number of claimed tasks.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    fn set_executing(&self, id: TaskId, executing: bool) {
        if let Some(entry) = self.lock().get_mut(&id) {
            entry.executing = executing;
        }
    }

    fn release(&self, id: TaskId) {
        self.lock().remove(&id);
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TaskId, ActiveEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Exclusive ownership of one task id; released on drop.
#[derive(Debug)]
pub(crate) struct TaskClaim {
    id: TaskId,
    registry: ActiveTasks,
    cancel: CancellationToken,
}

impl TaskClaim {
    /// Returns the claimed task id.
    pub const fn id(&self) -> TaskId {
        self.id
    }

    /// Returns the token cancelled on user cancellation or shutdown.
    pub const fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Marks whether the task is inside its execution step, where
    /// cancellation is accepted.
    pub fn set_executing(&self, executing: bool) {
        self.registry.set_executing(self.id, executing);
    }
}

impl Drop for TaskClaim {
    fn drop(&mut self) {
        self.registry.release(self.id);
    }
}
