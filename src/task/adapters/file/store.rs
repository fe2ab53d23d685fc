//! Durable file-backed task store.
//!
//! Layout under the store root:
//!
//! - `tasks/<id>.json` holds one sealed record per task;
//! - `pr_index.json` maps pull request references to task ids;
//! - `logs/<id>/run-NNN.log` holds the output of each execution run.
//!
//! Every file is replaced through a temporary sibling that is synced before
//! being renamed over the target, so a crash leaves either the old or the new
//! content. Records are the source of truth: the index is reconciled against
//! them when the store is opened.

use super::models::{PullRequestIndex, StoredRecord};
use crate::task::{
    domain::{FeedbackEntry, PullRequestRef, Task, TaskId, TaskStatus},
    ports::{FeedbackAppend, StoreError, StoreResult, TaskStore},
};
use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use cap_std::ambient_authority;
use cap_std::fs_utf8::Dir;
use mockable::DefaultClock;
use std::collections::HashMap;
use std::io::Write;
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;
use tracing::{debug, warn};

const TASKS_DIR: &str = "tasks";
const LOGS_DIR: &str = "logs";
const INDEX_FILE: &str = "pr_index.json";

/// File-backed task store.
#[derive(Debug, Clone)]
pub struct FileTaskStore {
    root: Arc<Dir>,
    path: Utf8PathBuf,
    cache: Arc<RwLock<FileStoreState>>,
    write_lock: Arc<Mutex<()>>,
}

#[derive(Debug, Default)]
struct FileStoreState {
    tasks: HashMap<TaskId, Task>,
    pull_request_index: HashMap<PullRequestRef, TaskId>,
    corrupt: Vec<StoreError>,
}

impl FileTaskStore {
    /// Opens (creating if needed) the store rooted at `path` and loads every
    /// valid record.
    ///
    /// Records that fail validation are skipped, logged and reported by
    /// [`Self::corrupt_records`].
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] when the directory layout cannot be
    /// created or read.
    pub async fn open(root_path: impl Into<Utf8PathBuf>) -> StoreResult<Self> {
        let path: Utf8PathBuf = root_path.into();
        let open_path = path.clone();
        let (root, state) = tokio::task::spawn_blocking(move || load(&open_path))
            .await
            .map_err(StoreError::io)??;
        debug!(path = %path, tasks = state.tasks.len(), "opened task store");
        Ok(Self {
            root: Arc::new(root),
            path,
            cache: Arc::new(RwLock::new(state)),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Returns the store root path.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Returns the validation failures encountered while opening the store.
    #[must_use]
    pub fn corrupt_records(&self) -> Vec<StoreError> {
        self.cache
            .read()
            .map(|state| state.corrupt.clone())
            .unwrap_or_default()
    }

    async fn run_blocking<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Dir) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let root = Arc::clone(&self.root);
        tokio::task::spawn_blocking(move || f(&root))
            .await
            .map_err(StoreError::io)?
    }

    fn read_cache(&self) -> StoreResult<std::sync::RwLockReadGuard<'_, FileStoreState>> {
        self.cache
            .read()
            .map_err(|err| StoreError::io(std::io::Error::other(err.to_string())))
    }

    fn write_cache(&self) -> StoreResult<std::sync::RwLockWriteGuard<'_, FileStoreState>> {
        self.cache
            .write()
            .map_err(|err| StoreError::io(std::io::Error::other(err.to_string())))
    }

    /// Returns the index with `task`'s reference applied, or `None` when
    /// unchanged.
    fn index_after(&self, task: &Task) -> StoreResult<Option<PullRequestIndex>> {
        let state = self.read_cache()?;
        let previous = state
            .tasks
            .get(&task.id())
            .and_then(|old| old.pull_request_ref().cloned());
        if previous.as_ref() == task.pull_request_ref() {
            return Ok(None);
        }
        let mut index = state.pull_request_index.clone();
        if let Some(old) = previous {
            if index.get(&old) == Some(&task.id()) {
                index.remove(&old);
            }
        }
        if let Some(pr_ref) = task.pull_request_ref() {
            index.insert(pr_ref.clone(), task.id());
        }
        Ok(Some(to_index_file(&index)))
    }

    /// Persists `task` and then refreshes the cache.
    async fn write_task(&self, task: Task) -> StoreResult<()> {
        let record = StoredRecord::seal(&task)?;
        let index = self.index_after(&task)?;
        let file_name = record_file_name(task.id());
        self.run_blocking(move |root| {
            write_json(root, &Utf8Path::new(TASKS_DIR).join(&file_name), &record)
        })
        .await?;

        // The record is committed; the index is rebuilt from records on open.
        if let Some(index_file) = index.clone() {
            let written = self
                .run_blocking(move |root| {
                    write_json(root, Utf8Path::new(INDEX_FILE), &index_file)
                })
                .await;
            if let Err(err) = written {
                warn!(
                    task_id = %task.id(),
                    error = %err,
                    "pull request index not written; it will be rebuilt on open"
                );
            }
        }

        let mut state = self.write_cache()?;
        if let Some(index_file) = index {
            state.pull_request_index = from_index_file(&index_file);
        }
        state.tasks.insert(task.id(), task);
        Ok(())
    }
}

#[async_trait]
impl TaskStore for FileTaskStore {
    async fn put(&self, task: &Task) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;
        self.write_task(task.clone()).await
    }

    async fn get(&self, id: TaskId) -> StoreResult<Option<Task>> {
        Ok(self.read_cache()?.tasks.get(&id).cloned())
    }

    async fn list(&self, status: Option<TaskStatus>) -> StoreResult<Vec<Task>> {
        let state = self.read_cache()?;
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
        let state = self.read_cache()?;
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
        let _guard = self.write_lock.lock().await;
        let mut task = self
            .read_cache()?
            .tasks
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))?;
        if !task.append_feedback(entry, &DefaultClock) {
            return Ok(FeedbackAppend::AlreadyPresent(task));
        }
        self.write_task(task.clone()).await?;
        Ok(FeedbackAppend::Appended(task))
    }

    async fn delete(&self, id: TaskId) -> StoreResult<bool> {
        let _guard = self.write_lock.lock().await;
        let index = {
            let state = self.read_cache()?;
            if !state.tasks.contains_key(&id) {
                return Ok(false);
            }
            let mut index = state.pull_request_index.clone();
            index.retain(|_, owner| *owner != id);
            index
        };
        let index_file = to_index_file(&index);
        self.run_blocking(move |root| {
            write_json(root, Utf8Path::new(INDEX_FILE), &index_file)?;
            remove_if_present(root, &Utf8Path::new(TASKS_DIR).join(record_file_name(id)))?;
            match root.remove_dir_all(log_dir(id)) {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(err) => Err(StoreError::io(err)),
            }
        })
        .await?;

        let mut state = self.write_cache()?;
        state.tasks.remove(&id);
        state.pull_request_index = index;
        Ok(true)
    }

    async fn save_log(&self, id: TaskId, run: u32, content: &str) -> StoreResult<()> {
        if !self.read_cache()?.tasks.contains_key(&id) {
            return Err(StoreError::NotFound(id));
        }
        let log = content.to_owned();
        self.run_blocking(move |root| {
            let dir = log_dir(id);
            root.create_dir_all(&dir).map_err(StoreError::io)?;
            write_atomic(root, &dir.join(log_file_name(run)), log.as_bytes())
        })
        .await
    }

    async fn read_log(&self, id: TaskId, run: u32) -> StoreResult<Option<String>> {
        self.run_blocking(move |root| {
            match root.read_to_string(log_dir(id).join(log_file_name(run))) {
                Ok(log) => Ok(Some(log)),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(err) => Err(StoreError::io(err)),
            }
        })
        .await
    }

    async fn latest_log_run(&self, id: TaskId) -> StoreResult<Option<u32>> {
        self.run_blocking(move |root| {
            let entries = match root.read_dir(log_dir(id)) {
                Ok(entries) => entries,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
                Err(err) => return Err(StoreError::io(err)),
            };
            let mut latest = None;
            for entry in entries {
                let name = entry
                    .and_then(|found| found.file_name())
                    .map_err(StoreError::io)?;
                if let Some(run) = parse_log_file_name(&name) {
                    latest = latest.max(Some(run));
                }
            }
            Ok(latest)
        })
        .await
    }
}

fn record_file_name(id: TaskId) -> String {
    format!("{id}.json")
}

fn log_dir(id: TaskId) -> Utf8PathBuf {
    Utf8Path::new(LOGS_DIR).join(id.to_string())
}

fn log_file_name(run: u32) -> String {
    format!("run-{run:03}.log")
}

fn parse_log_file_name(name: &str) -> Option<u32> {
    name.strip_prefix("run-")?
        .strip_suffix(".log")?
        .parse()
        .ok()
}

fn to_index_file(index: &HashMap<PullRequestRef, TaskId>) -> PullRequestIndex {
    PullRequestIndex {
        entries: index
            .iter()
            .map(|(pr_ref, id)| (pr_ref.as_str().to_owned(), id.into_inner()))
            .collect(),
    }
}

fn from_index_file(index: &PullRequestIndex) -> HashMap<PullRequestRef, TaskId> {
    index
        .entries
        .iter()
        .filter_map(|(pr_ref, id)| {
            PullRequestRef::new(pr_ref.as_str())
                .ok()
                .map(|parsed| (parsed, TaskId::from_uuid(*id)))
        })
        .collect()
}

fn write_json<T: serde::Serialize>(root: &Dir, path: &Utf8Path, value: &T) -> StoreResult<()> {
    let bytes = serde_json::to_vec_pretty(value).map_err(StoreError::serialization)?;
    write_atomic(root, path, &bytes)
}

/// Writes `bytes` to a synced temporary sibling and renames it over `path`.
fn write_atomic(root: &Dir, path: &Utf8Path, bytes: &[u8]) -> StoreResult<()> {
    let tmp_path = Utf8PathBuf::from(format!("{path}.tmp"));
    let mut file = root.create(&tmp_path).map_err(StoreError::io)?;
    file.write_all(bytes).map_err(StoreError::io)?;
    file.sync_all().map_err(StoreError::io)?;
    drop(file);
    root.rename(&tmp_path, root, path).map_err(StoreError::io)?;
    sync_parent(root, path)
}

/// Flushes the directory entry created by a rename in `path`'s parent.
#[cfg(unix)]
fn sync_parent(root: &Dir, path: &Utf8Path) -> StoreResult<()> {
    let parent = match path.parent().filter(|dir| !dir.as_str().is_empty()) {
        Some(dir) => root.open_dir(dir),
        None => root.try_clone(),
    }
    .map_err(StoreError::io)?;
    std::fs::File::from(std::os::fd::OwnedFd::from(parent))
        .sync_all()
        .map_err(StoreError::io)
}

#[cfg(not(unix))]
const fn sync_parent(_root: &Dir, _path: &Utf8Path) -> StoreResult<()> {
    Ok(())
}

fn remove_if_present(root: &Dir, path: &Utf8Path) -> StoreResult<()> {
    match root.remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(StoreError::io(err)),
    }
}

/// Creates the layout, loads every record and reconciles the index.
fn load(path: &Utf8Path) -> StoreResult<(Dir, FileStoreState)> {
    Dir::create_ambient_dir_all(path, ambient_authority()).map_err(StoreError::io)?;
    let root = Dir::open_ambient_dir(path, ambient_authority()).map_err(StoreError::io)?;
    root.create_dir_all(TASKS_DIR).map_err(StoreError::io)?;
    root.create_dir_all(LOGS_DIR).map_err(StoreError::io)?;

    let mut state = FileStoreState::default();
    for entry in root.read_dir(TASKS_DIR).map_err(StoreError::io)? {
        let name = entry
            .and_then(|found| found.file_name())
            .map_err(StoreError::io)?;
        if !name.ends_with(".json") {
            continue;
        }
        let location = format!("{TASKS_DIR}/{name}");
        match load_record(&root, &location) {
            Ok(task) => {
                state.tasks.insert(task.id(), task);
            }
            Err(err) => {
                warn!(location = %location, error = %err, "skipping unreadable task record");
                state.corrupt.push(err);
            }
        }
    }

    let stored_index = match root.read(INDEX_FILE) {
        Ok(bytes) => serde_json::from_slice::<PullRequestIndex>(&bytes).unwrap_or_else(|err| {
            warn!(error = %err, "discarding unreadable pull request index");
            PullRequestIndex::default()
        }),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => PullRequestIndex::default(),
        Err(err) => return Err(StoreError::io(err)),
    };
    let rebuilt: HashMap<PullRequestRef, TaskId> = state
        .tasks
        .values()
        .filter_map(|task| task.pull_request_ref().map(|pr| (pr.clone(), task.id())))
        .collect();
    let rebuilt_file = to_index_file(&rebuilt);
    if rebuilt_file != stored_index {
        debug!("rewriting pull request index from task records");
        write_json(&root, Utf8Path::new(INDEX_FILE), &rebuilt_file)?;
    }
    state.pull_request_index = rebuilt;

    Ok((root, state))
}

fn load_record(root: &Dir, location: &str) -> StoreResult<Task> {
    let bytes = root.read(location).map_err(StoreError::io)?;
    let record: StoredRecord = serde_json::from_slice(&bytes).map_err(|err| StoreError::Corrupt {
        location: location.to_owned(),
        reason: err.to_string(),
    })?;
    record.open(location)
}
