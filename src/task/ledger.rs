//! In-memory registry of sync tasks

use super::{LogEntry, LogLevel, SyncTask, TaskSnapshot, TaskStatus};
use crate::error::{Result, SyncError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Shared access to one task
///
/// Clones refer to the same task. Every accessor takes the task mutex for the
/// shortest possible time, so observers never see a half-applied update.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    id: Arc<str>,
    state: Arc<Mutex<SyncTask>>,
    cancel: CancellationToken,
    done: CancellationToken,
}

impl TaskHandle {
    fn new(task: SyncTask) -> Self {
        Self {
            id: Arc::from(task.id.as_str()),
            state: Arc::new(Mutex::new(task)),
            cancel: CancellationToken::new(),
            done: CancellationToken::new(),
        }
    }

    // a panicking worker must not make the task unreadable
    fn lock(&self) -> MutexGuard<'_, SyncTask> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn status(&self) -> TaskStatus {
        self.lock().status
    }

    pub fn transition(&self, next: TaskStatus) -> bool {
        self.lock().transition(next)
    }

    pub fn append_log(&self, level: LogLevel, message: impl Into<String>) -> LogEntry {
        let entry = LogEntry::new(level, message);
        self.lock().logs.push(entry.clone());
        entry
    }

    pub fn begin_image(&self, image: &str) {
        self.lock().current_image = image.to_string();
    }

    /// Count one processed image; failures are remembered by reference
    pub fn record_processed(&self, image: &str, succeeded: bool) -> (usize, usize) {
        let mut task = self.lock();
        if !succeeded {
            task.errors.push(image.to_string());
        }
        task.progress = (task.progress + 1).min(task.total);
        (task.progress, task.total)
    }

    pub fn error_count(&self) -> usize {
        self.lock().errors.len()
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        self.lock().snapshot()
    }

    /// Request cooperative cancellation
    ///
    /// Returns true when the task is cancelled after the call, including when
    /// it already was. A task that finished some other way stays as it is.
    pub fn cancel(&self) -> bool {
        let cancelled = {
            let mut task = self.lock();
            task.transition(TaskStatus::Cancelled) || task.status == TaskStatus::Cancelled
        };
        if cancelled {
            self.cancel.cancel();
        }
        cancelled
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled() || self.status() == TaskStatus::Cancelled
    }

    /// Token fired on cancellation, used to abort an in-flight copy
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Mark the worker as gone; the task receives no further writes
    ///
    /// A cancelled task is terminal as soon as it is cancelled, but its worker
    /// still appends its closing lines. Only this marks the state as settled.
    pub fn finish(&self) {
        self.done.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.done.is_cancelled()
    }

    /// Resolves once [`finish`](Self::finish) has been called
    pub async fn finished(&self) {
        self.done.cancelled().await
    }

    /// Terminal, and not a cancelled task whose worker is still closing down
    pub fn is_settled(&self) -> bool {
        match self.status() {
            TaskStatus::Cancelled => self.is_finished(),
            status => status.is_terminal(),
        }
    }
}

/// All tasks known to this process
#[derive(Debug, Default)]
pub struct TaskLedger {
    tasks: RwLock<HashMap<String, TaskHandle>>,
}

impl TaskLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generate_id() -> String {
        format!("sync_{}", Uuid::new_v4().simple())
    }

    /// Register a new pending task under a fresh identifier
    pub fn create(&self, total: usize) -> TaskHandle {
        loop {
            if let Ok(handle) = self.create_with_id(Self::generate_id(), total) {
                return handle;
            }
        }
    }

    /// Register a new pending task under a caller supplied identifier
    pub fn create_with_id(&self, id: impl Into<String>, total: usize) -> Result<TaskHandle> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(SyncError::Validation("Task id cannot be empty".to_string()));
        }

        let mut tasks = self.tasks.write().unwrap_or_else(PoisonError::into_inner);
        if tasks.contains_key(&id) {
            return Err(SyncError::Validation(format!("Task id already in use: {}", id)));
        }
        let handle = TaskHandle::new(SyncTask::new(id.clone(), total));
        tasks.insert(id, handle.clone());
        Ok(handle)
    }

    pub fn get(&self, id: &str) -> Option<TaskHandle> {
        self.tasks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    pub fn snapshot(&self, id: &str) -> Option<TaskSnapshot> {
        self.get(id).map(|h| h.snapshot())
    }

    pub fn cancel(&self, id: &str) -> Result<bool> {
        self.get(id)
            .map(|h| h.cancel())
            .ok_or_else(|| SyncError::TaskNotFound(id.to_string()))
    }

    /// Snapshots of every task, oldest first
    pub fn list(&self) -> Vec<TaskSnapshot> {
        let handles: Vec<TaskHandle> = self
            .tasks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        let mut snapshots: Vec<TaskSnapshot> = handles.iter().map(|h| h.snapshot()).collect();
        snapshots.sort_by_key(|s| s.start_time);
        snapshots
    }

    /// Drop settled tasks; the engine itself never calls this
    pub fn purge_finished(&self) -> usize {
        let mut tasks = self.tasks.write().unwrap_or_else(PoisonError::into_inner);
        let before = tasks.len();
        tasks.retain(|_, handle| !handle.is_settled());
        before - tasks.len()
    }

    pub fn len(&self) -> usize {
        self.tasks.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
