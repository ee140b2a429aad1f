//! Sync task state
//!
//! A [`SyncTask`] is the observable record of one orchestrator run. It is
//! owned by the [`TaskLedger`] and only reachable through a [`TaskHandle`],
//! which serializes every read and write behind a per-task mutex.

pub mod ledger;

pub use ledger::{TaskHandle, TaskLedger};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a sync task
///
/// `Pending -> Running -> {Completed, Failed, Cancelled}`. `Pending` may also
/// go straight to `Failed` or `Cancelled`. Terminal states never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        match (self, next) {
            (TaskStatus::Pending, TaskStatus::Running) => true,
            (TaskStatus::Pending, TaskStatus::Failed | TaskStatus::Cancelled) => true,
            (TaskStatus::Running, s) => s.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
    Success,
}

/// One line of a task's log, immutable once appended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            message: message.into(),
        }
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.message
        )
    }
}

/// Mutable state of one run
#[derive(Debug, Clone)]
pub struct SyncTask {
    pub id: String,
    pub status: TaskStatus,
    pub total: usize,
    pub progress: usize,
    pub current_image: String,
    pub logs: Vec<LogEntry>,
    pub errors: Vec<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

impl SyncTask {
    pub fn new(id: impl Into<String>, total: usize) -> Self {
        Self {
            id: id.into(),
            status: TaskStatus::Pending,
            total,
            progress: 0,
            current_image: String::new(),
            logs: Vec::new(),
            errors: Vec::new(),
            start_time: Utc::now(),
            end_time: None,
        }
    }

    /// Apply a state machine transition; returns false if it is not allowed
    pub fn transition(&mut self, next: TaskStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        if next.is_terminal() && self.end_time.is_none() {
            self.end_time = Some(Utc::now());
        }
        true
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            id: self.id.clone(),
            status: self.status,
            progress: self.progress,
            total: self.total,
            current_image: self.current_image.clone(),
            logs: self.logs.clone(),
            errors: self.errors.clone(),
            start_time: self.start_time,
            end_time: self.end_time,
        }
    }
}

/// Read-only copy of a task returned by status queries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: String,
    pub status: TaskStatus,
    pub progress: usize,
    pub total: usize,
    pub current_image: String,
    pub logs: Vec<LogEntry>,
    pub errors: Vec<String>,
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
}

impl TaskSnapshot {
    pub fn succeeded(&self) -> usize {
        self.progress.saturating_sub(self.errors.len())
    }
}
