//! Adapter around the external copy executable

use super::command::Invocation;
use crate::error::{Result, SyncError};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// How an invocation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Process exited on its own; `None` when it was killed by a signal
    Exited(Option<i32>),
    /// Killed after exceeding the invocation timeout
    TimedOut,
    /// Killed because the owning task was cancelled
    Cancelled,
}

/// Captured result of one tool run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub status: RunStatus,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn exited(code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            status: RunStatus::Exited(Some(code)),
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    pub fn interrupted(status: RunStatus) -> Self {
        Self {
            status,
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    pub fn success(&self) -> bool {
        self.status == RunStatus::Exited(Some(0))
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self.status {
            RunStatus::Exited(code) => code,
            _ => None,
        }
    }

    pub fn stdout_lines(&self) -> impl Iterator<Item = &str> {
        non_empty_lines(&self.stdout)
    }

    pub fn stderr_lines(&self) -> impl Iterator<Item = &str> {
        non_empty_lines(&self.stderr)
    }
}

fn non_empty_lines(text: &str) -> impl Iterator<Item = &str> {
    text.lines().map(str::trim_end).filter(|l| !l.trim().is_empty())
}

/// Seam between the copy operation and the process that moves the bytes
#[async_trait]
pub trait ToolRunner: Send + Sync {
    /// Whether `program` can be launched at all
    fn is_available(&self, program: &str) -> bool;

    /// Run to completion, timeout or cancellation
    ///
    /// `Err` is reserved for failing to start the process. Everything that
    /// happens after the spawn is described by the returned [`ToolOutput`].
    async fn run(&self, invocation: &Invocation, cancel: &CancellationToken) -> Result<ToolOutput>;
}

/// Runs the tool as a child process on the tokio runtime
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ToolRunner for ProcessRunner {
    fn is_available(&self, program: &str) -> bool {
        which::which(program).is_ok()
    }

    async fn run(&self, invocation: &Invocation, cancel: &CancellationToken) -> Result<ToolOutput> {
        debug!(command = %invocation.redacted(), timeout_secs = invocation.timeout.as_secs(), "Spawning copy tool");

        let child = Command::new(&invocation.program)
            .args(&invocation.args)
            .envs(invocation.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // dropping the wait future below is what kills the child
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => SyncError::ToolUnavailable(format!(
                    "{} not found: {}",
                    invocation.program, e
                )),
                _ => SyncError::Io(e),
            })?;

        tokio::select! {
            output = child.wait_with_output() => {
                let output = output?;
                Ok(ToolOutput {
                    status: RunStatus::Exited(output.status.code()),
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                })
            }
            _ = tokio::time::sleep(invocation.timeout) => {
                debug!(program = %invocation.program, "Copy tool timed out, killing");
                Ok(ToolOutput::interrupted(RunStatus::TimedOut))
            }
            _ = cancel.cancelled() => {
                debug!(program = %invocation.program, "Cancellation requested, killing copy tool");
                Ok(ToolOutput::interrupted(RunStatus::Cancelled))
            }
        }
    }
}
