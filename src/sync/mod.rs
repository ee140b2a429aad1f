//! Sync orchestrator
//!
//! [`SyncOrchestrator::start`] validates a request, registers a task in the
//! [`TaskLedger`] and hands the run to a background tokio task. The worker
//! walks the image list in order, copying one image at a time, and is the
//! only writer of its task. Observers read snapshots from the ledger or
//! subscribe to the [`EventBus`].

use crate::config::AppConfig;
use crate::copy::{
    CopyLog, CopyOperation, CopyOutcome, CopyRequest, ProcessRunner, ProxyConfig, SourceAuth,
    ToolRunner,
};
use crate::error::handlers::ValidationErrorHandler;
use crate::error::{Result, SyncError};
use crate::events::{EventBus, SyncEvent};
use crate::image::ReplaceLevel;
use crate::registry::RegistryDirectory;
use crate::task::{LogLevel, TaskHandle, TaskLedger, TaskSnapshot, TaskStatus};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{Instrument, debug, info, info_span};

/// Parameters of one sync run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartSyncRequest {
    pub images: Vec<String>,
    pub target_registry: String,
    #[serde(default)]
    pub target_project: Option<String>,
    #[serde(default)]
    pub replace_level: ReplaceLevel,
    #[serde(default)]
    pub source_auth: Option<SourceAuth>,
    #[serde(default)]
    pub proxy_config: Option<ProxyConfig>,
}

impl StartSyncRequest {
    pub fn new<I, S>(images: I, target_registry: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            images: images.into_iter().map(Into::into).collect(),
            target_registry: target_registry.into(),
            ..Default::default()
        }
    }

    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.target_project = Some(project.into());
        self
    }

    pub fn with_replace_level(mut self, level: ReplaceLevel) -> Self {
        self.replace_level = level;
        self
    }

    pub fn with_source_auth(mut self, auth: SourceAuth) -> Self {
        self.source_auth = Some(auth);
        self
    }

    pub fn with_proxy(mut self, proxy: ProxyConfig) -> Self {
        self.proxy_config = Some(proxy);
        self
    }

    /// Trimmed image references with blank entries dropped
    pub fn normalized_images(&self) -> Vec<String> {
        self.images
            .iter()
            .map(|i| i.trim())
            .filter(|i| !i.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        ValidationErrorHandler::validate_images(&self.images)?;
        ValidationErrorHandler::validate_target_registry(&self.target_registry)?;
        if let Some(proxy) = &self.proxy_config {
            for value in [&proxy.http_proxy, &proxy.https_proxy]
                .into_iter()
                .flatten()
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
            {
                ValidationErrorHandler::validate_proxy_url(value)?;
            }
        }
        Ok(())
    }
}

/// Writes a task's log lines to the ledger, the event bus and tracing
struct TaskReporter<'a> {
    handle: &'a TaskHandle,
    bus: &'a EventBus,
}

impl<'a> TaskReporter<'a> {
    fn new(handle: &'a TaskHandle, bus: &'a EventBus) -> Self {
        Self { handle, bus }
    }

    fn progress(&self) {
        let snapshot = self.handle.snapshot();
        self.bus.publish(SyncEvent::Progress {
            task_id: snapshot.id,
            progress: snapshot.progress,
            total: snapshot.total,
            current_image: snapshot.current_image,
            status: snapshot.status,
        });
    }

    /// Terminal failure of the whole run
    fn fail(&self, message: &str) {
        self.error(message);
        self.handle.transition(TaskStatus::Failed);
        self.progress();
    }
}

impl CopyLog for TaskReporter<'_> {
    fn log(&self, level: LogLevel, message: &str) {
        let entry = self.handle.append_log(level, message);
        // the enclosing span carries task_id
        debug!(level = ?level, "{}", message);
        self.bus.publish(SyncEvent::Log {
            task_id: self.handle.id().to_string(),
            log: entry,
        });
    }
}

/// Entry point for starting, observing and cancelling sync runs
#[derive(Clone)]
pub struct SyncOrchestrator {
    ledger: Arc<TaskLedger>,
    directory: Arc<RegistryDirectory>,
    copier: CopyOperation,
    bus: EventBus,
}

impl SyncOrchestrator {
    pub fn new(
        ledger: Arc<TaskLedger>,
        directory: Arc<RegistryDirectory>,
        runner: Arc<dyn ToolRunner>,
        tool: impl Into<String>,
    ) -> Self {
        Self {
            ledger,
            directory,
            copier: CopyOperation::new(runner, tool),
            bus: EventBus::default(),
        }
    }

    /// Orchestrator driving the real copy tool as configured
    pub fn from_config(config: &AppConfig, directory: RegistryDirectory) -> Self {
        Self::new(
            Arc::new(TaskLedger::new()),
            Arc::new(directory),
            Arc::new(ProcessRunner::new()),
            config.copy_tool.clone(),
        )
        .with_event_bus(EventBus::new(config.event_capacity))
        .with_default_export_dir(config.downloads_dir.clone())
    }

    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.bus = bus;
        self
    }

    pub fn with_default_export_dir(mut self, dir: impl Into<std::path::PathBuf>) -> Self {
        self.copier = self.copier.with_default_export_dir(dir);
        self
    }

    pub fn ledger(&self) -> &Arc<TaskLedger> {
        &self.ledger
    }

    pub fn directory(&self) -> &RegistryDirectory {
        &self.directory
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<SyncEvent> {
        self.bus.subscribe()
    }

    /// Validate and launch a run; returns the new task id
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, request: StartSyncRequest) -> Result<String> {
        request.validate()?;
        let images = request.normalized_images();
        let handle = self.ledger.create(images.len());
        self.spawn(handle, images, request)
    }

    /// Same as [`start`](Self::start) with a caller chosen task id
    pub fn start_with_id(&self, id: impl Into<String>, request: StartSyncRequest) -> Result<String> {
        request.validate()?;
        let images = request.normalized_images();
        let handle = self.ledger.create_with_id(id, images.len())?;
        self.spawn(handle, images, request)
    }

    /// Request cancellation; false when the task is unknown or already finished
    pub fn cancel(&self, id: &str) -> bool {
        match self.ledger.cancel(id) {
            Ok(cancelled) => {
                if cancelled {
                    info!(task_id = id, "Cancellation requested");
                }
                cancelled
            }
            Err(_) => false,
        }
    }

    pub fn snapshot(&self, id: &str) -> Option<TaskSnapshot> {
        self.ledger.snapshot(id)
    }

    /// Wait until the task's worker has finished and return its final state
    ///
    /// A cancelled task reports `Cancelled` right away, but this only resolves
    /// once the worker has written its closing log lines.
    pub async fn wait(&self, id: &str) -> Result<TaskSnapshot> {
        let handle = self
            .ledger
            .get(id)
            .ok_or_else(|| SyncError::TaskNotFound(id.to_string()))?;
        handle.finished().await;
        Ok(handle.snapshot())
    }

    fn spawn(&self, handle: TaskHandle, images: Vec<String>, request: StartSyncRequest) -> Result<String> {
        let id = handle.id().to_string();
        let span = info_span!("sync", task_id = %id, registry = %request.target_registry);
        let this = self.clone();

        tokio::spawn(
            async move {
                let worker = {
                    let this = this.clone();
                    let handle = handle.clone();
                    tokio::spawn(async move { this.run(&handle, &images, &request).await }.in_current_span())
                };
                if let Err(e) = worker.await {
                    TaskReporter::new(&handle, &this.bus)
                        .fail(&format!("Sync task aborted unexpectedly: {}", e));
                }
                handle.finish();
                debug!(status = %handle.status(), "Sync task finished");
            }
            .instrument(span),
        );

        debug!(task_id = %id, "Sync task spawned");
        Ok(id)
    }

    async fn run(&self, handle: &TaskHandle, images: &[String], request: &StartSyncRequest) {
        let reporter = TaskReporter::new(handle, &self.bus);

        if !handle.transition(TaskStatus::Running) {
            // cancelled before the worker got going
            reporter.warning("Sync cancelled before start");
            reporter.progress();
            return;
        }
        reporter.progress();

        let total = images.len();
        reporter.info(&format!("Starting sync of {} images", total));
        if request.source_auth.as_ref().and_then(SourceAuth::pair).is_some() {
            reporter.info("Source registry authentication configured");
        }
        if request.proxy_config.as_ref().is_some_and(|p| !p.is_empty()) {
            reporter.info("Proxy configuration enabled");
        }

        if !self.copier.is_tool_available() {
            reporter.fail(&format!(
                "{} not found, install it and make sure it is on PATH",
                self.copier.tool()
            ));
            return;
        }

        let Some(registry) = self.directory.find(&request.target_registry) else {
            reporter.fail(&SyncError::RegistryNotFound(request.target_registry.clone()).to_string());
            return;
        };
        reporter.info(&format!("Target registry: {} ({})", registry.name, registry.kind));

        let cancel = handle.cancellation_token();
        for (index, image) in images.iter().enumerate() {
            if handle.is_cancelled() {
                reporter.warning(&format!(
                    "Sync cancelled, {} of {} images not attempted",
                    total - index,
                    total
                ));
                reporter.progress();
                return;
            }

            handle.begin_image(image);
            reporter.info(&format!("Syncing image ({}/{}): {}", index + 1, total, image));

            let copy_request = CopyRequest {
                source_image: image,
                registry,
                replace_level: request.replace_level,
                source_auth: request.source_auth.as_ref(),
                proxy: request.proxy_config.as_ref(),
                target_project: request.target_project.as_deref(),
            };

            match self.copier.copy(&copy_request, &reporter, &cancel).await {
                CopyOutcome::Success(target) => {
                    handle.record_processed(image, true);
                    reporter.success(&format!("Synced {} -> {}", image, target));
                }
                CopyOutcome::Failure(reason) => {
                    handle.record_processed(image, false);
                    reporter.error(&format!("Failed to sync {}: {}", image, reason));
                }
                CopyOutcome::Cancelled => {
                    reporter.warning(&format!("Sync cancelled while copying {}", image));
                    reporter.progress();
                    return;
                }
            }
            reporter.progress();
        }

        let failed = handle.error_count();
        if failed == 0 {
            reporter.success(&format!("All {} images synced", total));
        } else {
            reporter.warning(&format!(
                "Sync completed, {} of {} images failed",
                failed, total
            ));
        }
        handle.transition(TaskStatus::Completed);
        reporter.progress();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_validation() {
        assert!(StartSyncRequest::new(Vec::<String>::new(), "harbor").validate().is_err());
        assert!(StartSyncRequest::new(["", "  "], "harbor").validate().is_err());
        assert!(StartSyncRequest::new(["nginx"], " ").validate().is_err());
        assert!(StartSyncRequest::new(["nginx"], "harbor").validate().is_ok());

        let bad_proxy = StartSyncRequest::new(["nginx"], "harbor").with_proxy(ProxyConfig {
            http_proxy: Some("not a url".into()),
            ..Default::default()
        });
        assert!(matches!(bad_proxy.validate(), Err(SyncError::Validation(_))));
    }

    #[test]
    fn test_normalized_images_drop_blanks() {
        let req = StartSyncRequest::new([" nginx:1.25 ", "", "redis"], "h");
        assert_eq!(req.normalized_images(), vec!["nginx:1.25", "redis"]);
    }

    #[test]
    fn test_request_deserializes_with_defaults() {
        let req: StartSyncRequest = serde_json::from_str(
            r#"{"images":["nginx"],"target_registry":"harbor","replace_level":"all"}"#,
        )
        .unwrap();
        assert_eq!(req.replace_level, ReplaceLevel::All);
        assert!(req.source_auth.is_none());

        let req: StartSyncRequest =
            serde_json::from_str(r#"{"images":["nginx"],"target_registry":"harbor"}"#).unwrap();
        assert_eq!(req.replace_level, ReplaceLevel::Levels(1));
    }
}
