//! Copy operation: one image, one external tool invocation
//!
//! [`CopyOperation::copy`] resolves the destination for a source image,
//! prepares the tool call for the registry's policy, runs it through a
//! [`ToolRunner`] and folds the result into a [`CopyOutcome`]. Every step is
//! reported through a [`CopyLog`] so the caller decides where lines go.
//! Failures never escape as errors; they become log lines and a
//! [`CopyOutcome::Failure`].

pub mod command;
pub mod export;
pub mod runner;

pub use command::{Invocation, ProxyEnv};
pub use export::ArchiveCheck;
pub use runner::{ProcessRunner, RunStatus, ToolOutput, ToolRunner};

use crate::error::handlers::{LineSeverity, ToolErrorHandler};
use crate::image::{ReplaceLevel, registry_host, rewrite};
use crate::registry::policy::DEFAULT_COPY_TIMEOUT;
use crate::registry::{RegistryDescriptor, RegistryPolicy};
use crate::task::LogLevel;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub const DEFAULT_COPY_TOOL: &str = "skopeo";

/// Credentials for pulling from the source registry
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceAuth {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

impl SourceAuth {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Usable only when both halves are present
    pub fn pair(&self) -> Option<(&str, &str)> {
        if self.username.is_empty() || self.password.is_empty() {
            None
        } else {
            Some((&self.username, &self.password))
        }
    }
}

impl fmt::Debug for SourceAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceAuth")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Outbound proxy settings applied to the tool's environment only
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default)]
    pub http_proxy: Option<String>,
    #[serde(default)]
    pub https_proxy: Option<String>,
    /// Comma separated host list
    #[serde(default)]
    pub no_proxy: Option<String>,
}

impl ProxyConfig {
    pub fn is_empty(&self) -> bool {
        [&self.http_proxy, &self.https_proxy, &self.no_proxy]
            .iter()
            .all(|v| v.as_deref().map(str::trim).unwrap_or_default().is_empty())
    }
}

/// Result of copying one image
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopyOutcome {
    /// Target reference, or archive path for exports
    Success(String),
    Failure(String),
    /// Tool killed because the task was cancelled mid-copy
    Cancelled,
}

impl CopyOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, CopyOutcome::Success(_))
    }
}

/// Sink for the human readable lines produced while copying
pub trait CopyLog: Send + Sync {
    fn log(&self, level: LogLevel, message: &str);

    fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    fn warning(&self, message: &str) {
        self.log(LogLevel::Warning, message);
    }

    fn error(&self, message: &str) {
        self.log(LogLevel::Error, message);
    }

    fn success(&self, message: &str) {
        self.log(LogLevel::Success, message);
    }
}

/// Inputs for a single image copy
#[derive(Debug, Clone, Copy)]
pub struct CopyRequest<'a> {
    pub source_image: &'a str,
    pub registry: &'a RegistryDescriptor,
    pub replace_level: ReplaceLevel,
    pub source_auth: Option<&'a SourceAuth>,
    pub proxy: Option<&'a ProxyConfig>,
    pub target_project: Option<&'a str>,
}

/// Registry address as used in image references: no scheme, no trailing slash
pub fn registry_base(url: &str) -> &str {
    url.split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(url)
        .trim_end_matches('/')
}

/// `base/namespace/path`, without repeating a namespace the path already has
pub fn target_reference(registry_url: &str, namespace: &str, rewritten: &str) -> String {
    let base = registry_base(registry_url);
    let ns = namespace.trim_matches('/');
    if ns.is_empty() || rewritten.starts_with(&format!("{}/", ns)) {
        format!("{}/{}", base, rewritten)
    } else {
        format!("{}/{}/{}", base, ns, rewritten)
    }
}

/// Copies images with an external tool
#[derive(Clone)]
pub struct CopyOperation {
    runner: Arc<dyn ToolRunner>,
    tool: String,
    default_export_dir: PathBuf,
}

impl CopyOperation {
    pub fn new(runner: Arc<dyn ToolRunner>, tool: impl Into<String>) -> Self {
        Self {
            runner,
            tool: tool.into(),
            default_export_dir: PathBuf::from(crate::config::DEFAULT_DOWNLOADS_DIR),
        }
    }

    /// Directory used by `local_file` registries that leave `url` blank
    pub fn with_default_export_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.default_export_dir = dir.into();
        self
    }

    pub fn tool(&self) -> &str {
        &self.tool
    }

    pub fn is_tool_available(&self) -> bool {
        self.runner.is_available(&self.tool)
    }

    pub async fn copy(
        &self,
        request: &CopyRequest<'_>,
        log: &dyn CopyLog,
        cancel: &CancellationToken,
    ) -> CopyOutcome {
        log.info(&format!("Processing image: {}", request.source_image));

        if request.registry.is_local_file() {
            return export::export_image(self, request, log, cancel).await;
        }

        let registry = request.registry;
        let policy = registry.policy();

        let namespace = policy.resolve_namespace(registry, request.target_project);
        if request.target_project.map(str::trim).is_some_and(|p| !p.is_empty()) {
            log.info(&format!("Using requested project: {}", namespace));
        }
        log.info(&format!("Registry type: {}, namespace: {}", registry.kind, namespace));

        let rewritten = rewrite(request.source_image, &namespace, request.replace_level);
        log.info(&format!(
            "Rewritten path: {} (replace level {})",
            rewritten, request.replace_level
        ));

        let target = target_reference(&registry.url, &namespace, &rewritten);
        log.info(&format!("Target image: {}", target));

        if let Some(vendor) = policy.vendor {
            log.info(&format!("Detected {} registry, applying vendor settings", vendor.label));
        }

        match request.source_auth.and_then(SourceAuth::pair) {
            Some((user, _)) => log.info(&format!("Using source credentials for {}", user)),
            None => log.info("Source credentials not provided, pulling anonymously"),
        }
        match registry.credentials() {
            Some((user, _)) => log.info(&format!("Using destination credentials for {}", user)),
            None => log.warning("Destination credentials not configured"),
        }

        let mut invocation = command::push_invocation(
            &self.tool,
            request.source_image,
            &target,
            &policy,
            registry.credentials(),
            request.source_auth,
        );
        log.info(&format!("Executing: {}", invocation.redacted()));

        if let Some(proxy) = request.proxy.filter(|p| !p.is_empty()) {
            let env = ProxyEnv::build(proxy, Some(registry_host(&registry.url)));
            log_proxy(log, proxy);
            if let Some(host) = &env.auto_excluded {
                log.info(&format!("Added destination registry to proxy exclusions: {}", host));
            }
            invocation = invocation.envs(env.vars);
        }

        if invocation.timeout != DEFAULT_COPY_TIMEOUT {
            log.info(&format!("Copy timeout: {}s", invocation.timeout.as_secs()));
        }

        let output = match self.runner.run(&invocation, cancel).await {
            Ok(output) => output,
            Err(e) => {
                let reason = format!("Failed to start {}: {}", self.tool, e);
                log.error(&reason);
                return CopyOutcome::Failure(reason);
            }
        };

        self.fold_push_output(&output, request.source_image, &target, &policy, log)
    }

    fn fold_push_output(
        &self,
        output: &ToolOutput,
        source: &str,
        target: &str,
        policy: &RegistryPolicy,
        log: &dyn CopyLog,
    ) -> CopyOutcome {
        for line in output.stdout_lines() {
            log.info(&format!("  {}", line));
        }
        for line in output.stderr_lines() {
            match ToolErrorHandler::classify_line(line) {
                LineSeverity::Network => log.error(&format!("  Network error: {}", line)),
                LineSeverity::Other => log.warning(&format!("  {}", line)),
            }
        }

        match output.status {
            RunStatus::Exited(Some(0)) => {
                debug!(source = %source, target = %target, "Copy finished");
                log.success("Image synchronized");
                log.info(&format!("  Source: {}", source));
                log.info(&format!("  Target: {}", target));
                CopyOutcome::Success(target.to_string())
            }
            RunStatus::Exited(code) => {
                log.info(&match code {
                    Some(code) => format!("Command finished with exit code {}", code),
                    None => "Command terminated by a signal".to_string(),
                });
                let hint = policy.vendor_hint();
                let kind = ToolErrorHandler::classify_failure(&output.stderr, hint);
                let lines = ToolErrorHandler::guidance(kind, hint, code, &self.tool);
                for line in &lines {
                    log.error(line);
                }
                CopyOutcome::Failure(lines.into_iter().next().unwrap_or_default())
            }
            RunStatus::TimedOut => {
                let lines = ToolErrorHandler::timeout_guidance(policy.timeout);
                for line in &lines {
                    log.error(line);
                }
                CopyOutcome::Failure(lines.into_iter().next().unwrap_or_default())
            }
            RunStatus::Cancelled => {
                log.warning("Copy interrupted by cancellation");
                CopyOutcome::Cancelled
            }
        }
    }

    pub(crate) fn runner(&self) -> &dyn ToolRunner {
        self.runner.as_ref()
    }

    pub(crate) fn default_export_dir(&self) -> &PathBuf {
        &self.default_export_dir
    }
}

fn log_proxy(log: &dyn CopyLog, proxy: &ProxyConfig) {
    if let Some(http) = proxy.http_proxy.as_deref().filter(|v| !v.trim().is_empty()) {
        log.info(&format!("HTTP proxy: {}", http));
    }
    if let Some(https) = proxy.https_proxy.as_deref().filter(|v| !v.trim().is_empty()) {
        log.info(&format!("HTTPS proxy: {}", https));
    }
    if let Some(no_proxy) = proxy.no_proxy.as_deref().filter(|v| !v.trim().is_empty()) {
        log.info(&format!("No proxy: {}", no_proxy));
    }
}
