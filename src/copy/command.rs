//! Construction of copy tool invocations
//!
//! Everything here is pure: arguments, child environment and the redacted
//! form used for logging are computed up front so they can be asserted on
//! without spawning anything.

use super::{ProxyConfig, SourceAuth};
use crate::registry::RegistryPolicy;
use std::fmt;
use std::time::Duration;

/// Transfer format requested for network copies
pub const TRANSFER_FORMAT: &str = "v2s2";

/// A fully prepared external tool call
#[derive(Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    /// Variables added to the child environment only
    pub env: Vec<(String, String)>,
    pub timeout: Duration,
    /// Positions in `args` holding `user:pass` values
    secret_args: Vec<usize>,
}

impl Invocation {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            timeout,
            secret_args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Add a `--flag user:pass` pair; the password never shows up in `redacted()`
    pub fn credential(mut self, flag: &str, username: &str, password: &str) -> Self {
        self.args.push(flag.to_string());
        self.secret_args.push(self.args.len());
        self.args.push(format!("{}:{}", username, password));
        self
    }

    pub fn envs(mut self, vars: Vec<(String, String)>) -> Self {
        self.env.extend(vars);
        self
    }

    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Command line safe for logs, credentials shown as `user:***`
    pub fn redacted(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        for (i, arg) in self.args.iter().enumerate() {
            if self.secret_args.contains(&i) {
                let user = arg.split_once(':').map(|(u, _)| u).unwrap_or_default();
                parts.push(format!("{}:***", user));
            } else {
                parts.push(arg.clone());
            }
        }
        parts.join(" ")
    }
}

impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation")
            .field("command", &self.redacted())
            .field("env", &self.env)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Child environment derived from a [`ProxyConfig`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxyEnv {
    pub vars: Vec<(String, String)>,
    /// Destination host added to the exclusion list by us
    pub auto_excluded: Option<String>,
}

impl ProxyEnv {
    /// Both spellings of each variable are set since tools disagree on case
    pub fn build(proxy: &ProxyConfig, exclude_host: Option<&str>) -> Self {
        let mut env = ProxyEnv::default();

        if let Some(http) = non_blank(proxy.http_proxy.as_deref()) {
            env.push_pair("HTTP_PROXY", http);
        }
        if let Some(https) = non_blank(proxy.https_proxy.as_deref()) {
            env.push_pair("HTTPS_PROXY", https);
        }

        let mut exclusions: Vec<String> = proxy
            .no_proxy
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .map(str::to_string)
            .collect();

        if let Some(host) = non_blank(exclude_host) {
            if !exclusions.iter().any(|h| h == host) {
                exclusions.push(host.to_string());
                env.auto_excluded = Some(host.to_string());
            }
        }

        if !exclusions.is_empty() {
            env.push_pair("NO_PROXY", &exclusions.join(","));
        }
        env
    }

    fn push_pair(&mut self, upper: &str, value: &str) {
        self.vars.push((upper.to_string(), value.to_string()));
        self.vars.push((upper.to_lowercase(), value.to_string()));
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn with_source_creds(invocation: Invocation, auth: Option<&SourceAuth>) -> Invocation {
    match auth.and_then(SourceAuth::pair) {
        Some((user, pass)) => invocation.credential("--src-creds", user, pass),
        None => invocation,
    }
}

/// `copy` between two registries
pub fn push_invocation(
    tool: &str,
    source_image: &str,
    target_reference: &str,
    policy: &RegistryPolicy,
    destination_creds: Option<(&str, &str)>,
    source_auth: Option<&SourceAuth>,
) -> Invocation {
    let invocation = Invocation::new(tool, policy.timeout)
        .args([
            "copy",
            "--dest-tls-verify=false",
            "--src-tls-verify=false",
            "--format",
            TRANSFER_FORMAT,
        ])
        .args(policy.extra_copy_args.iter().copied());

    let mut invocation = with_source_creds(invocation, source_auth);
    if let Some((user, pass)) = destination_creds {
        invocation = invocation.credential("--dest-creds", user, pass);
    }

    invocation
        .arg(format!("docker://{}", source_image))
        .arg(format!("docker://{}", target_reference))
}

/// `copy` from a registry into a `docker-archive` file
pub fn export_invocation(
    tool: &str,
    source_image: &str,
    archive_destination: &str,
    timeout: Duration,
    source_auth: Option<&SourceAuth>,
) -> Invocation {
    let invocation = Invocation::new(tool, timeout).args(["copy", "--src-tls-verify=false"]);
    with_source_creds(invocation, source_auth)
        .arg(format!("docker://{}", source_image))
        .arg(archive_destination.to_string())
}
