//! Diagnostic tracing setup
//!
//! Console output meant for operators goes through [`crate::output::OutputManager`].
//! This module only wires `tracing` events from the engine to stderr.
//!
//! Filtering follows `RUST_LOG`; without it the level is `warn`, `error` in
//! quiet mode, or `debug` when verbose output was requested. Task log lines
//! are already printed by the console, so they are only traced at `debug`.
//! `RUST_LOG_FORMAT=json` switches to JSON lines.

use crate::error::{Result, SyncError};
use std::str::FromStr;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Compact,
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "compact" | "" => Ok(LogFormat::Compact),
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(SyncError::Config(format!("Unknown log format: {}", other))),
        }
    }
}

pub fn default_filter(verbose: bool, quiet: bool) -> &'static str {
    match (verbose, quiet) {
        (true, _) => "debug",
        (false, true) => "error",
        (false, false) => "warn",
    }
}

/// Install the global subscriber; fails if one is already installed
pub fn init_tracing(verbose: bool, quiet: bool, format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(verbose, quiet)));
    let registry = tracing_subscriber::registry().with(env_filter);

    let installed = match format {
        LogFormat::Json => registry
            .with(fmt::layer().with_writer(std::io::stderr).with_ansi(false).json())
            .try_init(),
        LogFormat::Pretty => registry
            .with(fmt::layer().with_writer(std::io::stderr).pretty())
            .try_init(),
        LogFormat::Compact => registry
            .with(fmt::layer().with_writer(std::io::stderr).compact())
            .try_init(),
    };
    installed.map_err(|e| SyncError::Internal(format!("Failed to initialize tracing: {}", e)))
}

/// Format from `RUST_LOG_FORMAT`, compact when unset
pub fn format_from_env() -> Result<LogFormat> {
    std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.parse())
        .unwrap_or(Ok(LogFormat::Compact))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_parsing() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("Pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert_eq!("".parse::<LogFormat>().unwrap(), LogFormat::Compact);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_default_filter() {
        assert_eq!(default_filter(true, false), "debug");
        assert_eq!(default_filter(false, false), "warn");
        assert_eq!(default_filter(false, true), "error");
        // verbose wins when both flags are given
        assert_eq!(default_filter(true, true), "debug");
    }
}
