//! Application settings with environment overrides

use crate::copy::DEFAULT_COPY_TOOL;
use crate::error::{Result, SyncError};
use crate::events::DEFAULT_EVENT_CAPACITY;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_REGISTRIES_FILE: &str = "config/registries.yaml";
pub const DEFAULT_DOWNLOADS_DIR: &str = "downloads";
pub const DEFAULT_MAX_FILE_AGE_HOURS: u64 = 24;
pub const DEFAULT_MAX_FILES: usize = 100;
pub const DEFAULT_CLEANUP_INTERVAL_HOURS: u64 = 6;
/// Upper bound for hour settings, one hundred years
pub const MAX_HOURS: u64 = 24 * 365 * 100;

pub const ENV_COPY_TOOL: &str = "IMAGE_SYNC_COPY_TOOL";
pub const ENV_REGISTRIES_FILE: &str = "IMAGE_SYNC_REGISTRIES";
pub const ENV_DOWNLOADS_DIR: &str = "IMAGE_SYNC_DOWNLOADS_DIR";
pub const ENV_MAX_FILE_AGE: &str = "MAX_FILE_AGE";
pub const ENV_MAX_FILES: &str = "MAX_FILES";
pub const ENV_CLEANUP_INTERVAL: &str = "CLEANUP_INTERVAL";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Executable used for copies and exports
    pub copy_tool: String,
    pub registries_file: PathBuf,
    /// Where `local_file` registries without a path write archives
    pub downloads_dir: PathBuf,
    pub max_file_age_hours: u64,
    pub max_files: usize,
    pub cleanup_interval_hours: u64,
    pub event_capacity: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            copy_tool: DEFAULT_COPY_TOOL.to_string(),
            registries_file: PathBuf::from(DEFAULT_REGISTRIES_FILE),
            downloads_dir: PathBuf::from(DEFAULT_DOWNLOADS_DIR),
            max_file_age_hours: DEFAULT_MAX_FILE_AGE_HOURS,
            max_files: DEFAULT_MAX_FILES,
            cleanup_interval_hours: DEFAULT_CLEANUP_INTERVAL_HOURS,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl AppConfig {
    /// Defaults overridden by the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(tool) = get(ENV_COPY_TOOL) {
            config.copy_tool = tool;
        }
        if let Some(path) = get(ENV_REGISTRIES_FILE) {
            config.registries_file = PathBuf::from(path);
        }
        if let Some(dir) = get(ENV_DOWNLOADS_DIR) {
            config.downloads_dir = PathBuf::from(dir);
        }
        if let Some(hours) = get(ENV_MAX_FILE_AGE) {
            config.max_file_age_hours = parse_number(ENV_MAX_FILE_AGE, &hours)?;
        }
        if let Some(count) = get(ENV_MAX_FILES) {
            config.max_files = parse_number(ENV_MAX_FILES, &count)?;
        }
        if let Some(hours) = get(ENV_CLEANUP_INTERVAL) {
            config.cleanup_interval_hours = parse_number(ENV_CLEANUP_INTERVAL, &hours)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.copy_tool.trim().is_empty() {
            return Err(SyncError::Config("Copy tool cannot be empty".to_string()));
        }
        if hours_duration(self.max_file_age_hours).is_none() {
            return Err(SyncError::Config(format!(
                "MAX_FILE_AGE must be between 1 and {} hours",
                MAX_HOURS
            )));
        }
        if hours_duration(self.cleanup_interval_hours).is_none() {
            return Err(SyncError::Config(format!(
                "CLEANUP_INTERVAL must be between 1 and {} hours",
                MAX_HOURS
            )));
        }
        if self.max_files == 0 {
            return Err(SyncError::Config("MAX_FILES must be at least 1".to_string()));
        }
        if self.event_capacity == 0 {
            return Err(SyncError::Config("Event capacity must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn max_file_age(&self) -> Duration {
        Duration::from_secs(self.max_file_age_hours.saturating_mul(3600))
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_hours.saturating_mul(3600))
    }
}

/// `hours` as a duration, or `None` outside `1..=MAX_HOURS`
pub fn hours_duration(hours: u64) -> Option<Duration> {
    if hours == 0 || hours > MAX_HOURS {
        return None;
    }
    hours.checked_mul(3600).map(Duration::from_secs)
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| SyncError::Config(format!("{} must be a non-negative integer, got '{}'", key, value)))
}
