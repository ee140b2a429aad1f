//! Error types and handlers for sync operations

pub mod handlers;

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Request rejected before any task was created
    #[error("Validation error: {0}")]
    Validation(String),

    /// Invalid or unreadable configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Target registry name not present in the directory
    #[error("Registry not found: {0}")]
    RegistryNotFound(String),

    /// The external copy tool could not be located or started
    #[error("Copy tool unavailable: {0}")]
    ToolUnavailable(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Anything that should never happen during a run
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<tokio::task::JoinError> for SyncError {
    fn from(err: tokio::task::JoinError) -> Self {
        SyncError::Internal(format!("Worker task failed: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = SyncError::RegistryNotFound("harbor-prod".into());
        assert_eq!(err.to_string(), "Registry not found: harbor-prod");

        let io: SyncError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert!(io.to_string().starts_with("IO error:"));
    }
}
