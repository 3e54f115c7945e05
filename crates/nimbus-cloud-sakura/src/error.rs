//! Sakura Cloud adapter error types

use nimbus_cloud::CloudError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SakuraError {
    #[error("usacloud not found. Please install: brew install usacloud")]
    UsacloudNotFound,

    #[error("usacloud authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("usacloud command failed: {0}")]
    CommandFailed(String),

    #[error("Server not found: {0}")]
    ServerNotFound(String),

    #[error("Disk not found: {0}")]
    DiskNotFound(String),

    #[error("Zone not found: {0}")]
    ZoneNotFound(String),

    #[error("Unsupported resource kind: {0}")]
    UnsupportedKind(String),

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl SakuraError {
    /// usacloud reports throttling and lock contention on the API side with
    /// these markers in stderr.
    fn is_transient(message: &str) -> bool {
        let lower = message.to_lowercase();
        ["429", "503", "too many requests", "still in use", "timeout"]
            .iter()
            .any(|marker| lower.contains(marker))
    }
}

impl From<SakuraError> for CloudError {
    fn from(err: SakuraError) -> Self {
        match err {
            SakuraError::ServerNotFound(id)
            | SakuraError::DiskNotFound(id)
            | SakuraError::ZoneNotFound(id) => CloudError::ResourceNotFound(id),
            SakuraError::UsacloudNotFound => CloudError::InvalidConfig(err.to_string()),
            SakuraError::AuthenticationFailed(msg) => CloudError::AuthenticationFailed(msg),
            SakuraError::CommandFailed(msg) if msg.contains("404") => {
                CloudError::ResourceNotFound(msg)
            }
            SakuraError::CommandFailed(msg) if SakuraError::is_transient(&msg) => {
                CloudError::Transient(msg)
            }
            SakuraError::CommandFailed(msg) => CloudError::CommandFailed(msg),
            SakuraError::UnsupportedKind(kind) => CloudError::Unsupported(kind),
            SakuraError::JsonError(e) => CloudError::Json(e),
            SakuraError::IoError(e) => CloudError::Io(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, SakuraError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_failure_classification() {
        let err: CloudError = SakuraError::CommandFailed("HTTP 429 Too Many Requests".into()).into();
        assert!(err.is_retryable());

        let err: CloudError = SakuraError::CommandFailed("HTTP 404 not found".into()).into();
        assert!(err.is_not_found());

        let err: CloudError = SakuraError::CommandFailed("invalid plan".into()).into();
        assert!(!err.is_retryable());
    }
}
