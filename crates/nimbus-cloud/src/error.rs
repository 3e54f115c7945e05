//! Cloud adapter error types

use thiserror::Error;

/// Errors raised by cloud adapters
#[derive(Error, Debug)]
pub enum CloudError {
    #[error("Provider not found: {0}")]
    ProviderNotFound(String),

    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("Resource already exists: {0}")]
    ResourceAlreadyExists(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("API error: {0}")]
    ApiError(String),

    /// Remote failure the provider reported as temporary (throttling, busy)
    #[error("Transient provider error: {0}")]
    Transient(String),

    #[error("Command execution failed: {0}")]
    CommandFailed(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CloudError {
    /// Whether a caller may reasonably try the same call again.
    ///
    /// Classification is coarse; call sites decide whether they actually retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CloudError::Transient(_) | CloudError::Timeout(_) | CloudError::Io(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CloudError::ResourceNotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, CloudError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(CloudError::Transient("busy".into()).is_retryable());
        assert!(CloudError::Timeout("slow".into()).is_retryable());
        assert!(!CloudError::ApiError("bad request".into()).is_retryable());
        assert!(!CloudError::ResourceNotFound("x".into()).is_retryable());
        assert!(CloudError::ResourceNotFound("x".into()).is_not_found());
    }
}
