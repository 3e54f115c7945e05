//! Control plane error types
//!
//! Synchronous request errors (`InvalidParameter`, `Conflict`, `NotFound`)
//! surface to the caller. Everything raised inside a task stage or a sync pass
//! is recorded on the affected resource instead.

use nimbus_cloud::CloudError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ControlPlaneError {
    /// Bad input; never retried
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Uniqueness violation
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Missing referenced object
    #[error("Not found: {0}")]
    NotFound(String),

    /// Opaque remote failure
    #[error("Provider error: {0}")]
    Provider(#[from] CloudError),

    /// No placement candidate
    #[error("Schedule failed: {0}")]
    Schedule(String),

    #[error("Task failed: {0}")]
    TaskFailure(String),

    #[error("Lock acquisition failed: {0}")]
    Lock(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("State file error: {0}")]
    State(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ControlPlaneError {
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            ControlPlaneError::Timeout(_) | ControlPlaneError::Provider(CloudError::Timeout(_))
        )
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            ControlPlaneError::NotFound(_) => true,
            ControlPlaneError::Provider(e) => e.is_not_found(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, ControlPlaneError>;
