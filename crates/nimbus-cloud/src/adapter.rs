//! Cloud adapter trait definition

use crate::error::Result;
use crate::resource::ResourceKind;
use crate::snapshot::{CreateSpec, RemoteSnapshot};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Cloud adapter abstraction trait
///
/// Every vendor client (Sakura Cloud, the in-memory provider, ...) implements
/// this trait. The reconciler and the task engine only ever see
/// `Arc<dyn CloudAdapter>`, never a concrete vendor type.
///
/// Mutating calls are synchronous from the caller's point of view: they return
/// once the provider accepted or rejected the request. Callers classify
/// failures with [`crate::CloudError::is_retryable`].
#[async_trait]
pub trait CloudAdapter: Send + Sync {
    /// Returns the provider name (e.g., "sakura-cloud", "memory")
    fn name(&self) -> &str;

    /// Returns the provider display name for UI
    fn display_name(&self) -> &str;

    /// Resource kinds this adapter can list and manage
    fn capabilities(&self) -> &[ResourceKind];

    fn supports(&self, kind: ResourceKind) -> bool {
        self.capabilities().contains(&kind)
    }

    /// Check if the provider is properly configured and authenticated
    async fn check_auth(&self) -> Result<AuthStatus>;

    /// List every remote object of `kind` visible to this credential
    async fn list(&self, kind: ResourceKind) -> Result<Vec<RemoteSnapshot>>;

    /// Fetch a single object; fails with `ResourceNotFound` when absent
    async fn get(&self, kind: ResourceKind, global_id: &str) -> Result<RemoteSnapshot>;

    /// Create a remote object and return its first snapshot
    async fn create(&self, kind: ResourceKind, spec: &CreateSpec) -> Result<RemoteSnapshot>;

    /// Delete a remote object
    async fn delete(&self, kind: ResourceKind, global_id: &str) -> Result<()>;
}

/// Authentication status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthStatus {
    /// Whether authentication is valid
    pub authenticated: bool,

    /// Account/user information if available
    pub account_info: Option<String>,

    /// Error message if not authenticated
    pub error: Option<String>,
}

impl AuthStatus {
    pub fn ok(account_info: impl Into<String>) -> Self {
        Self {
            authenticated: true,
            account_info: Some(account_info.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            authenticated: false,
            account_info: None,
            error: Some(error.into()),
        }
    }
}
