//! In-memory provider
//!
//! Keeps remote objects in process memory. Used as the `memory` provider for
//! local dry runs and as the remote side in tests. Failures can be injected
//! per kind and operation.

use crate::adapter::{AuthStatus, CloudAdapter};
use crate::error::{CloudError, Result};
use crate::resource::{ResourceKind, ResourceStatus};
use crate::snapshot::{CreateSpec, RemoteSnapshot};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Adapter operation, used to target injected failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryOp {
    List,
    Get,
    Create,
    Delete,
}

#[derive(Default)]
struct MemoryState {
    objects: BTreeMap<(ResourceKind, String), RemoteSnapshot>,
    initial_status: Option<ResourceStatus>,
    failures: HashMap<(ResourceKind, MemoryOp), CloudErrorTemplate>,
}

#[derive(Clone)]
enum CloudErrorTemplate {
    Api(String),
    Transient(String),
}

impl CloudErrorTemplate {
    fn build(&self) -> CloudError {
        match self {
            CloudErrorTemplate::Api(msg) => CloudError::ApiError(msg.clone()),
            CloudErrorTemplate::Transient(msg) => CloudError::Transient(msg.clone()),
        }
    }
}

/// In-memory cloud adapter
pub struct MemoryAdapter {
    name: String,
    capabilities: Vec<ResourceKind>,
    state: Mutex<MemoryState>,
}

impl Default for MemoryAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::named("memory")
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            capabilities: ResourceKind::ALL.to_vec(),
            state: Mutex::new(MemoryState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_failure(&self, kind: ResourceKind, op: MemoryOp) -> Result<()> {
        match self.state().failures.get(&(kind, op)) {
            Some(template) => Err(template.build()),
            None => Ok(()),
        }
    }

    /// Add or replace a remote object
    pub fn insert(&self, snapshot: RemoteSnapshot) {
        self.state()
            .objects
            .insert((snapshot.kind, snapshot.global_id.clone()), snapshot);
    }

    /// Remove a remote object behind the control plane's back
    pub fn remove(&self, kind: ResourceKind, global_id: &str) -> Option<RemoteSnapshot> {
        self.state().objects.remove(&(kind, global_id.to_string()))
    }

    pub fn set_status(&self, kind: ResourceKind, global_id: &str, status: ResourceStatus) {
        if let Some(obj) = self.state().objects.get_mut(&(kind, global_id.to_string())) {
            obj.status = status;
        }
    }

    /// Status newly created objects start in (defaults to `Ready`)
    pub fn set_initial_status(&self, status: ResourceStatus) {
        self.state().initial_status = Some(status);
    }

    /// Make every `op` on `kind` fail with a fatal API error
    pub fn fail(&self, kind: ResourceKind, op: MemoryOp, message: impl Into<String>) {
        self.state()
            .failures
            .insert((kind, op), CloudErrorTemplate::Api(message.into()));
    }

    /// Make every `op` on `kind` fail with a retryable error
    pub fn fail_transient(&self, kind: ResourceKind, op: MemoryOp, message: impl Into<String>) {
        self.state()
            .failures
            .insert((kind, op), CloudErrorTemplate::Transient(message.into()));
    }

    pub fn clear_failures(&self) {
        self.state().failures.clear();
    }

    pub fn snapshots(&self, kind: ResourceKind) -> Vec<RemoteSnapshot> {
        self.state()
            .objects
            .values()
            .filter(|s| s.kind == kind)
            .cloned()
            .collect()
    }

    pub fn contains(&self, kind: ResourceKind, global_id: &str) -> bool {
        self.state()
            .objects
            .contains_key(&(kind, global_id.to_string()))
    }
}

#[async_trait]
impl CloudAdapter for MemoryAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn display_name(&self) -> &str {
        "In-memory provider"
    }

    fn capabilities(&self) -> &[ResourceKind] {
        &self.capabilities
    }

    async fn check_auth(&self) -> Result<AuthStatus> {
        Ok(AuthStatus::ok(self.name.clone()))
    }

    async fn list(&self, kind: ResourceKind) -> Result<Vec<RemoteSnapshot>> {
        self.check_failure(kind, MemoryOp::List)?;
        Ok(self.snapshots(kind))
    }

    async fn get(&self, kind: ResourceKind, global_id: &str) -> Result<RemoteSnapshot> {
        self.check_failure(kind, MemoryOp::Get)?;
        self.state()
            .objects
            .get(&(kind, global_id.to_string()))
            .cloned()
            .ok_or_else(|| CloudError::ResourceNotFound(format!("{} {}", kind, global_id)))
    }

    async fn create(&self, kind: ResourceKind, spec: &CreateSpec) -> Result<RemoteSnapshot> {
        self.check_failure(kind, MemoryOp::Create)?;
        let mut state = self.state();
        let global_id = format!("{}-{}", kind, uuid::Uuid::new_v4());
        let mut snapshot = RemoteSnapshot::new(kind, global_id.clone(), spec.name.clone())
            .with_status(state.initial_status.unwrap_or(ResourceStatus::Ready));
        snapshot.parents = spec.parents.clone();
        snapshot.attributes = spec.config.clone();
        state.objects.insert((kind, global_id), snapshot.clone());
        tracing::debug!("memory: created {} {}", kind, snapshot.global_id);
        Ok(snapshot)
    }

    async fn delete(&self, kind: ResourceKind, global_id: &str) -> Result<()> {
        self.check_failure(kind, MemoryOp::Delete)?;
        self.state()
            .objects
            .remove(&(kind, global_id.to_string()))
            .map(|_| ())
            .ok_or_else(|| CloudError::ResourceNotFound(format!("{} {}", kind, global_id)))
    }
}
