//! Read-only views of remote objects as reported by an adapter

use crate::resource::{ResourceKind, ResourceStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Snapshot of a single remote object
///
/// Snapshots are never persisted; the reconciler copies the fields it owns
/// into local records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteSnapshot {
    /// Provider-wide identifier, the only reconciliation matching key
    pub global_id: String,

    pub kind: ResourceKind,

    /// Name as reported by the provider
    pub name: String,

    pub status: ResourceStatus,

    /// Remote project/tenant that owns the object, if the provider has one
    pub project_id: Option<String>,

    /// Parent objects by kind, as remote global ids
    pub parents: HashMap<ResourceKind, String>,

    /// Provider attributes (address, spec, size, ...)
    pub attributes: HashMap<String, serde_json::Value>,
}

impl RemoteSnapshot {
    pub fn new(
        kind: ResourceKind,
        global_id: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            global_id: global_id.into(),
            kind,
            name: name.into(),
            status: ResourceStatus::Ready,
            project_id: None,
            parents: HashMap::new(),
            attributes: HashMap::new(),
        }
    }

    pub fn with_status(mut self, status: ResourceStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn with_parent(mut self, kind: ResourceKind, global_id: impl Into<String>) -> Self {
        self.parents.insert(kind, global_id.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn get_attribute<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.attributes
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

/// Parameters for a remote create call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateSpec {
    pub name: String,

    /// Parent objects by kind, as remote global ids
    pub parents: HashMap<ResourceKind, String>,

    /// Kind-specific settings (size, placement, spec, ...)
    pub config: HashMap<String, serde_json::Value>,
}

impl CreateSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_parent(mut self, kind: ResourceKind, global_id: impl Into<String>) -> Self {
        self.parents.insert(kind, global_id.into());
        self
    }

    pub fn with_config(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.config.insert(key.into(), value);
        self
    }

    pub fn get_config<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.config
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}
