//! Adapters by credential

use crate::error::{ControlPlaneError, Result};
use nimbus_cloud::CloudAdapter;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Maps a `manager_id` to the adapter that talks to that credential
#[derive(Default, Clone)]
pub struct AdapterRegistry {
    adapters: BTreeMap<String, Arc<dyn CloudAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, manager_id: impl Into<String>, adapter: Arc<dyn CloudAdapter>) {
        let manager_id = manager_id.into();
        tracing::debug!("Registered {} adapter as {}", adapter.name(), manager_id);
        self.adapters.insert(manager_id, adapter);
    }

    pub fn with(mut self, manager_id: impl Into<String>, adapter: Arc<dyn CloudAdapter>) -> Self {
        self.register(manager_id, adapter);
        self
    }

    pub fn get(&self, manager_id: &str) -> Result<Arc<dyn CloudAdapter>> {
        self.adapters
            .get(manager_id)
            .cloned()
            .ok_or_else(|| ControlPlaneError::NotFound(format!("manager {}", manager_id)))
    }

    pub fn manager_ids(&self) -> impl Iterator<Item = &str> {
        self.adapters.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nimbus_cloud::MemoryAdapter;

    #[test]
    fn test_lookup_by_manager() {
        let registry = AdapterRegistry::new().with("m1", Arc::new(MemoryAdapter::named("mem-a")));
        assert_eq!(registry.get("m1").unwrap().name(), "mem-a");
        assert!(matches!(
            registry.get("m2"),
            Err(ControlPlaneError::NotFound(_))
        ));
        assert_eq!(registry.manager_ids().collect::<Vec<_>>(), vec!["m1"]);
    }
}
