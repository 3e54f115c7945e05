//! Assembly of the control plane

use crate::audit::AuditLog;
use crate::error::Result;
use crate::inventory::Inventory;
use crate::lock::LockManager;
use crate::notify::{LogNotifier, Notifier};
use crate::quota::{MemoryQuotaLedger, QuotaLedger};
use crate::reconcile::{DeferredDeletePolicy, Reconciler};
use crate::registry::AdapterRegistry;
use crate::scheduler::{SchedulerClient, UnavailableScheduler};
use crate::services::Services;
use crate::task::{TaskEngine, TaskRegistry, TaskStore};
use nimbus_cloud::PollConfig;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Inventory, reconciler and task engine sharing one set of services
pub struct ControlPlane {
    services: Arc<Services>,
    reconciler: Reconciler,
    tasks: TaskEngine,
}

impl ControlPlane {
    pub fn builder() -> ControlPlaneBuilder {
        ControlPlaneBuilder::default()
    }

    pub fn services(&self) -> &Arc<Services> {
        &self.services
    }

    pub fn inventory(&self) -> &Inventory {
        &self.services.inventory
    }

    pub fn audit(&self) -> &AuditLog {
        &self.services.audit
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub fn tasks(&self) -> &TaskEngine {
        &self.tasks
    }
}

pub struct ControlPlaneBuilder {
    adapters: AdapterRegistry,
    notifier: Arc<dyn Notifier>,
    quota: Arc<dyn QuotaLedger>,
    scheduler: Arc<dyn SchedulerClient>,
    state_dir: Option<PathBuf>,
    lock_timeout: Duration,
    poll: PollConfig,
    deferred_delete: DeferredDeletePolicy,
    registry: TaskRegistry,
    audit_capacity: Option<usize>,
}

impl Default for ControlPlaneBuilder {
    fn default() -> Self {
        Self {
            adapters: AdapterRegistry::new(),
            notifier: Arc::new(LogNotifier),
            quota: Arc::new(MemoryQuotaLedger::new()),
            scheduler: Arc::new(UnavailableScheduler),
            state_dir: None,
            lock_timeout: Duration::from_secs(30),
            poll: PollConfig::default(),
            deferred_delete: DeferredDeletePolicy::default(),
            registry: TaskRegistry::default(),
            audit_capacity: None,
        }
    }
}

impl ControlPlaneBuilder {
    pub fn adapters(mut self, adapters: AdapterRegistry) -> Self {
        self.adapters = adapters;
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn quota(mut self, quota: Arc<dyn QuotaLedger>) -> Self {
        self.quota = quota;
        self
    }

    pub fn scheduler(mut self, scheduler: Arc<dyn SchedulerClient>) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Persist tasks and records under `dir`; both are kept in memory only when unset
    pub fn state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = Some(dir.into());
        self
    }

    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn poll(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    pub fn deferred_delete(mut self, policy: DeferredDeletePolicy) -> Self {
        self.deferred_delete = policy;
        self
    }

    pub fn task_registry(mut self, registry: TaskRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn audit_capacity(mut self, capacity: usize) -> Self {
        self.audit_capacity = Some(capacity);
        self
    }

    pub async fn build(self) -> Result<ControlPlane> {
        let (store, inventory) = match &self.state_dir {
            Some(dir) => (TaskStore::open(dir).await?, Inventory::open(dir)?),
            None => (TaskStore::in_memory(), Inventory::new()),
        };

        let services = Arc::new(Services {
            inventory,
            locks: LockManager::new(self.lock_timeout),
            audit: self
                .audit_capacity
                .map(AuditLog::with_capacity)
                .unwrap_or_default(),
            adapters: self.adapters,
            notifier: self.notifier,
            quota: self.quota,
            scheduler: self.scheduler,
            poll: self.poll,
        });

        Ok(ControlPlane {
            reconciler: Reconciler::new(services.clone(), self.deferred_delete),
            tasks: TaskEngine::new(services.clone(), Arc::new(store), self.registry),
            services,
        })
    }
}
