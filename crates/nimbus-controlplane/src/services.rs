//! Shared collaborators of the reconciler and the task engine

use crate::audit::AuditLog;
use crate::inventory::Inventory;
use crate::lock::LockManager;
use crate::notify::{Notification, Notifier};
use crate::quota::QuotaLedger;
use crate::record::ResourceRecord;
use crate::registry::AdapterRegistry;
use crate::scheduler::SchedulerClient;
use nimbus_cloud::PollConfig;
use std::sync::Arc;

pub struct Services {
    pub inventory: Inventory,
    pub locks: LockManager,
    pub audit: AuditLog,
    pub adapters: AdapterRegistry,
    pub notifier: Arc<dyn Notifier>,
    pub quota: Arc<dyn QuotaLedger>,
    pub scheduler: Arc<dyn SchedulerClient>,
    pub poll: PollConfig,
}

impl Services {
    pub fn notify_failure(&self, record: &ResourceRecord, reason: &str) {
        self.notifier.notify(Notification {
            resource_id: record.local_id.clone(),
            resource_kind: record.kind,
            resource_name: record.name.clone(),
            status: record.status,
            reason: reason.to_string(),
        });
    }
}
