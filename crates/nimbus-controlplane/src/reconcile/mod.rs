//! Inventory reconciliation
//!
//! A sync pass brings the local records of one scope in line with what the
//! provider reports. It runs under the class lock of the scope's kind and
//! owner; each record is then changed under its own object lock, so a pass
//! never interleaves with a task stage writing the same record.
//!
//! ```text
//! remote list ──┐
//!               ├─ compare_sets ─┬─ removed ─▶ delete / mark unknown / defer
//! local records ┘                ├─ common  ─▶ copy remote-owned fields
//!                                └─ added   ─▶ import with a unique name
//! ```

mod compare;
mod result;

pub use compare::{Partition, compare_sets};
pub use result::{SyncCandidates, SyncResult};

use crate::audit::AuditAction;
use crate::error::{ControlPlaneError, Result};
use crate::record::ResourceRecord;
use crate::services::Services;
use chrono::{DateTime, Utc};
use nimbus_cloud::{RemoteSnapshot, ResourceKind, ResourceStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Reason stamped on records whose deletion is blocked by dependents
pub const SYNC_DELETE_REASON: &str = "sync to delete";

/// Reconciliation order: parents are imported before their children so that
/// parent references resolve in the same round
pub const SYNC_ORDER: [ResourceKind; 10] = [
    ResourceKind::Zone,
    ResourceKind::Host,
    ResourceKind::Storage,
    ResourceKind::Network,
    ResourceKind::Server,
    ResourceKind::Disk,
    ResourceKind::Loadbalancer,
    ResourceKind::BackendGroup,
    ResourceKind::Listener,
    ResourceKind::ListenerRule,
];

/// One `(kind, credential, region)` slice of the inventory
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyncScope {
    pub kind: ResourceKind,
    pub manager_id: String,
    pub region_id: Option<String>,
    /// Owner given to imported records; also keys the class lock
    pub owner_project_id: String,
}

impl SyncScope {
    pub fn new(
        kind: ResourceKind,
        manager_id: impl Into<String>,
        owner_project_id: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            manager_id: manager_id.into(),
            region_id: None,
            owner_project_id: owner_project_id.into(),
        }
    }

    pub fn with_region(mut self, region_id: impl Into<String>) -> Self {
        self.region_id = Some(region_id.into());
        self
    }
}

/// When a record already marked unknown by a previous pass is looked at again
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferredDeletePolicy {
    /// Re-evaluate on every pass
    EveryPass,
    /// Re-evaluate once the given time has passed since the last attempt
    After(Duration),
    /// Leave it alone until the remote object reappears
    Never,
}

impl Default for DeferredDeletePolicy {
    fn default() -> Self {
        DeferredDeletePolicy::After(Duration::from_secs(3600))
    }
}

impl DeferredDeletePolicy {
    pub fn is_due(&self, last_attempt: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match self {
            DeferredDeletePolicy::EveryPass => true,
            DeferredDeletePolicy::Never => false,
            DeferredDeletePolicy::After(wait) => (now - last_attempt)
                .to_std()
                .map(|elapsed| elapsed >= *wait)
                .unwrap_or(false),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RemoveOutcome {
    Deleted,
    MarkedUnknown,
    Deferred,
}

pub struct Reconciler {
    services: Arc<Services>,
    policy: DeferredDeletePolicy,
    /// Last deletion attempt of records held back by dependents
    deferred_attempts: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl Reconciler {
    pub fn new(services: Arc<Services>, policy: DeferredDeletePolicy) -> Self {
        Self {
            services,
            policy,
            deferred_attempts: Mutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> DeferredDeletePolicy {
        self.policy
    }

    /// Reconcile `local` against `remote` for one scope.
    ///
    /// Fails as a whole only when the class lock cannot be taken or the
    /// remote set is inconsistent; per-item failures are counted.
    pub async fn sync(
        &self,
        scope: &SyncScope,
        local: Vec<ResourceRecord>,
        remote: Vec<RemoteSnapshot>,
    ) -> Result<SyncResult> {
        let _class = self
            .services
            .locks
            .lock_class(scope.kind, &scope.owner_project_id)
            .await?;
        self.run_pass(scope, local, remote).await
    }

    /// Fetch the remote list for `scope` and reconcile the synced records
    pub async fn sync_scope(&self, scope: &SyncScope) -> Result<SyncResult> {
        let adapter = self.services.adapters.get(&scope.manager_id)?;
        if !adapter.supports(scope.kind) {
            return Err(ControlPlaneError::InvalidParameter(format!(
                "{} does not manage {}",
                adapter.name(),
                scope.kind
            )));
        }
        // Listed under the class lock: tasks creating or deleting objects of
        // this scope cannot change the remote set between list and compare.
        let _class = self
            .services
            .locks
            .lock_class(scope.kind, &scope.owner_project_id)
            .await?;
        let remote = adapter.list(scope.kind).await?;
        let local = self.services.inventory.list_synced(
            scope.kind,
            &scope.manager_id,
            scope.region_id.as_deref(),
        );
        self.run_pass(scope, local, remote).await
    }

    /// Run one round over `scopes`, parents first; scopes of the same kind
    /// run concurrently
    pub async fn sync_all(&self, scopes: &[SyncScope]) -> Vec<(SyncScope, Result<SyncResult>)> {
        let mut outcomes = Vec::with_capacity(scopes.len());
        for kind in SYNC_ORDER {
            let batch: Vec<&SyncScope> = scopes.iter().filter(|s| s.kind == kind).collect();
            if batch.is_empty() {
                continue;
            }
            let results =
                futures_util::future::join_all(batch.iter().map(|scope| self.sync_scope(scope)))
                    .await;
            for (scope, result) in batch.into_iter().zip(results) {
                if let Err(e) = &result {
                    tracing::warn!("Sync of {} via {} failed: {}", scope.kind, scope.manager_id, e);
                }
                outcomes.push((scope.clone(), result));
            }
        }
        outcomes
    }

    async fn run_pass(
        &self,
        scope: &SyncScope,
        local: Vec<ResourceRecord>,
        remote: Vec<RemoteSnapshot>,
    ) -> Result<SyncResult> {
        let partition = compare_sets(local, remote)?;
        let mut result = SyncResult::new(SyncCandidates {
            added: partition.added.len(),
            common: partition.common.len(),
            removed: partition.removed.len(),
        });

        for record in &partition.removed {
            match self.sync_remove(record).await {
                Ok(RemoveOutcome::Deleted | RemoveOutcome::MarkedUnknown) => result.deleted += 1,
                Ok(RemoveOutcome::Deferred) => result.deferred += 1,
                Err(e) => {
                    tracing::warn!("Failed to sync removal of {} {}: {}", record.kind, record.name, e);
                    result.delete_error(format!("{}: {}", record.local_id, e));
                }
            }
        }

        for (record, snapshot) in &partition.common {
            match self.sync_update(scope, record, snapshot).await {
                Ok(true) => result.updated += 1,
                Ok(false) => result.unchanged += 1,
                Err(e) => {
                    tracing::warn!("Failed to sync {} {}: {}", record.kind, record.name, e);
                    result.update_error(format!("{}: {}", record.local_id, e));
                }
            }
        }

        for snapshot in &partition.added {
            match self.sync_add(scope, snapshot) {
                Ok(_) => result.added += 1,
                Err(e) => {
                    tracing::warn!(
                        "Failed to import {} {}: {}",
                        snapshot.kind,
                        snapshot.global_id,
                        e
                    );
                    result.add_error(format!("{}: {}", snapshot.global_id, e));
                }
            }
        }

        tracing::info!(
            "Synced {} for {} ({}): {}",
            scope.kind,
            scope.manager_id,
            scope.region_id.as_deref().unwrap_or("-"),
            result
        );
        Ok(result)
    }

    async fn sync_remove(&self, record: &ResourceRecord) -> Result<RemoveOutcome> {
        let _lock = self.services.locks.lock_object(&record.local_id).await?;
        let inventory = &self.services.inventory;

        let Some(current) = inventory.find(&record.local_id) else {
            // Removed by a task between the snapshot and the lock.
            return Ok(RemoveOutcome::Deleted);
        };
        if current.external_id != record.external_id {
            return Err(ControlPlaneError::Conflict(format!(
                "{} changed external id during sync",
                record.local_id
            )));
        }

        let now = Utc::now();
        let marked = current.status == ResourceStatus::Unknown
            && current.status_reason.as_deref() == Some(SYNC_DELETE_REASON);
        if marked {
            let last_attempt = self
                .attempts()
                .get(&current.local_id)
                .copied()
                .unwrap_or(current.status_changed_at);
            if !self.policy.is_due(last_attempt, now) {
                return Ok(RemoveOutcome::Deferred);
            }
        }

        if inventory.has_live_dependents(&current) {
            self.attempts().insert(current.local_id.clone(), now);
            if marked {
                // Retried and still blocked: nothing changed since the mark.
                return Ok(RemoveOutcome::Deferred);
            }
            let (updated, _) = inventory.set_status(
                &current.local_id,
                ResourceStatus::Unknown,
                Some(SYNC_DELETE_REASON.to_string()),
            )?;
            self.services.audit.record(
                &updated,
                AuditAction::SyncMarkUnknown,
                "remote object gone, dependents still present",
            );
            return Ok(RemoveOutcome::MarkedUnknown);
        }

        let removed = inventory.remove(&current.local_id)?;
        self.attempts().remove(&current.local_id);
        self.services
            .audit
            .record(&removed, AuditAction::SyncDelete, "remote object gone");
        Ok(RemoveOutcome::Deleted)
    }

    async fn sync_update(
        &self,
        scope: &SyncScope,
        record: &ResourceRecord,
        snapshot: &RemoteSnapshot,
    ) -> Result<bool> {
        let _lock = self.services.locks.lock_object(&record.local_id).await?;
        let parents = self.resolve_parents(scope, snapshot);

        let (updated, diff) = self.services.inventory.update(&record.local_id, |r| {
            if r.external_id.as_deref() != Some(snapshot.global_id.as_str()) {
                return Err(ControlPlaneError::Conflict(format!(
                    "{} changed external id during sync",
                    r.local_id
                )));
            }
            // A record on its way out keeps the status its delete task set.
            if r.is_live() && r.status != snapshot.status {
                r.set_status(snapshot.status, None);
            }
            if r.kind.syncs_name() {
                r.name = snapshot.name.clone();
            }
            r.metadata
                .extend(snapshot.attributes.iter().map(|(k, v)| (k.clone(), v.clone())));
            if let Some(project) = &snapshot.project_id {
                r.metadata
                    .insert("remote_project_id".to_string(), serde_json::json!(project));
            }
            r.parents.extend(parents);
            Ok(())
        })?;

        if diff.is_empty() {
            return Ok(false);
        }
        if diff.contains("status") {
            self.attempts().remove(&updated.local_id);
        }
        self.services
            .audit
            .record_diff(&updated, AuditAction::SyncUpdate, &diff);
        Ok(true)
    }

    fn sync_add(&self, scope: &SyncScope, snapshot: &RemoteSnapshot) -> Result<ResourceRecord> {
        let mut record = ResourceRecord::new(
            scope.kind,
            &snapshot.name,
            &scope.owner_project_id,
            &scope.manager_id,
        )
        .with_external_id(&snapshot.global_id)
        .with_status(snapshot.status);
        record.region_id = scope.region_id.clone();
        record.metadata = snapshot.attributes.clone();
        if let Some(project) = &snapshot.project_id {
            record
                .metadata
                .insert("remote_project_id".to_string(), serde_json::json!(project));
        }
        record.parents = self.resolve_parents(scope, snapshot);

        let record = self.services.inventory.insert_with_unique_name(record)?;
        self.services.audit.record(
            &record,
            AuditAction::Create,
            format!("imported {} as {}", snapshot.global_id, record.name),
        );
        Ok(record)
    }

    /// Translate remote parent ids into local ids; unknown parents are skipped
    fn resolve_parents(
        &self,
        scope: &SyncScope,
        snapshot: &RemoteSnapshot,
    ) -> HashMap<ResourceKind, String> {
        snapshot
            .parents
            .iter()
            .filter_map(|(kind, global_id)| {
                let parent =
                    self.services
                        .inventory
                        .find_by_external_id(&scope.manager_id, *kind, global_id);
                if parent.is_none() {
                    tracing::debug!(
                        "{} {} references unknown {} {}",
                        snapshot.kind,
                        snapshot.global_id,
                        kind,
                        global_id
                    );
                }
                parent.map(|p| (*kind, p.local_id))
            })
            .collect()
    }

    fn attempts(&self) -> std::sync::MutexGuard<'_, HashMap<String, DateTime<Utc>>> {
        self.deferred_attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
