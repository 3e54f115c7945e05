//! Inventory of resource records
//!
//! The inventory enforces record-level invariants (unique external id per
//! `(manager, kind)`, legal delete-state edges) but takes no locks of its own
//! beyond its internal table lock: callers hold the class/object locks that
//! serialize their read-modify-write cycles.
//!
//! An inventory opened on a state directory rewrites
//! `<state_dir>/inventory.json` after every change; a change whose write
//! fails is undone.

use crate::error::{ControlPlaneError, Result};
use crate::record::{DeleteState, RecordDiff, ResourceRecord};
use crate::state_file;
use chrono::{DateTime, Utc};
use nimbus_cloud::{ResourceKind, ResourceStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

const INVENTORY_STATE_VERSION: u32 = 1;
const INVENTORY_FILE: &str = "inventory.json";

#[derive(Debug, Serialize, Deserialize)]
struct InventoryFile {
    version: u32,
    updated_at: DateTime<Utc>,
    records: Vec<ResourceRecord>,
}

#[derive(Default)]
pub struct Inventory {
    records: RwLock<HashMap<String, ResourceRecord>>,
    file: Option<PathBuf>,
}

impl Inventory {
    /// Inventory that forgets everything on restart
    pub fn new() -> Self {
        Self::default()
    }

    /// Open (or create) the inventory persisted under `dir`
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let file = dir.join(INVENTORY_FILE);
        let records = state_file::read_with_backup(&file, parse_inventory_file)?.unwrap_or_default();
        tracing::debug!("Loaded {} record(s) from {}", records.len(), dir.display());
        Ok(Self {
            records: RwLock::new(records),
            file: Some(file),
        })
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, ResourceRecord>> {
        self.records.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, ResourceRecord>> {
        self.records.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Persist the table after `id` changed; on failure put back `previous`
    fn commit(
        &self,
        records: &mut HashMap<String, ResourceRecord>,
        id: &str,
        previous: Option<ResourceRecord>,
    ) -> Result<()> {
        let Some(file) = &self.file else {
            return Ok(());
        };
        let saved = serde_json::to_string_pretty(&InventoryFile {
            version: INVENTORY_STATE_VERSION,
            updated_at: Utc::now(),
            records: records.values().cloned().collect(),
        })
        .map_err(ControlPlaneError::from)
        .and_then(|content| state_file::write_atomic(file, &content));

        if let Err(e) = saved {
            tracing::error!("Failed to persist inventory change of {}: {}", id, e);
            match previous {
                Some(previous) => records.insert(id.to_string(), previous),
                None => records.remove(id),
            };
            return Err(e);
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Insert a new record as-is
    pub fn insert(&self, record: ResourceRecord) -> Result<ResourceRecord> {
        let mut records = self.write();
        check_insert(&records, &record)?;
        records.insert(record.local_id.clone(), record.clone());
        self.commit(&mut records, &record.local_id, None)?;
        Ok(record)
    }

    /// Insert a new record, suffixing its name until it is unique among live
    /// records of the same kind and owner
    pub fn insert_with_unique_name(&self, mut record: ResourceRecord) -> Result<ResourceRecord> {
        let mut records = self.write();
        check_insert(&records, &record)?;
        record.name = unique_name(&records, record.kind, &record.owner_project_id, &record.name);
        records.insert(record.local_id.clone(), record.clone());
        self.commit(&mut records, &record.local_id, None)?;
        Ok(record)
    }

    pub fn find(&self, id: &str) -> Option<ResourceRecord> {
        self.read().get(id).cloned()
    }

    pub fn get(&self, id: &str) -> Result<ResourceRecord> {
        self.find(id)
            .ok_or_else(|| ControlPlaneError::NotFound(format!("resource {}", id)))
    }

    /// Fetch a record and check it has the expected kind
    pub fn get_kind(&self, id: &str, kind: ResourceKind) -> Result<ResourceRecord> {
        let record = self
            .find(id)
            .ok_or_else(|| ControlPlaneError::NotFound(format!("{} {}", kind, id)))?;
        if record.kind != kind {
            return Err(ControlPlaneError::InvalidParameter(format!(
                "{} is a {}, not a {}",
                id, record.kind, kind
            )));
        }
        Ok(record)
    }

    pub fn find_by_external_id(
        &self,
        manager_id: &str,
        kind: ResourceKind,
        external_id: &str,
    ) -> Option<ResourceRecord> {
        self.read()
            .values()
            .find(|r| {
                r.manager_id == manager_id
                    && r.kind == kind
                    && r.external_id.as_deref() == Some(external_id)
            })
            .cloned()
    }

    pub fn list_kind(&self, kind: ResourceKind) -> Vec<ResourceRecord> {
        self.collect(|r| r.kind == kind)
    }

    /// Records of a sync scope that already exist remotely
    pub fn list_synced(
        &self,
        kind: ResourceKind,
        manager_id: &str,
        region_id: Option<&str>,
    ) -> Vec<ResourceRecord> {
        self.collect(|r| {
            r.kind == kind
                && r.manager_id == manager_id
                && r.external_id.is_some()
                && region_id.is_none_or(|region| r.region_id.as_deref() == Some(region))
        })
    }

    /// Records of `kind` whose parent of `parent_kind` is `parent_id`
    pub fn children(
        &self,
        kind: ResourceKind,
        parent_kind: ResourceKind,
        parent_id: &str,
    ) -> Vec<ResourceRecord> {
        self.collect(|r| r.kind == kind && r.parent(parent_kind) == Some(parent_id))
    }

    /// Whether live records of a dependent kind still reference `record`
    pub fn has_live_dependents(&self, record: &ResourceRecord) -> bool {
        let dependents = record.kind.dependent_kinds();
        self.read().values().any(|r| {
            r.is_live()
                && dependents.contains(&r.kind)
                && r.parent(record.kind) == Some(record.local_id.as_str())
        })
    }

    pub fn name_taken(&self, kind: ResourceKind, owner_project_id: &str, name: &str) -> bool {
        name_taken(&self.read(), kind, owner_project_id, name)
    }

    /// Apply `f` to a copy of the record and store it if the result is valid.
    ///
    /// Returns the stored record and what changed. `updated_at` moves only on
    /// a real change, `status_changed_at` only when the status moves.
    pub fn update<F>(&self, id: &str, f: F) -> Result<(ResourceRecord, RecordDiff)>
    where
        F: FnOnce(&mut ResourceRecord) -> Result<()>,
    {
        let mut records = self.write();
        let current = records
            .get(id)
            .ok_or_else(|| ControlPlaneError::NotFound(format!("resource {}", id)))?;

        let mut next = current.clone();
        f(&mut next)?;

        if next.local_id != current.local_id || next.kind != current.kind {
            return Err(ControlPlaneError::InvalidParameter(format!(
                "identity of {} cannot change",
                id
            )));
        }
        if !current.delete_state.can_transition_to(next.delete_state) {
            return Err(ControlPlaneError::InvalidParameter(format!(
                "{} cannot move from {} to {}",
                id, current.delete_state, next.delete_state
            )));
        }
        if next.delete_state == DeleteState::Deleted {
            return Err(ControlPlaneError::InvalidParameter(format!(
                "{} must be removed, not marked deleted",
                id
            )));
        }
        if let Some(external_id) = next.external_id.as_deref() {
            if external_id_taken(&records, &next.manager_id, next.kind, external_id, id) {
                return Err(ControlPlaneError::Conflict(format!(
                    "{} {} is already tracked by another record",
                    next.kind, external_id
                )));
            }
        }

        let diff = RecordDiff::between(current, &next);
        if diff.is_empty() {
            return Ok((current.clone(), diff));
        }

        let now = Utc::now();
        next.updated_at = now;
        if next.status != current.status {
            next.status_changed_at = now;
        }
        let previous = records.insert(id.to_string(), next.clone());
        self.commit(&mut records, id, previous)?;
        Ok((next, diff))
    }

    pub fn set_status(
        &self,
        id: &str,
        status: ResourceStatus,
        reason: Option<String>,
    ) -> Result<(ResourceRecord, RecordDiff)> {
        self.update(id, |r| {
            r.set_status(status, reason);
            Ok(())
        })
    }

    pub fn mark_pending_delete(&self, id: &str) -> Result<ResourceRecord> {
        let (record, _) = self.update(id, |r| {
            r.delete_state = DeleteState::PendingDelete;
            Ok(())
        })?;
        Ok(record)
    }

    /// Hard-delete a record; the returned copy carries `DeleteState::Deleted`
    pub fn remove(&self, id: &str) -> Result<ResourceRecord> {
        let mut records = self.write();
        let mut record = records
            .remove(id)
            .ok_or_else(|| ControlPlaneError::NotFound(format!("resource {}", id)))?;
        self.commit(&mut records, id, Some(record.clone()))?;
        record.delete_state = DeleteState::Deleted;
        record.updated_at = Utc::now();
        Ok(record)
    }

    fn collect(&self, pred: impl Fn(&ResourceRecord) -> bool) -> Vec<ResourceRecord> {
        let mut matched: Vec<ResourceRecord> =
            self.read().values().filter(|r| pred(r)).cloned().collect();
        matched.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.local_id.cmp(&b.local_id))
        });
        matched
    }
}

fn check_insert(records: &HashMap<String, ResourceRecord>, record: &ResourceRecord) -> Result<()> {
    if records.contains_key(&record.local_id) {
        return Err(ControlPlaneError::Conflict(format!(
            "resource {} already exists",
            record.local_id
        )));
    }
    if record.delete_state == DeleteState::Deleted {
        return Err(ControlPlaneError::InvalidParameter(format!(
            "cannot insert deleted resource {}",
            record.local_id
        )));
    }
    if let Some(external_id) = record.external_id.as_deref() {
        if external_id_taken(
            records,
            &record.manager_id,
            record.kind,
            external_id,
            &record.local_id,
        ) {
            return Err(ControlPlaneError::Conflict(format!(
                "{} {} is already tracked by another record",
                record.kind, external_id
            )));
        }
    }
    Ok(())
}

fn external_id_taken(
    records: &HashMap<String, ResourceRecord>,
    manager_id: &str,
    kind: ResourceKind,
    external_id: &str,
    except: &str,
) -> bool {
    records.values().any(|r| {
        r.local_id != except
            && r.manager_id == manager_id
            && r.kind == kind
            && r.external_id.as_deref() == Some(external_id)
    })
}

fn name_taken(
    records: &HashMap<String, ResourceRecord>,
    kind: ResourceKind,
    owner_project_id: &str,
    name: &str,
) -> bool {
    records
        .values()
        .any(|r| r.is_live() && r.kind == kind && r.owner_project_id == owner_project_id && r.name == name)
}

fn unique_name(
    records: &HashMap<String, ResourceRecord>,
    kind: ResourceKind,
    owner_project_id: &str,
    base: &str,
) -> String {
    let base = if base.trim().is_empty() {
        kind.as_str()
    } else {
        base
    };
    if !name_taken(records, kind, owner_project_id, base) {
        return base.to_string();
    }
    (1u32..)
        .map(|n| format!("{}-{}", base, n))
        .find(|candidate| !name_taken(records, kind, owner_project_id, candidate))
        .unwrap_or_else(|| format!("{}-{}", base, uuid::Uuid::new_v4()))
}

fn parse_inventory_file(content: &str) -> Result<HashMap<String, ResourceRecord>> {
    let file: InventoryFile = serde_json::from_str(content)?;
    if file.version > INVENTORY_STATE_VERSION {
        return Err(ControlPlaneError::State(format!(
            "Inventory file version {} is newer than supported version {}",
            file.version, INVENTORY_STATE_VERSION
        )));
    }
    Ok(file
        .records
        .into_iter()
        .map(|r| (r.local_id.clone(), r))
        .collect())
}
