//! Audit trail of inventory changes
//!
//! Every import, update, deletion and placement decision is recorded here and
//! mirrored to `tracing` under the `audit` target.

use crate::record::{RecordDiff, ResourceRecord};
use chrono::{DateTime, Utc};
use nimbus_cloud::ResourceKind;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Mutex, PoisonError};

const DEFAULT_CAPACITY: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// Imported from a remote snapshot
    Create,
    SyncUpdate,
    SyncDelete,
    /// Deletion deferred because dependents still reference the record
    SyncMarkUnknown,
    Allocating,
    AllocateFail,
    StatusChange,
    PendingDelete,
    Delete,
    TaskFailed,
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuditAction::Create => "create",
            AuditAction::SyncUpdate => "sync_update",
            AuditAction::SyncDelete => "sync_delete",
            AuditAction::SyncMarkUnknown => "sync_mark_unknown",
            AuditAction::Allocating => "allocating",
            AuditAction::AllocateFail => "allocate_fail",
            AuditAction::StatusChange => "status_change",
            AuditAction::PendingDelete => "pending_delete",
            AuditAction::Delete => "delete",
            AuditAction::TaskFailed => "task_failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub at: DateTime<Utc>,
    pub action: AuditAction,
    pub resource_id: String,
    pub resource_kind: ResourceKind,
    pub resource_name: String,
    pub detail: String,
}

/// Bounded in-memory audit log; the oldest events fall off first
pub struct AuditLog {
    events: Mutex<VecDeque<AuditEvent>>,
    capacity: usize,
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn record(&self, record: &ResourceRecord, action: AuditAction, detail: impl Into<String>) {
        let event = AuditEvent {
            at: Utc::now(),
            action,
            resource_id: record.local_id.clone(),
            resource_kind: record.kind,
            resource_name: record.name.clone(),
            detail: detail.into(),
        };

        tracing::info!(
            target: "audit",
            action = %event.action,
            kind = %event.resource_kind,
            id = %event.resource_id,
            "{} {}: {}",
            event.resource_kind,
            event.resource_name,
            event.detail
        );

        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        if events.len() >= self.capacity {
            events.pop_front();
        }
        events.push_back(event);
    }

    pub fn record_diff(&self, record: &ResourceRecord, action: AuditAction, diff: &RecordDiff) {
        self.record(record, action, diff.to_string());
    }

    /// Events about one record, oldest first
    pub fn events_for(&self, resource_id: &str) -> Vec<AuditEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.resource_id == resource_id)
            .cloned()
            .collect()
    }

    pub fn count(&self, action: AuditAction) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.action == action)
            .count()
    }

    /// The `n` most recent events, oldest first
    pub fn recent(&self, n: usize) -> Vec<AuditEvent> {
        let events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        events.iter().skip(events.len().saturating_sub(n)).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_is_bounded() {
        let log = AuditLog::with_capacity(2);
        let record = ResourceRecord::new(ResourceKind::Disk, "a", "p1", "m1");
        log.record(&record, AuditAction::Create, "first");
        log.record(&record, AuditAction::SyncUpdate, "second");
        log.record(&record, AuditAction::SyncDelete, "third");

        let events = log.events_for(&record.local_id);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].detail, "second");
        assert_eq!(log.recent(1)[0].action, AuditAction::SyncDelete);
        assert_eq!(log.count(AuditAction::Create), 0);
    }
}
