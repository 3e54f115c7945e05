//! Local inventory records

use chrono::{DateTime, Utc};
use nimbus_cloud::{ResourceKind, ResourceStatus};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Soft-delete lifecycle of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteState {
    Active,
    PendingDelete,
    Deleted,
}

impl DeleteState {
    /// The only legal edges of the lifecycle
    pub const TRANSITIONS: [(DeleteState, DeleteState); 3] = [
        (DeleteState::Active, DeleteState::PendingDelete),
        (DeleteState::Active, DeleteState::Deleted),
        (DeleteState::PendingDelete, DeleteState::Deleted),
    ];

    pub fn can_transition_to(self, next: DeleteState) -> bool {
        self == next || Self::TRANSITIONS.contains(&(self, next))
    }
}

impl fmt::Display for DeleteState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeleteState::Active => write!(f, "active"),
            DeleteState::PendingDelete => write!(f, "pending_delete"),
            DeleteState::Deleted => write!(f, "deleted"),
        }
    }
}

/// Control-plane view of one cloud object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub local_id: String,

    /// Remote global id once the object exists remotely
    pub external_id: Option<String>,

    pub kind: ResourceKind,
    pub name: String,
    pub status: ResourceStatus,
    pub status_reason: Option<String>,
    pub delete_state: DeleteState,
    pub owner_project_id: String,

    /// Credential through which the object is managed
    pub manager_id: String,
    pub region_id: Option<String>,

    /// Parent records by kind, as local ids
    pub parents: HashMap<ResourceKind, String>,

    pub metadata: HashMap<String, serde_json::Value>,

    /// Active task currently driving this record
    #[serde(default)]
    pub task_id: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status_changed_at: DateTime<Utc>,
}

impl ResourceRecord {
    pub fn new(
        kind: ResourceKind,
        name: impl Into<String>,
        owner_project_id: impl Into<String>,
        manager_id: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            local_id: uuid::Uuid::new_v4().to_string(),
            external_id: None,
            kind,
            name: name.into(),
            status: ResourceStatus::Pending,
            status_reason: None,
            delete_state: DeleteState::Active,
            owner_project_id: owner_project_id.into(),
            manager_id: manager_id.into(),
            region_id: None,
            parents: HashMap::new(),
            metadata: HashMap::new(),
            task_id: None,
            created_at: now,
            updated_at: now,
            status_changed_at: now,
        }
    }

    pub fn with_external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = Some(external_id.into());
        self
    }

    pub fn with_status(mut self, status: ResourceStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_region(mut self, region_id: impl Into<String>) -> Self {
        self.region_id = Some(region_id.into());
        self
    }

    pub fn with_parent(mut self, kind: ResourceKind, local_id: impl Into<String>) -> Self {
        self.parents.insert(kind, local_id.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn parent(&self, kind: ResourceKind) -> Option<&str> {
        self.parents.get(&kind).map(String::as_str)
    }

    pub fn get_metadata<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.metadata
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Active and not on its way out
    pub fn is_live(&self) -> bool {
        self.delete_state == DeleteState::Active
    }

    pub fn set_status(&mut self, status: ResourceStatus, reason: Option<String>) {
        self.status = status;
        self.status_reason = reason;
    }
}

/// One changed field between two versions of a record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldChange {
    pub field: String,
    pub old: serde_json::Value,
    pub new: serde_json::Value,
}

/// Field-level difference between two versions of a record
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecordDiff(pub Vec<FieldChange>);

/// Bookkeeping fields that never count as a change
const DIFF_IGNORED: [&str; 3] = ["created_at", "updated_at", "status_changed_at"];

impl RecordDiff {
    pub fn between(before: &ResourceRecord, after: &ResourceRecord) -> Self {
        let (Ok(old), Ok(new)) = (fields_of(before), fields_of(after)) else {
            return Self::default();
        };

        let changes = new
            .iter()
            .filter(|(field, _)| !DIFF_IGNORED.contains(&field.as_str()))
            .filter_map(|(field, value)| {
                let previous = old.get(field).cloned().unwrap_or(serde_json::Value::Null);
                (previous != *value).then(|| FieldChange {
                    field: field.clone(),
                    old: previous,
                    new: value.clone(),
                })
            })
            .collect();
        Self(changes)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|c| c.field.as_str())
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields().any(|f| f == field)
    }
}

impl fmt::Display for RecordDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, change) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {} -> {}", change.field, change.old, change.new)?;
        }
        Ok(())
    }
}

/// Record fields keyed by name; BTreeMap keeps the diff order stable
fn fields_of(record: &ResourceRecord) -> serde_json::Result<BTreeMap<String, serde_json::Value>> {
    match serde_json::to_value(record)? {
        serde_json::Value::Object(map) => Ok(map.into_iter().collect()),
        _ => Ok(BTreeMap::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delete_state_transitions() {
        use DeleteState::*;
        assert!(Active.can_transition_to(PendingDelete));
        assert!(Active.can_transition_to(Deleted));
        assert!(PendingDelete.can_transition_to(Deleted));
        assert!(!PendingDelete.can_transition_to(Active));
        assert!(!Deleted.can_transition_to(Active));
        assert!(!Deleted.can_transition_to(PendingDelete));
    }

    #[test]
    fn test_diff_reports_changed_fields_only() {
        let before = ResourceRecord::new(ResourceKind::Loadbalancer, "lb", "p1", "m1")
            .with_external_id("lb-1")
            .with_status(ResourceStatus::Ready);
        let mut after = before.clone();
        after.status = ResourceStatus::Stopped;
        after.updated_at = Utc::now() + chrono::Duration::seconds(5);
        after
            .metadata
            .insert("address".into(), serde_json::json!("10.0.0.1"));

        let diff = RecordDiff::between(&before, &after);
        let fields: Vec<&str> = diff.fields().collect();
        assert_eq!(fields, vec!["metadata", "status"]);
        assert!(diff.to_string().contains("status: \"ready\" -> \"stopped\""));
    }

    #[test]
    fn test_identical_records_have_empty_diff() {
        let record = ResourceRecord::new(ResourceKind::Zone, "tk1a", "p1", "m1");
        assert!(RecordDiff::between(&record, &record.clone()).is_empty());
    }
}
