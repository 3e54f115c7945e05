//! Partitioning of a local set against a remote set

use crate::error::{ControlPlaneError, Result};
use crate::record::ResourceRecord;
use nimbus_cloud::{CloudError, RemoteSnapshot};
use std::collections::{HashMap, HashSet};

/// Local and remote sets split by external id
#[derive(Debug, Default)]
pub struct Partition {
    /// Local records with no remote counterpart, in local order
    pub removed: Vec<ResourceRecord>,
    /// Matched pairs, in local order
    pub common: Vec<(ResourceRecord, RemoteSnapshot)>,
    /// Remote objects with no local record, in remote order
    pub added: Vec<RemoteSnapshot>,
}

/// Match records to snapshots by `external_id == global_id` only.
///
/// A remote set listing the same global id twice is inconsistent and
/// rejected as a whole. Local records without an external id never match.
pub fn compare_sets(
    local: Vec<ResourceRecord>,
    remote: Vec<RemoteSnapshot>,
) -> Result<Partition> {
    let mut seen = HashSet::with_capacity(remote.len());
    for snapshot in &remote {
        if !seen.insert(snapshot.global_id.as_str()) {
            return Err(ControlPlaneError::Provider(CloudError::ApiError(format!(
                "remote {} list contains {} more than once",
                snapshot.kind, snapshot.global_id
            ))));
        }
    }

    let mut remote_by_id: HashMap<String, RemoteSnapshot> = HashMap::with_capacity(remote.len());
    let mut remote_order = Vec::with_capacity(remote.len());
    for snapshot in remote {
        remote_order.push(snapshot.global_id.clone());
        remote_by_id.insert(snapshot.global_id.clone(), snapshot);
    }

    let mut partition = Partition::default();
    for record in local {
        match record
            .external_id
            .as_deref()
            .and_then(|id| remote_by_id.remove(id))
        {
            Some(snapshot) => partition.common.push((record, snapshot)),
            None => partition.removed.push(record),
        }
    }

    partition.added = remote_order
        .into_iter()
        .filter_map(|id| remote_by_id.remove(&id))
        .collect();
    Ok(partition)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nimbus_cloud::ResourceKind;

    fn local(name: &str, external_id: &str) -> ResourceRecord {
        ResourceRecord::new(ResourceKind::Loadbalancer, name, "p1", "m1").with_external_id(external_id)
    }

    fn remote(global_id: &str) -> RemoteSnapshot {
        RemoteSnapshot::new(ResourceKind::Loadbalancer, global_id, global_id)
    }

    #[test]
    fn test_partition_by_external_id() {
        let partition = compare_sets(
            vec![local("a", "A"), local("b", "B"), local("c", "C")],
            vec![remote("B"), remote("D"), remote("C")],
        )
        .unwrap();

        let removed: Vec<_> = partition.removed.iter().map(|r| r.name.as_str()).collect();
        let common: Vec<_> = partition.common.iter().map(|(r, _)| r.name.as_str()).collect();
        let added: Vec<_> = partition.added.iter().map(|s| s.global_id.as_str()).collect();
        assert_eq!(removed, vec!["a"]);
        assert_eq!(common, vec!["b", "c"]);
        assert_eq!(added, vec!["D"]);
    }

    #[test]
    fn test_names_never_match() {
        let partition = compare_sets(
            vec![local("same-name", "X")],
            vec![RemoteSnapshot::new(ResourceKind::Loadbalancer, "Y", "same-name")],
        )
        .unwrap();
        assert_eq!(partition.removed.len(), 1);
        assert_eq!(partition.added.len(), 1);
        assert!(partition.common.is_empty());
    }

    #[test]
    fn test_duplicate_remote_ids_rejected() {
        let err = compare_sets(vec![], vec![remote("A"), remote("A")]).unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn test_record_without_external_id_is_removed_candidate() {
        let unsynced = ResourceRecord::new(ResourceKind::Loadbalancer, "new", "p1", "m1");
        let partition = compare_sets(vec![unsynced], vec![remote("A")]).unwrap();
        assert_eq!(partition.removed.len(), 1);
        assert_eq!(partition.added.len(), 1);
    }
}
