mod common;

use common::{Harness, MANAGER, OWNER};
use nimbus_cloud::{MemoryOp, RemoteSnapshot, ResourceKind, ResourceStatus};
use nimbus_controlplane::{AuditAction, DeferredDeletePolicy, SYNC_DELETE_REASON, SyncScope};

fn scopes() -> Vec<SyncScope> {
    // Children first on purpose: the round still imports parents first.
    vec![
        SyncScope::new(ResourceKind::Storage, MANAGER, OWNER),
        SyncScope::new(ResourceKind::Zone, MANAGER, OWNER),
    ]
}

#[tokio::test]
async fn test_sync_imports_updates_and_is_idempotent() {
    let h = Harness::new().await;
    h.cloud
        .insert(RemoteSnapshot::new(ResourceKind::Zone, "z-1", "tk1a").with_project("remote-p"));
    h.cloud.insert(
        RemoteSnapshot::new(ResourceKind::Storage, "st-1", "ssd")
            .with_parent(ResourceKind::Zone, "z-1")
            .with_attribute("capacity_gb", serde_json::json!(2048)),
    );

    let round = h.plane.reconciler().sync_all(&scopes()).await;
    assert_eq!(round[0].0.kind, ResourceKind::Zone);
    assert_eq!(round[1].0.kind, ResourceKind::Storage);
    for (_, result) in &round {
        let result = result.as_ref().unwrap();
        assert_eq!(result.added, 1);
        assert!(result.is_balanced());
    }

    let inventory = h.plane.inventory();
    let zone = inventory
        .find_by_external_id(MANAGER, ResourceKind::Zone, "z-1")
        .unwrap();
    assert_eq!(zone.owner_project_id, OWNER);
    assert_eq!(
        zone.get_metadata::<String>("remote_project_id").as_deref(),
        Some("remote-p")
    );
    let storage = inventory
        .find_by_external_id(MANAGER, ResourceKind::Storage, "st-1")
        .unwrap();
    assert_eq!(storage.parent(ResourceKind::Zone), Some(zone.local_id.as_str()));
    assert_eq!(storage.get_metadata::<u64>("capacity_gb"), Some(2048));
    assert_eq!(h.plane.audit().count(AuditAction::Create), 2);

    // Nothing changed remotely
    for (_, result) in h.plane.reconciler().sync_all(&scopes()).await {
        let result = result.unwrap();
        assert_eq!(result.unchanged, 1);
        assert!(!result.has_changes());
        assert!(result.is_balanced());
    }

    h.cloud
        .set_status(ResourceKind::Storage, "st-1", ResourceStatus::Stopped);
    let result = h
        .plane
        .reconciler()
        .sync_scope(&SyncScope::new(ResourceKind::Storage, MANAGER, OWNER))
        .await
        .unwrap();
    assert_eq!(result.updated, 1);
    let storage = inventory.get(&storage.local_id).unwrap();
    assert_eq!(storage.status, ResourceStatus::Stopped);
    assert_eq!(h.plane.audit().count(AuditAction::SyncUpdate), 1);
}

#[tokio::test]
async fn test_imported_names_are_made_unique() {
    let h = Harness::new().await;
    h.plane
        .inventory()
        .insert(h.record(ResourceKind::Disk, "data"))
        .unwrap();
    h.cloud.insert(RemoteSnapshot::new(ResourceKind::Disk, "d-1", "data"));
    h.cloud.insert(RemoteSnapshot::new(ResourceKind::Disk, "d-2", "data"));

    let result = h
        .plane
        .reconciler()
        .sync_scope(&SyncScope::new(ResourceKind::Disk, MANAGER, OWNER))
        .await
        .unwrap();
    assert_eq!(result.added, 2);

    let mut names: Vec<String> = h
        .plane
        .inventory()
        .list_kind(ResourceKind::Disk)
        .into_iter()
        .map(|r| r.name)
        .collect();
    names.sort();
    assert_eq!(names, vec!["data", "data-1", "data-2"]);
}

#[tokio::test]
async fn test_removal_blocked_by_dependents_is_deferred() {
    let h = Harness::new().await;
    h.cloud.insert(RemoteSnapshot::new(ResourceKind::Zone, "z-1", "tk1a"));
    h.cloud.insert(
        RemoteSnapshot::new(ResourceKind::Storage, "st-1", "ssd")
            .with_parent(ResourceKind::Zone, "z-1"),
    );
    h.plane.reconciler().sync_all(&scopes()).await;

    h.cloud.remove(ResourceKind::Zone, "z-1");
    let zone_scope = SyncScope::new(ResourceKind::Zone, MANAGER, OWNER);

    let first = h.plane.reconciler().sync_scope(&zone_scope).await.unwrap();
    assert_eq!(first.deleted, 1);
    assert!(first.is_balanced());
    let zone = h
        .plane
        .inventory()
        .find_by_external_id(MANAGER, ResourceKind::Zone, "z-1")
        .unwrap();
    assert_eq!(zone.status, ResourceStatus::Unknown);
    assert_eq!(zone.status_reason.as_deref(), Some(SYNC_DELETE_REASON));

    // Default policy waits an hour before trying again
    let second = h.plane.reconciler().sync_scope(&zone_scope).await.unwrap();
    assert_eq!(second.deferred, 1);
    assert_eq!(second.deleted, 0);
    assert!(second.is_balanced());
    assert_eq!(h.plane.audit().count(AuditAction::SyncMarkUnknown), 1);
}

#[tokio::test]
async fn test_removal_completes_once_dependents_are_gone() {
    let h = Harness::build(|b| b.deferred_delete(DeferredDeletePolicy::EveryPass)).await;
    h.cloud.insert(RemoteSnapshot::new(ResourceKind::Zone, "z-1", "tk1a"));
    h.cloud.insert(
        RemoteSnapshot::new(ResourceKind::Storage, "st-1", "ssd")
            .with_parent(ResourceKind::Zone, "z-1"),
    );
    h.plane.reconciler().sync_all(&scopes()).await;

    h.cloud.remove(ResourceKind::Zone, "z-1");
    h.cloud.remove(ResourceKind::Storage, "st-1");
    let round = h.plane.reconciler().sync_all(&scopes()).await;

    // Zone runs first and is still blocked by the storage
    let zone_result = round[0].1.as_ref().unwrap();
    assert_eq!(zone_result.deleted, 1);
    assert!(h.plane.inventory().list_kind(ResourceKind::Zone).len() == 1);
    assert!(h.plane.inventory().list_kind(ResourceKind::Storage).is_empty());

    let round = h.plane.reconciler().sync_all(&scopes()).await;
    assert!(round[0].1.as_ref().unwrap().is_balanced());
    assert!(h.plane.inventory().list_kind(ResourceKind::Zone).is_empty());
    assert_eq!(h.plane.audit().count(AuditAction::SyncDelete), 2);
}

#[tokio::test]
async fn test_blocked_removal_is_counted_once() {
    let h = Harness::build(|b| b.deferred_delete(DeferredDeletePolicy::EveryPass)).await;
    h.cloud.insert(RemoteSnapshot::new(ResourceKind::Zone, "z-1", "tk1a"));
    h.cloud.insert(
        RemoteSnapshot::new(ResourceKind::Storage, "st-1", "ssd")
            .with_parent(ResourceKind::Zone, "z-1"),
    );
    h.plane.reconciler().sync_all(&scopes()).await;

    h.cloud.remove(ResourceKind::Zone, "z-1");
    let zone_scope = SyncScope::new(ResourceKind::Zone, MANAGER, OWNER);
    let first = h.plane.reconciler().sync_scope(&zone_scope).await.unwrap();
    assert_eq!(first.deleted, 1);

    // The storage still holds the zone; further passes change nothing
    for _ in 0..2 {
        let again = h.plane.reconciler().sync_scope(&zone_scope).await.unwrap();
        assert_eq!(again.deleted, 0);
        assert_eq!(again.deferred, 1);
        assert!(!again.has_changes());
        assert!(again.is_balanced());
    }
    assert_eq!(h.plane.audit().count(AuditAction::SyncMarkUnknown), 1);
}

#[tokio::test]
async fn test_reappearing_object_clears_unknown_status() {
    let h = Harness::new().await;
    h.cloud.insert(RemoteSnapshot::new(ResourceKind::Zone, "z-1", "tk1a"));
    h.cloud.insert(
        RemoteSnapshot::new(ResourceKind::Storage, "st-1", "ssd")
            .with_parent(ResourceKind::Zone, "z-1"),
    );
    h.plane.reconciler().sync_all(&scopes()).await;

    let zone_scope = SyncScope::new(ResourceKind::Zone, MANAGER, OWNER);
    h.cloud.remove(ResourceKind::Zone, "z-1");
    h.plane.reconciler().sync_scope(&zone_scope).await.unwrap();

    h.cloud.insert(RemoteSnapshot::new(ResourceKind::Zone, "z-1", "tk1a"));
    let result = h.plane.reconciler().sync_scope(&zone_scope).await.unwrap();
    assert_eq!(result.updated, 1);
    let zone = h
        .plane
        .inventory()
        .find_by_external_id(MANAGER, ResourceKind::Zone, "z-1")
        .unwrap();
    assert_eq!(zone.status, ResourceStatus::Ready);
    assert_eq!(zone.status_reason, None);
}

#[tokio::test]
async fn test_failed_listing_leaves_inventory_alone() {
    let h = Harness::new().await;
    h.cloud.insert(RemoteSnapshot::new(ResourceKind::Zone, "z-1", "tk1a"));
    h.plane.reconciler().sync_all(&scopes()).await;

    h.cloud.fail(ResourceKind::Zone, MemoryOp::List, "region offline");
    let round = h.plane.reconciler().sync_all(&scopes()).await;
    assert!(round[0].1.is_err());
    assert_eq!(h.plane.inventory().list_kind(ResourceKind::Zone).len(), 1);
}

#[tokio::test]
async fn test_duplicate_remote_ids_fail_the_pass() {
    let h = Harness::new().await;
    let scope = SyncScope::new(ResourceKind::Disk, MANAGER, OWNER);
    let remote = vec![
        RemoteSnapshot::new(ResourceKind::Disk, "d-1", "a"),
        RemoteSnapshot::new(ResourceKind::Disk, "d-1", "b"),
    ];
    let err = h
        .plane
        .reconciler()
        .sync(&scope, Vec::new(), remote)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("more than once"));
    assert!(h.plane.inventory().is_empty());
}

#[tokio::test]
async fn test_replaced_loadbalancer_with_dependents() {
    let h = Harness::new().await;
    let old = h
        .plane
        .inventory()
        .insert(
            h.record(ResourceKind::Loadbalancer, "web")
                .with_external_id("ext-1")
                .with_status(ResourceStatus::Ready),
        )
        .unwrap();
    h.plane
        .inventory()
        .insert(
            h.record(ResourceKind::Listener, "https")
                .with_external_id("ls-1")
                .with_parent(ResourceKind::Loadbalancer, &old.local_id),
        )
        .unwrap();

    let scope = SyncScope::new(ResourceKind::Loadbalancer, MANAGER, OWNER);
    let result = h
        .plane
        .reconciler()
        .sync(
            &scope,
            vec![old.clone()],
            vec![RemoteSnapshot::new(ResourceKind::Loadbalancer, "ext-2", "web")],
        )
        .await
        .unwrap();

    assert_eq!(result.added, 1);
    assert_eq!(result.deleted + result.delete_errors, 1);
    assert!(result.is_balanced());

    let old = h.plane.inventory().get(&old.local_id).unwrap();
    assert_eq!(old.status, ResourceStatus::Unknown);
    assert_eq!(old.status_reason.as_deref(), Some(SYNC_DELETE_REASON));
    let new = h
        .plane
        .inventory()
        .find_by_external_id(MANAGER, ResourceKind::Loadbalancer, "ext-2")
        .unwrap();
    assert_eq!(new.name, "web-1");
}
