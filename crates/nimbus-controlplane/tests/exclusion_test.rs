mod common;

use common::{Harness, MANAGER, OWNER};
use nimbus_cloud::{ResourceKind, ResourceStatus};
use nimbus_controlplane::{AuditAction, LoadbalancerCreateRequest, SyncScope, TaskState};

fn lb_scope() -> SyncScope {
    SyncScope::new(ResourceKind::Loadbalancer, MANAGER, OWNER)
}

#[tokio::test]
async fn test_sync_during_remote_create_waits_for_external_id() {
    let (h, gate) = Harness::gated().await;
    h.start();

    let accepted = h
        .plane
        .create_loadbalancer(LoadbalancerCreateRequest {
            owner_project_id: OWNER.into(),
            manager_id: MANAGER.into(),
            name: "web".into(),
            zone_id: None,
            network_id: None,
            spec: None,
        })
        .await
        .unwrap();
    gate.wait_entered().await;

    let scope = lb_scope();
    let (result, _) = tokio::join!(h.plane.reconciler().sync_scope(&scope), async {
        tokio::task::yield_now().await;
        gate.release();
    });
    let result = result.unwrap();
    assert_eq!(result.added, 0);
    assert_eq!(result.candidates.common, 1);
    assert!(result.is_balanced());

    let task = h.wait(&accepted.task.id).await;
    assert_eq!(task.state, TaskState::Completed);

    let records = h.plane.inventory().list_kind(ResourceKind::Loadbalancer);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].name, "web");
    assert_eq!(records[0].status, ResourceStatus::Ready);
    assert!(records[0].external_id.is_some());
    assert_eq!(h.plane.audit().count(AuditAction::Create), 0);
}

#[tokio::test]
async fn test_sync_during_remote_delete_sees_it_finished() {
    let (h, gate) = Harness::gated().await;
    let lb = h.seed_remote(h.record(ResourceKind::Loadbalancer, "web"), "lb-1");
    h.start();

    let task = h.plane.delete_loadbalancer(&lb.local_id).await.unwrap();
    gate.wait_entered().await;

    let scope = lb_scope();
    let (result, _) = tokio::join!(h.plane.reconciler().sync_scope(&scope), async {
        tokio::task::yield_now().await;
        gate.release();
    });
    let result = result.unwrap();
    assert_eq!(result.candidates.removed, 0);
    assert_eq!(result.candidates.added, 0);

    assert_eq!(h.wait(&task.id).await.state, TaskState::Completed);
    assert!(h.plane.inventory().find(&lb.local_id).is_none());
    assert_eq!(h.plane.audit().count(AuditAction::Delete), 1);
    assert_eq!(h.plane.audit().count(AuditAction::SyncDelete), 0);
}
