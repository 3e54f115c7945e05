//! Loadbalancer deletion
//!
//! `init` marks the loadbalancer and, under the class lock of each dependent
//! kind, every sub-resource (listeners, backend groups, listener rules) as
//! pending delete. `remote_delete` removes the remote object and then the
//! local records, leaves first.

use super::engine::TaskEngine;
use super::model::{DeleteStage, Stage, Task, Transition};
use crate::audit::AuditAction;
use crate::error::Result;
use crate::record::{DeleteState, ResourceRecord};
use crate::services::Services;
use nimbus_cloud::ResourceStatus;

pub(crate) async fn run_delete(
    engine: &TaskEngine,
    task: &Task,
    stage: DeleteStage,
) -> Result<Transition> {
    let id = task.single_target()?;
    match stage {
        DeleteStage::Init => begin_delete(engine, id).await,
        DeleteStage::RemoteDelete => remote_delete(engine, task, id).await,
    }
}

async fn begin_delete(engine: &TaskEngine, id: &str) -> Result<Transition> {
    let services = engine.services();
    let record = {
        let _lock = services.locks.lock_object(id).await?;
        let (record, _) = services.inventory.update(id, |r| {
            r.set_status(ResourceStatus::Deleting, None);
            r.delete_state = DeleteState::PendingDelete;
            Ok(())
        })?;
        record
    };
    services
        .audit
        .record(&record, AuditAction::PendingDelete, "delete requested");

    pre_delete_subs(services, &record).await?;
    Ok(Transition::next(Stage::LoadbalancerDelete(
        DeleteStage::RemoteDelete,
    )))
}

/// Mark every descendant pending delete, one dependent kind at a time
async fn pre_delete_subs(services: &Services, root: &ResourceRecord) -> Result<()> {
    let mut parents = vec![root.clone()];
    while let Some(parent) = parents.pop() {
        for kind in parent.kind.dependent_kinds() {
            let _class = services
                .locks
                .lock_class(*kind, &root.owner_project_id)
                .await?;
            for child in services
                .inventory
                .children(*kind, parent.kind, &parent.local_id)
            {
                let _lock = services.locks.lock_object(&child.local_id).await?;
                let marked = if child.is_live() {
                    let (marked, _) = services.inventory.update(&child.local_id, |r| {
                        r.set_status(ResourceStatus::Deleting, None);
                        r.delete_state = DeleteState::PendingDelete;
                        Ok(())
                    })?;
                    services.audit.record(
                        &marked,
                        AuditAction::PendingDelete,
                        format!("parent {} {} is being deleted", parent.kind, parent.name),
                    );
                    marked
                } else {
                    child
                };
                parents.push(marked);
            }
        }
    }
    Ok(())
}

async fn remote_delete(engine: &TaskEngine, task: &Task, id: &str) -> Result<Transition> {
    let services = engine.services();
    let Some(record) = services.inventory.find(id) else {
        tracing::info!("Loadbalancer {} is already gone", id);
        return Ok(Transition::Complete);
    };

    // Held until the records are gone so a sync pass sees either both the
    // remote object and its records or neither.
    let _class = services
        .locks
        .lock_class(record.kind, &record.owner_project_id)
        .await?;
    if let Some(external_id) = &record.external_id {
        let adapter = services.adapters.get(&task.credential)?;
        match adapter.delete(record.kind, external_id).await {
            Ok(()) => tracing::info!("Deleted {} {} remotely", record.kind, external_id),
            Err(e) if e.is_not_found() => {
                tracing::debug!("{} {} was already gone remotely", record.kind, external_id)
            }
            Err(e) => return Err(e.into()),
        }
    }

    for sub in descendants(services, &record).iter().rev() {
        remove_record(services, sub, "parent deleted").await?;
    }
    remove_record(services, &record, "deleted").await?;
    Ok(Transition::Complete)
}

/// Pending-delete descendants, parents before children
fn descendants(services: &Services, root: &ResourceRecord) -> Vec<ResourceRecord> {
    let mut found = Vec::new();
    let mut cursor = 0;
    let mut frontier = vec![root.clone()];
    while cursor < frontier.len() {
        let parent = frontier[cursor].clone();
        cursor += 1;
        for kind in parent.kind.dependent_kinds() {
            for child in services
                .inventory
                .children(*kind, parent.kind, &parent.local_id)
            {
                if child.delete_state == DeleteState::PendingDelete {
                    found.push(child.clone());
                    frontier.push(child);
                }
            }
        }
    }
    found
}

async fn remove_record(services: &Services, record: &ResourceRecord, detail: &str) -> Result<()> {
    let _lock = services.locks.lock_object(&record.local_id).await?;
    match services.inventory.remove(&record.local_id) {
        Ok(removed) => {
            services.audit.record(&removed, AuditAction::Delete, detail);
            Ok(())
        }
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => Err(e),
    }
}
