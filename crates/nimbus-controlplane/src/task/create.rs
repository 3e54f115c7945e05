//! Remote creation of a single object
//!
//! Shared by disks, loadbalancers and listener rules: `init` issues the
//! remote create and records the external id, `wait_ready` polls until the
//! provider reports the object usable. The remote create and the external id
//! write happen under the class lock of the record's kind and owner.

use super::engine::TaskEngine;
use super::model::{CreateStage, Stage, Task, TaskKind, Transition};
use crate::audit::AuditAction;
use crate::error::{ControlPlaneError, Result};
use crate::inventory::Inventory;
use crate::record::ResourceRecord;
use nimbus_cloud::{CloudError, CreateSpec, ResourceStatus, wait_for_status};

pub(crate) async fn run(engine: &TaskEngine, task: &Task, stage: CreateStage) -> Result<Transition> {
    let id = task.single_target()?;
    match stage {
        CreateStage::Init => start_create(engine, task, id).await,
        CreateStage::WaitReady => wait_ready(engine, task, id).await,
    }
}

fn wait_stage(kind: TaskKind) -> Result<Stage> {
    match kind {
        TaskKind::DiskCreate => Ok(Stage::DiskCreate(CreateStage::WaitReady)),
        TaskKind::LoadbalancerCreate => Ok(Stage::LoadbalancerCreate(CreateStage::WaitReady)),
        TaskKind::ListenerRuleCreate => Ok(Stage::ListenerRuleCreate(CreateStage::WaitReady)),
        other => Err(ControlPlaneError::InvalidParameter(format!(
            "{} is not a create task",
            other
        ))),
    }
}

async fn start_create(engine: &TaskEngine, task: &Task, id: &str) -> Result<Transition> {
    let services = engine.services();
    let adapter = services.adapters.get(&task.credential)?;

    let record = {
        let _lock = services.locks.lock_object(id).await?;
        let (record, _) = services
            .inventory
            .set_status(id, ResourceStatus::Creating, None)?;
        record
    };

    if let Some(external_id) = &record.external_id {
        tracing::info!("{} {} already exists remotely as {}", record.kind, record.name, external_id);
        return Ok(Transition::next(wait_stage(task.kind)?));
    }

    let spec = create_spec(&services.inventory, &record);

    // Sync passes over this kind and owner wait until the new object is
    // known by its external id, so they never import it a second time.
    let _class = services
        .locks
        .lock_class(record.kind, &record.owner_project_id)
        .await?;
    tracing::info!("Creating {} {} via {}", record.kind, record.name, adapter.name());
    let snapshot = adapter.create(record.kind, &spec).await?;

    let created = {
        let _lock = services.locks.lock_object(id).await?;
        let (created, _) = services.inventory.update(id, |r| {
            r.external_id = Some(snapshot.global_id.clone());
            r.metadata.extend(snapshot.attributes.clone());
            Ok(())
        })?;
        created
    };
    services.audit.record(
        &created,
        AuditAction::StatusChange,
        format!("created remotely as {}", snapshot.global_id),
    );

    Ok(Transition::Next {
        stage: wait_stage(task.kind)?,
        data: Some(serde_json::json!({ "external_id": snapshot.global_id })),
    })
}

async fn wait_ready(engine: &TaskEngine, task: &Task, id: &str) -> Result<Transition> {
    let services = engine.services();
    let adapter = services.adapters.get(&task.credential)?;
    let record = services.inventory.get(id)?;
    let external_id = record.external_id.clone().ok_or_else(|| {
        ControlPlaneError::TaskFailure(format!("{} {} has no external id", record.kind, record.name))
    })?;

    let snapshot = match wait_for_status(
        adapter.as_ref(),
        record.kind,
        &external_id,
        &[ResourceStatus::Ready],
        &services.poll,
    )
    .await
    {
        Ok(snapshot) => snapshot,
        Err(CloudError::Timeout(msg)) => return Err(ControlPlaneError::Timeout(msg)),
        Err(e) => return Err(e.into()),
    };

    let _lock = services.locks.lock_object(id).await?;
    let (ready, diff) = services.inventory.update(id, |r| {
        r.set_status(ResourceStatus::Ready, None);
        r.metadata.extend(snapshot.attributes.clone());
        Ok(())
    })?;
    if !diff.is_empty() {
        services
            .audit
            .record_diff(&ready, AuditAction::StatusChange, &diff);
    }
    Ok(Transition::Complete)
}

/// Remote create parameters: parents by external id, metadata as config
fn create_spec(inventory: &Inventory, record: &ResourceRecord) -> CreateSpec {
    let mut spec = CreateSpec::new(&record.name);
    for (kind, parent_id) in &record.parents {
        match inventory.find(parent_id).and_then(|p| p.external_id) {
            Some(external_id) => spec = spec.with_parent(*kind, external_id),
            None => tracing::debug!(
                "{} {} has no remote {} yet",
                record.kind,
                record.name,
                kind
            ),
        }
    }
    for (key, value) in &record.metadata {
        spec = spec.with_config(key, value.clone());
    }
    spec
}
