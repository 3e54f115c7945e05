//! Disk batch creation
//!
//! The batch task places every disk that has no storage yet, binds each
//! placed disk to its storage and hands it to a child `disk_create` task.
//! Disks that already name a storage skip placement.

use super::engine::TaskEngine;
use super::model::{BatchCreateStage, Stage, Task, TaskKind, Transition};
use super::schedule::{self, Placement};
use crate::error::{ControlPlaneError, Result};
use crate::inventory::Inventory;
use crate::record::ResourceRecord;
use crate::scheduler::{Candidate, ScheduleInput};
use async_trait::async_trait;
use nimbus_cloud::ResourceKind;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Parameters of a `disk_batch_create` task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskBatchParams {
    pub owner_project_id: String,
    pub size_gb: u64,
    #[serde(default)]
    pub zone_id: Option<String>,
}

pub(crate) async fn run_batch_create(
    engine: &TaskEngine,
    task: &Task,
    stage: BatchCreateStage,
) -> Result<Transition> {
    match stage {
        BatchCreateStage::Init => init(engine, task).await,
        BatchCreateStage::Schedule => schedule(engine, task).await,
    }
}

async fn init(engine: &TaskEngine, task: &Task) -> Result<Transition> {
    let inventory = &engine.services().inventory;
    let mut unplaced = Vec::new();

    for id in &task.target_ids {
        let record = inventory.get_kind(id, ResourceKind::Disk)?;
        if record.parent(ResourceKind::Storage).is_some() {
            tracing::debug!("Disk {} already has a storage, skipping placement", record.name);
            start_disk_create(engine, task, &record).await?;
            engine.release_pending(&task.id, id).await?;
        } else {
            unplaced.push(id.clone());
        }
    }

    if unplaced.is_empty() {
        return Ok(Transition::Complete);
    }

    schedule::start_schedule_objects(engine, task, &unplaced).await?;
    Ok(Transition::Next {
        stage: Stage::DiskBatchCreate(BatchCreateStage::Schedule),
        data: Some(serde_json::json!({ "objects": unplaced })),
    })
}

async fn schedule(engine: &TaskEngine, task: &Task) -> Result<Transition> {
    let params: DiskBatchParams = task.params_as()?;
    let ids: Vec<String> = task
        .stage_data
        .as_ref()
        .and_then(|d| d.get("objects"))
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_else(|| task.target_ids.clone());

    let input = ScheduleInput {
        kind: ResourceKind::Disk,
        owner_project_id: params.owner_project_id,
        manager_id: task.credential.clone(),
        zone_id: params.zone_id,
        size_gb: Some(params.size_gb),
        extra: HashMap::new(),
    };
    Ok(schedule::schedule_objects(engine, task, &ids, &input, &DiskPlacement).await)
}

async fn start_disk_create(engine: &TaskEngine, parent: &Task, disk: &ResourceRecord) -> Result<()> {
    let child = engine
        .new_task(
            TaskKind::DiskCreate,
            vec![disk.local_id.clone()],
            &parent.credential,
            serde_json::json!({}),
            Some(&parent.id),
        )
        .await?;
    engine.schedule_run(&child.id, None).await
}

struct DiskPlacement;

#[async_trait]
impl Placement for DiskPlacement {
    fn bind(
        &self,
        inventory: &Inventory,
        record: &ResourceRecord,
        candidate: &Candidate,
    ) -> Result<ResourceRecord> {
        let storage_id = candidate.storage_id.as_deref().ok_or_else(|| {
            ControlPlaneError::Schedule(format!("candidate {} names no storage", candidate.id))
        })?;
        let storage = inventory.get_kind(storage_id, ResourceKind::Storage)?;

        let (bound, _) = inventory.update(&record.local_id, |r| {
            r.parents.insert(ResourceKind::Storage, storage.local_id.clone());
            if let Some(zone) = storage.parent(ResourceKind::Zone) {
                r.parents
                    .entry(ResourceKind::Zone)
                    .or_insert_with(|| zone.to_string());
            }
            r.metadata
                .insert("host_id".to_string(), serde_json::json!(candidate.id));
            Ok(())
        })?;
        tracing::debug!("Bound disk {} to storage {}", bound.name, storage.name);
        Ok(bound)
    }

    async fn after_bind(
        &self,
        engine: &TaskEngine,
        task: &Task,
        record: &ResourceRecord,
    ) -> Result<()> {
        start_disk_create(engine, task, record).await
    }
}
