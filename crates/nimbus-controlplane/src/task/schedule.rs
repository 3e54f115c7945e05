//! Placement of a batch of objects
//!
//! ```text
//! start_schedule_objects ──▶ Scheduling ──▶ scheduler.do_schedule(input, n)
//!                                               │
//!                ┌──────────────────────────────┼─────────────────────────┐
//!          request failed               candidate                     error
//!     every object failed          bind + follow-up            ScheduleFailed
//!          task failed             (under object lock)          + notify
//! ```
//!
//! Each object's pending usage is released exactly once, on whichever path
//! it ends up.

use super::engine::TaskEngine;
use super::model::{Task, Transition};
use crate::audit::AuditAction;
use crate::error::Result;
use crate::inventory::Inventory;
use crate::record::ResourceRecord;
use crate::scheduler::{Candidate, ScheduleInput, ScheduleResult};
use async_trait::async_trait;
use nimbus_cloud::ResourceStatus;

/// Prefix of every per-object placement failure
pub const NO_MATCH_REASON: &str = "No matching resources";

/// Kind-specific handling of a successful placement
#[async_trait]
pub(crate) trait Placement: Send + Sync {
    /// Record the placement on the object; runs under the object lock
    fn bind(
        &self,
        inventory: &Inventory,
        record: &ResourceRecord,
        candidate: &Candidate,
    ) -> Result<ResourceRecord>;

    /// Start whatever follows the placement; runs without locks
    async fn after_bind(&self, engine: &TaskEngine, task: &Task, record: &ResourceRecord)
    -> Result<()>;
}

/// Mark objects as waiting for placement
pub(crate) async fn start_schedule_objects(
    engine: &TaskEngine,
    task: &Task,
    ids: &[String],
) -> Result<()> {
    let services = engine.services();
    for id in ids {
        let _lock = services.locks.lock_object(id).await?;
        let (record, _) = services
            .inventory
            .set_status(id, ResourceStatus::Scheduling, None)?;
        services.audit.record(
            &record,
            AuditAction::Allocating,
            format!("waiting for placement (task {})", task.id),
        );
    }
    Ok(())
}

/// Place `ids` in one scheduler request and settle every object.
///
/// The task fails when the request fails or when no object was placed.
pub(crate) async fn schedule_objects(
    engine: &TaskEngine,
    task: &Task,
    ids: &[String],
    input: &ScheduleInput,
    placement: &dyn Placement,
) -> Transition {
    let results = match engine.services().scheduler.do_schedule(input, ids.len()).await {
        Ok(results) if results.len() == ids.len() => results,
        Ok(results) => {
            let reason = format!(
                "Scheduler fail: {} results for {} objects",
                results.len(),
                ids.len()
            );
            for id in ids {
                on_schedule_failed(engine, task, id, &reason).await;
            }
            return Transition::Failed(reason);
        }
        Err(e) => {
            let reason = format!("Scheduler fail: {}", e);
            for id in ids {
                on_schedule_failed(engine, task, id, &reason).await;
            }
            return Transition::Failed(reason);
        }
    };

    let mut placed = 0usize;
    for (id, result) in ids.iter().zip(results) {
        match result {
            ScheduleResult::Candidate(candidate) => {
                match on_schedule_succeeded(engine, task, id, &candidate, placement).await {
                    Ok(()) => placed += 1,
                    Err(e) => {
                        let reason = format!("{}: {}", NO_MATCH_REASON, e);
                        on_schedule_failed(engine, task, id, &reason).await;
                    }
                }
            }
            ScheduleResult::Error(message) => {
                let reason = if message.is_empty() {
                    NO_MATCH_REASON.to_string()
                } else {
                    format!("{}: {}", NO_MATCH_REASON, message)
                };
                on_schedule_failed(engine, task, id, &reason).await;
            }
        }
    }

    tracing::info!("Task {} placed {}/{} object(s)", task.id, placed, ids.len());
    if placed == 0 {
        Transition::Failed("Schedule failed: no object could be placed".to_string())
    } else {
        Transition::Complete
    }
}

async fn on_schedule_succeeded(
    engine: &TaskEngine,
    task: &Task,
    id: &str,
    candidate: &Candidate,
    placement: &dyn Placement,
) -> Result<()> {
    let services = engine.services();
    let record = {
        let _lock = services.locks.lock_object(id).await?;
        let record = services.inventory.get(id)?;
        placement.bind(&services.inventory, &record, candidate)?
    };
    placement.after_bind(engine, task, &record).await?;
    release(engine, task, id).await;
    Ok(())
}

async fn on_schedule_failed(engine: &TaskEngine, task: &Task, id: &str, reason: &str) {
    let services = engine.services();
    match services.locks.lock_object(id).await {
        Ok(_lock) => match services.inventory.set_status(
            id,
            ResourceStatus::ScheduleFailed,
            Some(reason.to_string()),
        ) {
            Ok((record, _)) => {
                services.audit.record(&record, AuditAction::AllocateFail, reason);
                services.notify_failure(&record, reason);
            }
            Err(e) => tracing::warn!("Cannot mark {} unschedulable: {}", id, e),
        },
        Err(e) => tracing::warn!("Cannot mark {} unschedulable: {}", id, e),
    }
    release(engine, task, id).await;
}

async fn release(engine: &TaskEngine, task: &Task, id: &str) {
    if let Err(e) = engine.release_pending(&task.id, id).await {
        tracing::warn!("Failed to release quota of {} held by {}: {}", id, task.id, e);
    }
}
