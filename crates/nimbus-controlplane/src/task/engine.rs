//! Stage-based task engine
//!
//! A task is a persisted record plus a current stage. Running a stage means
//! dispatching to the handler of that stage on a worker; the handler returns
//! a [`Transition`] and the engine records it. Stage runs are queued, picked
//! up by a bounded worker pool, and never execute twice for the same stage.

use super::model::{Stage, Task, TaskKind, TaskState, Transition};
use super::store::TaskStore;
use super::{create, disk, loadbalancer};
use crate::audit::AuditAction;
use crate::error::{ControlPlaneError, Result};
use crate::quota::PendingUsage;
use crate::services::Services;
use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;

/// Failure reason given to tasks found unfinished at startup
pub const RESTART_REASON: &str = "interrupted by restart";

/// Task kinds the engine accepts
#[derive(Debug, Clone)]
pub struct TaskRegistry {
    kinds: BTreeSet<TaskKind>,
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self {
            kinds: TaskKind::ALL.into_iter().collect(),
        }
    }
}

impl TaskRegistry {
    pub fn empty() -> Self {
        Self {
            kinds: BTreeSet::new(),
        }
    }

    pub fn register(mut self, kind: TaskKind) -> Self {
        self.kinds.insert(kind);
        self
    }

    pub fn is_registered(&self, kind: TaskKind) -> bool {
        self.kinds.contains(&kind)
    }
}

#[derive(Debug, Clone)]
struct QueuedRun {
    task_id: String,
    seq: u64,
}

struct EngineInner {
    services: Arc<Services>,
    store: Arc<TaskStore>,
    registry: TaskRegistry,
    queue: mpsc::UnboundedSender<QueuedRun>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<QueuedRun>>>,
    running: Mutex<HashSet<String>>,
}

#[derive(Clone)]
pub struct TaskEngine {
    inner: Arc<EngineInner>,
}

impl TaskEngine {
    pub fn new(services: Arc<Services>, store: Arc<TaskStore>, registry: TaskRegistry) -> Self {
        let (queue, receiver) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(EngineInner {
                services,
                store,
                registry,
                queue,
                receiver: Mutex::new(Some(receiver)),
                running: Mutex::new(HashSet::new()),
            }),
        }
    }

    pub fn services(&self) -> &Arc<Services> {
        &self.inner.services
    }

    pub fn store(&self) -> &Arc<TaskStore> {
        &self.inner.store
    }

    /// Create a task in its initial stage.
    ///
    /// Fails with `InvalidParameter` for an unregistered kind and with
    /// `Conflict` when another active task (other than `parent_task_id`)
    /// already targets one of the resources.
    pub async fn new_task(
        &self,
        kind: TaskKind,
        target_ids: Vec<String>,
        credential: &str,
        params: serde_json::Value,
        parent_task_id: Option<&str>,
    ) -> Result<Task> {
        self.new_task_with_usage(kind, target_ids, credential, params, parent_task_id, None)
            .await
    }

    /// [`new_task`](Self::new_task) for a task that holds a quota
    /// reservation, released per target as each one settles
    pub async fn new_task_with_usage(
        &self,
        kind: TaskKind,
        target_ids: Vec<String>,
        credential: &str,
        params: serde_json::Value,
        parent_task_id: Option<&str>,
        pending_usage: Option<PendingUsage>,
    ) -> Result<Task> {
        if !self.inner.registry.is_registered(kind) {
            return Err(ControlPlaneError::InvalidParameter(format!(
                "task kind {} is not registered",
                kind
            )));
        }
        if target_ids.is_empty() {
            return Err(ControlPlaneError::InvalidParameter(format!(
                "{} task needs at least one target",
                kind
            )));
        }
        self.inner.services.adapters.get(credential)?;
        for id in &target_ids {
            self.inner.services.inventory.get_kind(id, kind.target_kind())?;
        }
        if let Some(parent_id) = parent_task_id {
            let parent = self.inner.store.get(parent_id).await?;
            if parent.is_terminal() {
                return Err(ControlPlaneError::InvalidParameter(format!(
                    "parent task {} is already {}",
                    parent_id, parent.state
                )));
            }
        }

        let mut task = Task::new(
            kind,
            target_ids,
            credential,
            params,
            parent_task_id.map(str::to_string),
        );
        task.pending_usage = pending_usage;
        let task = self.inner.store.insert_exclusive(task).await?;
        self.mark_driver(&task, Some(task.id.as_str()));
        tracing::info!(
            "Created {} task {} for {} target(s)",
            task.kind,
            task.id,
            task.target_ids.len()
        );
        Ok(task)
    }

    /// Queue the current stage for execution; `data` is merged into the
    /// stage data first
    pub async fn schedule_run(&self, task_id: &str, data: Option<serde_json::Value>) -> Result<()> {
        let task = self
            .inner
            .store
            .update(task_id, |t| {
                ensure_active(t)?;
                if let Some(data) = data {
                    t.stage_data = Some(merge_data(t.stage_data.take(), data));
                }
                if t.state == TaskState::Created {
                    t.state = TaskState::Running;
                }
                Ok(())
            })
            .await?;
        self.enqueue(&task)
    }

    /// Move to `stage` and queue it
    pub async fn set_stage(
        &self,
        task_id: &str,
        stage: Stage,
        data: Option<serde_json::Value>,
    ) -> Result<Task> {
        let task = self.persist_stage(task_id, stage, data).await?;
        self.enqueue(&task)?;
        Ok(task)
    }

    pub async fn set_stage_complete(&self, task_id: &str) -> Result<Task> {
        let current = self.inner.store.get(task_id).await?;
        ensure_active(&current)?;
        self.mark_driver(&current, None);

        let task = self
            .inner
            .store
            .update(task_id, |t| {
                ensure_active(t)?;
                t.state = TaskState::Completed;
                t.reason = None;
                Ok(())
            })
            .await?;
        tracing::info!("Task {} ({}) completed at {}", task.id, task.kind, task.stage);
        Ok(task)
    }

    /// Fail the task, mark targets still in progress as failed and release
    /// whatever quota the task still holds.
    ///
    /// Targets and quota are settled before the task turns terminal, so a
    /// waiter woken by the failure sees the final record state.
    pub async fn set_stage_failed(&self, task_id: &str, reason: &str) -> Result<Task> {
        let current = self.inner.store.get(task_id).await?;
        ensure_active(&current)?;

        self.fail_targets(&current, reason).await;
        self.mark_driver(&current, None);
        if let Some(usage) = &current.pending_usage {
            for object_id in usage.amounts.keys() {
                if let Err(e) = self.release_pending(&current.id, object_id).await {
                    tracing::warn!("Failed to release quota of {}: {}", object_id, e);
                }
            }
        }

        let task = self
            .inner
            .store
            .update(task_id, |t| {
                ensure_active(t)?;
                t.state = TaskState::Failed;
                t.reason = Some(reason.to_string());
                Ok(())
            })
            .await?;
        tracing::error!(
            "Task {} ({}) failed at {}: {}",
            task.id,
            task.kind,
            task.stage,
            reason
        );
        Ok(task)
    }

    pub async fn get_task(&self, task_id: &str) -> Result<Task> {
        self.inner.store.get(task_id).await
    }

    pub async fn wait_for_terminal(&self, task_id: &str, timeout: Duration) -> Result<Task> {
        self.inner.store.wait_for_terminal(task_id, timeout).await
    }

    /// Cancel the pending usage the task holds for `object_id`.
    ///
    /// The entry is removed from the task before the ledger is called, so
    /// each object is released at most once. Returns whether anything was
    /// released.
    pub async fn release_pending(&self, task_id: &str, object_id: &str) -> Result<bool> {
        let held = self.inner.store.get(task_id).await?;
        let holds_object = held
            .pending_usage
            .as_ref()
            .is_some_and(|u| u.amounts.contains_key(object_id));
        if !holds_object {
            return Ok(false);
        }

        let mut released = None;
        self.inner
            .store
            .update(task_id, |t| {
                if let Some(usage) = t.pending_usage.as_mut() {
                    if let Some(amount) = usage.amounts.remove(object_id) {
                        released = Some((usage.owner_project_id.clone(), usage.kind, amount));
                    }
                }
                Ok(())
            })
            .await?;

        let Some((owner, kind, amount)) = released else {
            return Ok(false);
        };
        if let Err(e) = self
            .inner
            .services
            .quota
            .cancel_pending(&owner, kind, amount)
            .await
        {
            tracing::warn!("Quota ledger refused to cancel {} {} for {}: {}", amount, kind, owner, e);
        }
        tracing::debug!("Released {} {} of {} held by task {}", amount, kind, object_id, task_id);
        Ok(true)
    }

    /// Fail every task left unfinished by a previous process
    pub async fn recover(&self) -> Result<usize> {
        let unfinished = self.inner.store.active().await;
        for task in &unfinished {
            tracing::warn!("Task {} ({}) was interrupted at {}", task.id, task.kind, task.stage);
            self.set_stage_failed(&task.id, RESTART_REASON).await?;
        }
        Ok(unfinished.len())
    }

    /// Start the worker pool; at most `workers` stages run at once
    pub fn start(&self, workers: usize) -> Result<JoinHandle<()>> {
        let mut receiver = self
            .inner
            .receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| {
                ControlPlaneError::InvalidParameter("task workers already started".to_string())
            })?;

        let semaphore = Arc::new(Semaphore::new(workers.max(1)));
        let engine = self.clone();
        tracing::info!("Starting task engine with {} worker(s)", workers.max(1));

        Ok(tokio::spawn(async move {
            while let Some(run) = receiver.recv().await {
                let Ok(permit) = semaphore.clone().acquire_owned().await else {
                    break;
                };
                let engine = engine.clone();
                tokio::spawn(async move {
                    engine.run_stage(run).await;
                    drop(permit);
                });
            }
        }))
    }

    fn enqueue(&self, task: &Task) -> Result<()> {
        tracing::debug!("Queued {} of task {}", task.stage, task.id);
        self.inner
            .queue
            .send(QueuedRun {
                task_id: task.id.clone(),
                seq: task.stage_seq,
            })
            .map_err(|_| ControlPlaneError::TaskFailure("task queue is closed".to_string()))
    }

    async fn persist_stage(
        &self,
        task_id: &str,
        stage: Stage,
        data: Option<serde_json::Value>,
    ) -> Result<Task> {
        self.inner
            .store
            .update(task_id, |t| {
                ensure_active(t)?;
                if stage.kind() != t.kind {
                    return Err(ControlPlaneError::InvalidParameter(format!(
                        "stage {} does not belong to {} task",
                        stage, t.kind
                    )));
                }
                t.stage = stage;
                t.stage_seq += 1;
                t.stage_data = data;
                t.state = TaskState::Running;
                Ok(())
            })
            .await
    }

    async fn run_stage(&self, run: QueuedRun) {
        if !self.claim(&run.task_id) {
            tracing::debug!("Task {} is already running, dropping duplicate run", run.task_id);
            return;
        }

        let next = match self.execute(&run).await {
            Some(result) => self.apply(&run.task_id, result).await,
            None => None,
        };
        self.unclaim(&run.task_id);

        if let Some(task) = next {
            if let Err(e) = self.enqueue(&task) {
                tracing::error!("Failed to queue {} of task {}: {}", task.stage, task.id, e);
            }
        }
    }

    async fn execute(&self, run: &QueuedRun) -> Option<Result<Transition>> {
        let task = match self.inner.store.get(&run.task_id).await {
            Ok(task) => task,
            Err(e) => {
                tracing::warn!("Queued task vanished: {}", e);
                return None;
            }
        };
        if task.is_terminal() || task.stage_seq != run.seq {
            tracing::debug!("Skipping stale run of task {} ({})", task.id, task.stage);
            return None;
        }
        if !self.inner.registry.is_registered(task.kind) {
            return Some(Err(ControlPlaneError::InvalidParameter(format!(
                "task kind {} is not registered",
                task.kind
            ))));
        }

        tracing::debug!("Running {} of task {}", task.stage, task.id);
        Some(self.dispatch(&task).await)
    }

    async fn dispatch(&self, task: &Task) -> Result<Transition> {
        match task.stage {
            Stage::DiskBatchCreate(stage) => disk::run_batch_create(self, task, stage).await,
            Stage::DiskCreate(stage)
            | Stage::LoadbalancerCreate(stage)
            | Stage::ListenerRuleCreate(stage) => create::run(self, task, stage).await,
            Stage::LoadbalancerDelete(stage) => loadbalancer::run_delete(self, task, stage).await,
        }
    }

    /// Record a handler outcome; returns the task when another stage is due
    async fn apply(&self, task_id: &str, result: Result<Transition>) -> Option<Task> {
        let failure = match result {
            Ok(Transition::Next { stage, data }) => {
                match self.persist_stage(task_id, stage, data).await {
                    Ok(task) => return Some(task),
                    Err(e) => e.to_string(),
                }
            }
            Ok(Transition::Complete) => {
                if let Err(e) = self.set_stage_complete(task_id).await {
                    tracing::error!("Failed to complete task {}: {}", task_id, e);
                }
                return None;
            }
            Ok(Transition::Failed(reason)) => reason,
            Err(e) => e.to_string(),
        };

        if let Err(e) = self.set_stage_failed(task_id, &failure).await {
            tracing::error!("Failed to record failure of task {}: {}", task_id, e);
        }
        None
    }

    async fn fail_targets(&self, task: &Task, reason: &str) {
        let services = &self.inner.services;
        for target in &task.target_ids {
            let driven_by_child = self
                .inner
                .store
                .active_for(target)
                .await
                .iter()
                .any(|t| t.parent_task_id.as_deref() == Some(task.id.as_str()));
            if driven_by_child {
                continue;
            }

            let _lock = match services.locks.lock_object(target).await {
                Ok(lock) => lock,
                Err(e) => {
                    tracing::warn!("Cannot mark {} failed: {}", target, e);
                    continue;
                }
            };
            let Some(record) = services.inventory.find(target) else {
                continue;
            };
            if !record.status.is_in_progress() {
                continue;
            }

            match services.inventory.set_status(
                target,
                task.kind.failed_status(),
                Some(reason.to_string()),
            ) {
                Ok((updated, _)) => {
                    services.audit.record(&updated, AuditAction::TaskFailed, reason);
                    services.notify_failure(&updated, reason);
                }
                Err(e) => tracing::warn!("Cannot mark {} failed: {}", target, e),
            }
        }
    }

    /// Point the targets' `task_id` at `driver`, or clear it where it still
    /// names this task. Targets removed meanwhile are skipped.
    fn mark_driver(&self, task: &Task, driver: Option<&str>) {
        for id in &task.target_ids {
            let outcome = self.inner.services.inventory.update(id, |r| {
                match driver {
                    Some(driver) => r.task_id = Some(driver.to_string()),
                    None if r.task_id.as_deref() == Some(task.id.as_str()) => r.task_id = None,
                    None => {}
                }
                Ok(())
            });
            if let Err(e) = outcome {
                if !e.is_not_found() {
                    tracing::warn!("Failed to update task of {}: {}", id, e);
                }
            }
        }
    }

    fn claim(&self, task_id: &str) -> bool {
        self.inner
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(task_id.to_string())
    }

    fn unclaim(&self, task_id: &str) {
        self.inner
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(task_id);
    }
}

fn ensure_active(task: &Task) -> Result<()> {
    if task.is_terminal() {
        return Err(ControlPlaneError::InvalidParameter(format!(
            "task {} is already {}",
            task.id, task.state
        )));
    }
    Ok(())
}

fn merge_data(current: Option<serde_json::Value>, extra: serde_json::Value) -> serde_json::Value {
    match (current, extra) {
        (Some(serde_json::Value::Object(mut base)), serde_json::Value::Object(extra)) => {
            base.extend(extra);
            serde_json::Value::Object(base)
        }
        (_, extra) => extra,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_data() {
        let merged = merge_data(
            Some(serde_json::json!({"a": 1, "b": 2})),
            serde_json::json!({"b": 3, "c": 4}),
        );
        assert_eq!(merged, serde_json::json!({"a": 1, "b": 3, "c": 4}));
        assert_eq!(
            merge_data(None, serde_json::json!({"x": true})),
            serde_json::json!({"x": true})
        );
    }

    #[test]
    fn test_default_registry_knows_every_kind() {
        let registry = TaskRegistry::default();
        for kind in TaskKind::ALL {
            assert!(registry.is_registered(kind));
        }
        let only_disks = TaskRegistry::empty().register(TaskKind::DiskCreate);
        assert!(!only_disks.is_registered(TaskKind::LoadbalancerDelete));
    }
}
