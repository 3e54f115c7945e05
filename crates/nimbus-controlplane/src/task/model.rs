//! Task records and stage identifiers

use crate::error::{ControlPlaneError, Result};
use crate::quota::PendingUsage;
use chrono::{DateTime, Utc};
use nimbus_cloud::{ResourceKind, ResourceStatus};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    DiskBatchCreate,
    DiskCreate,
    LoadbalancerCreate,
    LoadbalancerDelete,
    ListenerRuleCreate,
}

impl TaskKind {
    pub const ALL: [TaskKind; 5] = [
        TaskKind::DiskBatchCreate,
        TaskKind::DiskCreate,
        TaskKind::LoadbalancerCreate,
        TaskKind::LoadbalancerDelete,
        TaskKind::ListenerRuleCreate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::DiskBatchCreate => "disk_batch_create",
            TaskKind::DiskCreate => "disk_create",
            TaskKind::LoadbalancerCreate => "loadbalancer_create",
            TaskKind::LoadbalancerDelete => "loadbalancer_delete",
            TaskKind::ListenerRuleCreate => "listener_rule_create",
        }
    }

    /// Kind of every target resource
    pub fn target_kind(&self) -> ResourceKind {
        match self {
            TaskKind::DiskBatchCreate | TaskKind::DiskCreate => ResourceKind::Disk,
            TaskKind::LoadbalancerCreate | TaskKind::LoadbalancerDelete => {
                ResourceKind::Loadbalancer
            }
            TaskKind::ListenerRuleCreate => ResourceKind::ListenerRule,
        }
    }

    pub fn initial_stage(&self) -> Stage {
        match self {
            TaskKind::DiskBatchCreate => Stage::DiskBatchCreate(BatchCreateStage::Init),
            TaskKind::DiskCreate => Stage::DiskCreate(CreateStage::Init),
            TaskKind::LoadbalancerCreate => Stage::LoadbalancerCreate(CreateStage::Init),
            TaskKind::LoadbalancerDelete => Stage::LoadbalancerDelete(DeleteStage::Init),
            TaskKind::ListenerRuleCreate => Stage::ListenerRuleCreate(CreateStage::Init),
        }
    }

    /// Status given to targets still in progress when the task fails
    pub fn failed_status(&self) -> ResourceStatus {
        match self {
            TaskKind::DiskBatchCreate => ResourceStatus::ScheduleFailed,
            TaskKind::DiskCreate | TaskKind::LoadbalancerCreate | TaskKind::ListenerRuleCreate => {
                ResourceStatus::CreateFailed
            }
            TaskKind::LoadbalancerDelete => ResourceStatus::DeleteFailed,
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = ControlPlaneError;

    fn from_str(s: &str) -> Result<Self> {
        TaskKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| ControlPlaneError::InvalidParameter(format!("unknown task kind: {}", s)))
    }
}

/// Stages of a batch create: place every object, then hand each one to its
/// own create task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchCreateStage {
    Init,
    Schedule,
}

/// Stages of a single remote create
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreateStage {
    Init,
    WaitReady,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteStage {
    Init,
    RemoteDelete,
}

/// Stage of a task; the outer variant fixes the task kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    DiskBatchCreate(BatchCreateStage),
    DiskCreate(CreateStage),
    LoadbalancerCreate(CreateStage),
    LoadbalancerDelete(DeleteStage),
    ListenerRuleCreate(CreateStage),
}

impl Stage {
    pub fn kind(&self) -> TaskKind {
        match self {
            Stage::DiskBatchCreate(_) => TaskKind::DiskBatchCreate,
            Stage::DiskCreate(_) => TaskKind::DiskCreate,
            Stage::LoadbalancerCreate(_) => TaskKind::LoadbalancerCreate,
            Stage::LoadbalancerDelete(_) => TaskKind::LoadbalancerDelete,
            Stage::ListenerRuleCreate(_) => TaskKind::ListenerRuleCreate,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let step = match self {
            Stage::DiskBatchCreate(BatchCreateStage::Init)
            | Stage::DiskCreate(CreateStage::Init)
            | Stage::LoadbalancerCreate(CreateStage::Init)
            | Stage::LoadbalancerDelete(DeleteStage::Init)
            | Stage::ListenerRuleCreate(CreateStage::Init) => "init",
            Stage::DiskBatchCreate(BatchCreateStage::Schedule) => "schedule",
            Stage::DiskCreate(CreateStage::WaitReady)
            | Stage::LoadbalancerCreate(CreateStage::WaitReady)
            | Stage::ListenerRuleCreate(CreateStage::WaitReady) => "wait_ready",
            Stage::LoadbalancerDelete(DeleteStage::RemoteDelete) => "remote_delete",
        };
        write!(f, "{}.{}", self.kind(), step)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Created,
    Running,
    Completed,
    Failed,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskState::Created => write!(f, "created"),
            TaskState::Running => write!(f, "running"),
            TaskState::Completed => write!(f, "completed"),
            TaskState::Failed => write!(f, "failed"),
        }
    }
}

/// What a stage handler asks the engine to do next
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Next {
        stage: Stage,
        data: Option<serde_json::Value>,
    },
    Complete,
    Failed(String),
}

impl Transition {
    pub fn next(stage: Stage) -> Self {
        Transition::Next { stage, data: None }
    }
}

/// Durable record of one long-running operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub kind: TaskKind,
    pub target_kind: ResourceKind,
    pub target_ids: Vec<String>,

    /// Credential (`manager_id`) the task acts through
    pub credential: String,

    pub stage: Stage,

    /// Bumped on every stage change; a queued run for an older sequence is stale
    pub stage_seq: u64,

    pub state: TaskState,
    pub params: serde_json::Value,

    /// Data handed to the current stage by the previous one
    #[serde(default)]
    pub stage_data: Option<serde_json::Value>,

    pub parent_task_id: Option<String>,

    #[serde(default)]
    pub pending_usage: Option<PendingUsage>,

    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(
        kind: TaskKind,
        target_ids: Vec<String>,
        credential: impl Into<String>,
        params: serde_json::Value,
        parent_task_id: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            target_kind: kind.target_kind(),
            target_ids,
            credential: credential.into(),
            stage: kind.initial_stage(),
            stage_seq: 0,
            state: TaskState::Created,
            params,
            stage_data: None,
            parent_task_id,
            pending_usage: None,
            reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn targets(&self, id: &str) -> bool {
        self.target_ids.iter().any(|t| t == id)
    }

    pub fn params_as<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.params.clone()).map_err(|e| {
            ControlPlaneError::InvalidParameter(format!("task {} params: {}", self.id, e))
        })
    }

    /// The single target of a per-object task
    pub fn single_target(&self) -> Result<&str> {
        match self.target_ids.as_slice() {
            [id] => Ok(id.as_str()),
            _ => Err(ControlPlaneError::InvalidParameter(format!(
                "{} task {} expects exactly one target, has {}",
                self.kind,
                self.id,
                self.target_ids.len()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_stage_matches_kind() {
        for kind in TaskKind::ALL {
            assert_eq!(kind.initial_stage().kind(), kind);
            assert_eq!(kind.as_str().parse::<TaskKind>().unwrap(), kind);
        }
        assert!(matches!(
            "vm_migrate".parse::<TaskKind>(),
            Err(ControlPlaneError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(
            Stage::DiskCreate(CreateStage::WaitReady).to_string(),
            "disk_create.wait_ready"
        );
        assert_eq!(
            Stage::LoadbalancerDelete(DeleteStage::RemoteDelete).to_string(),
            "loadbalancer_delete.remote_delete"
        );
    }

    #[test]
    fn test_stage_serde_shape() {
        let json = serde_json::to_value(Stage::DiskBatchCreate(BatchCreateStage::Schedule)).unwrap();
        assert_eq!(json, serde_json::json!({"disk_batch_create": "schedule"}));
    }

    #[test]
    fn test_single_target() {
        let task = Task::new(
            TaskKind::DiskCreate,
            vec!["a".into(), "b".into()],
            "m1",
            serde_json::Value::Null,
            None,
        );
        assert!(task.single_target().is_err());
        assert!(task.targets("b"));
    }
}
