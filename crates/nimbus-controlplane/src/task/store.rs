//! Task persistence
//!
//! Tasks live in memory and, when a state directory is configured, in
//! `<state_dir>/tasks.json`. Every change replaces the file atomically and
//! keeps the previous version as `tasks.json.backup`.

use super::model::Task;
use crate::error::{ControlPlaneError, Result};
use crate::state_file;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::sync::{Mutex, Notify};

const TASK_STATE_VERSION: u32 = 1;
const TASK_FILE: &str = "tasks.json";

#[derive(Debug, Serialize, Deserialize)]
struct TaskFile {
    version: u32,
    updated_at: DateTime<Utc>,
    tasks: Vec<Task>,
}

pub struct TaskStore {
    dir: Option<PathBuf>,
    tasks: Mutex<BTreeMap<String, Task>>,
    changed: Notify,
}

impl TaskStore {
    /// Store that forgets everything on restart
    pub fn in_memory() -> Self {
        Self {
            dir: None,
            tasks: Mutex::new(BTreeMap::new()),
            changed: Notify::new(),
        }
    }

    /// Open (or create) the store under `dir`
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        if !dir.exists() {
            fs::create_dir_all(&dir).await?;
            tracing::debug!("Created state directory: {}", dir.display());
        }

        let tasks = state_file::read_with_backup(&dir.join(TASK_FILE), parse_task_file)?
            .unwrap_or_default();
        tracing::debug!("Loaded {} task(s) from {}", tasks.len(), dir.display());

        Ok(Self {
            dir: Some(dir),
            tasks: Mutex::new(tasks),
            changed: Notify::new(),
        })
    }

    async fn save(&self, tasks: &BTreeMap<String, Task>) -> Result<()> {
        let Some(dir) = &self.dir else {
            return Ok(());
        };
        let path = dir.join(TASK_FILE);
        let file = TaskFile {
            version: TASK_STATE_VERSION,
            updated_at: Utc::now(),
            tasks: tasks.values().cloned().collect(),
        };
        let content = serde_json::to_string_pretty(&file)?;
        tokio::task::spawn_blocking(move || state_file::write_atomic(&path, &content))
            .await
            .map_err(|e| ControlPlaneError::State(format!("task file writer stopped: {}", e)))??;
        tracing::trace!("Saved {} task(s)", tasks.len());
        Ok(())
    }

    /// Insert a task unless another active task already targets one of its
    /// targets. The parent of `task` is exempt.
    pub async fn insert_exclusive(&self, task: Task) -> Result<Task> {
        let mut tasks = self.tasks.lock().await;
        if tasks.contains_key(&task.id) {
            return Err(ControlPlaneError::Conflict(format!("task {} already exists", task.id)));
        }
        for target in &task.target_ids {
            let blocking = tasks.values().find(|t| {
                !t.is_terminal()
                    && t.targets(target)
                    && task.parent_task_id.as_deref() != Some(t.id.as_str())
            });
            if let Some(active) = blocking {
                return Err(ControlPlaneError::Conflict(format!(
                    "{} {} is busy with {} task {}",
                    task.target_kind, target, active.kind, active.id
                )));
            }
        }

        tasks.insert(task.id.clone(), task.clone());
        if let Err(e) = self.save(&tasks).await {
            tasks.remove(&task.id);
            return Err(e);
        }
        drop(tasks);
        self.changed.notify_waiters();
        Ok(task)
    }

    pub async fn get(&self, id: &str) -> Result<Task> {
        self.tasks
            .lock()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| ControlPlaneError::NotFound(format!("task {}", id)))
    }

    /// Apply `f` to the task and persist the result; nothing changes if `f`
    /// or the write fails
    pub async fn update<F>(&self, id: &str, f: F) -> Result<Task>
    where
        F: FnOnce(&mut Task) -> Result<()>,
    {
        let mut tasks = self.tasks.lock().await;
        let previous = tasks
            .get(id)
            .cloned()
            .ok_or_else(|| ControlPlaneError::NotFound(format!("task {}", id)))?;

        let mut next = previous.clone();
        f(&mut next)?;
        next.updated_at = Utc::now();
        tasks.insert(id.to_string(), next.clone());

        if let Err(e) = self.save(&tasks).await {
            tasks.insert(id.to_string(), previous);
            return Err(e);
        }
        drop(tasks);
        self.changed.notify_waiters();
        Ok(next)
    }

    pub async fn list(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.tasks.lock().await.values().cloned().collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        tasks
    }

    pub async fn active(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self
            .tasks
            .lock()
            .await
            .values()
            .filter(|t| !t.is_terminal())
            .cloned()
            .collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        tasks
    }

    /// Active tasks targeting `target_id`
    pub async fn active_for(&self, target_id: &str) -> Vec<Task> {
        self.tasks
            .lock()
            .await
            .values()
            .filter(|t| !t.is_terminal() && t.targets(target_id))
            .cloned()
            .collect()
    }

    pub async fn children_of(&self, parent_id: &str) -> Vec<Task> {
        self.tasks
            .lock()
            .await
            .values()
            .filter(|t| t.parent_task_id.as_deref() == Some(parent_id))
            .cloned()
            .collect()
    }

    /// Wait until the task is completed or failed
    pub async fn wait_for_terminal(&self, id: &str, timeout: Duration) -> Result<Task> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let task = self.get(id).await?;
            if task.is_terminal() {
                return Ok(task);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(ControlPlaneError::Timeout(format!(
                    "task {} still {} at {} after {:?}",
                    id, task.state, task.stage, timeout
                )));
            }
        }
    }
}

fn parse_task_file(content: &str) -> Result<BTreeMap<String, Task>> {
    let file: TaskFile = serde_json::from_str(content)?;
    if file.version > TASK_STATE_VERSION {
        return Err(ControlPlaneError::State(format!(
            "Task file version {} is newer than supported version {}",
            file.version, TASK_STATE_VERSION
        )));
    }
    Ok(file.tasks.into_iter().map(|t| (t.id.clone(), t)).collect())
}
