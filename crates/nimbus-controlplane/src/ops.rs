//! Synchronous request handling
//!
//! Requests validate their input, create the local records and start the
//! task that carries the remote work. Validation errors surface here and no
//! task is created for a rejected request.

use crate::error::{ControlPlaneError, Result};
use crate::plane::ControlPlane;
use crate::quota::PendingUsage;
use crate::record::ResourceRecord;
use crate::task::{DiskBatchParams, Task, TaskKind};
use nimbus_cloud::{ResourceKind, ResourceStatus};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskCreateRequest {
    pub owner_project_id: String,
    pub manager_id: String,
    pub name: String,
    pub size_gb: u64,
    #[serde(default = "default_count")]
    pub count: usize,
    #[serde(default)]
    pub zone_id: Option<String>,
    /// Skip placement and create on this storage
    #[serde(default)]
    pub storage_id: Option<String>,
}

fn default_count() -> usize {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadbalancerCreateRequest {
    pub owner_project_id: String,
    pub manager_id: String,
    pub name: String,
    #[serde(default)]
    pub zone_id: Option<String>,
    #[serde(default)]
    pub network_id: Option<String>,
    #[serde(default)]
    pub spec: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerRuleCreateRequest {
    pub listener_id: String,
    pub backend_group_id: String,
    pub name: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default = "default_path")]
    pub path: String,
}

fn default_path() -> String {
    "/".to_string()
}

/// Records created by a request and the task driving them
#[derive(Debug, Clone)]
pub struct Accepted {
    pub task: Task,
    pub records: Vec<ResourceRecord>,
}

impl ControlPlane {
    /// Create `count` disks; placement and creation run in a batch task
    pub async fn create_disks(&self, req: DiskCreateRequest) -> Result<Accepted> {
        if req.name.trim().is_empty() {
            return Err(ControlPlaneError::InvalidParameter("disk name is empty".into()));
        }
        if req.size_gb == 0 || req.count == 0 {
            return Err(ControlPlaneError::InvalidParameter(
                "disk size and count must be positive".into(),
            ));
        }
        let total = req
            .size_gb
            .checked_mul(req.count as u64)
            .ok_or_else(|| ControlPlaneError::InvalidParameter("disk request too large".into()))?;

        self.ensure_manages(&req.manager_id, ResourceKind::Disk)?;
        let inventory = self.inventory();
        if let Some(zone_id) = &req.zone_id {
            inventory.get_kind(zone_id, ResourceKind::Zone)?;
        }
        if let Some(storage_id) = &req.storage_id {
            inventory.get_kind(storage_id, ResourceKind::Storage)?;
        }

        let quota = &self.services().quota;
        quota
            .reserve_pending(&req.owner_project_id, ResourceKind::Disk, total)
            .await?;

        let mut records = Vec::with_capacity(req.count);
        for i in 0..req.count {
            let name = if req.count > 1 {
                format!("{}-{}", req.name, i + 1)
            } else {
                req.name.clone()
            };
            let mut record =
                ResourceRecord::new(ResourceKind::Disk, name, &req.owner_project_id, &req.manager_id)
                    .with_metadata("size_gb", serde_json::json!(req.size_gb));
            if let Some(zone_id) = &req.zone_id {
                record = record.with_parent(ResourceKind::Zone, zone_id);
            }
            if let Some(storage_id) = &req.storage_id {
                record = record.with_parent(ResourceKind::Storage, storage_id);
            }
            match inventory.insert_with_unique_name(record) {
                Ok(record) => records.push(record),
                Err(e) => {
                    self.rollback(&records, &req.owner_project_id, ResourceKind::Disk, total)
                        .await;
                    return Err(e);
                }
            }
        }

        let params = DiskBatchParams {
            owner_project_id: req.owner_project_id.clone(),
            size_gb: req.size_gb,
            zone_id: req.zone_id.clone(),
        };
        let usage = records.iter().fold(
            PendingUsage::new(&req.owner_project_id, ResourceKind::Disk),
            |usage, r| usage.with_amount(&r.local_id, req.size_gb),
        );

        let task = match self
            .start(TaskKind::DiskBatchCreate, &records, &req.manager_id, serde_json::to_value(&params)?, Some(usage))
            .await
        {
            Ok(task) => task,
            Err(e) => {
                self.rollback(&records, &req.owner_project_id, ResourceKind::Disk, total)
                    .await;
                return Err(e);
            }
        };
        Ok(Accepted { task, records })
    }

    pub async fn create_loadbalancer(&self, req: LoadbalancerCreateRequest) -> Result<Accepted> {
        if req.name.trim().is_empty() {
            return Err(ControlPlaneError::InvalidParameter(
                "loadbalancer name is empty".into(),
            ));
        }
        self.ensure_manages(&req.manager_id, ResourceKind::Loadbalancer)?;

        let inventory = self.inventory();
        let mut record = ResourceRecord::new(
            ResourceKind::Loadbalancer,
            &req.name,
            &req.owner_project_id,
            &req.manager_id,
        );
        if let Some(zone_id) = &req.zone_id {
            let zone = inventory.get_kind(zone_id, ResourceKind::Zone)?;
            record = record.with_parent(ResourceKind::Zone, zone.local_id);
        }
        if let Some(network_id) = &req.network_id {
            let network = inventory.get_kind(network_id, ResourceKind::Network)?;
            record.region_id = network.region_id.clone();
            record = record.with_parent(ResourceKind::Network, network.local_id);
        }
        if let Some(spec) = &req.spec {
            record = record.with_metadata("spec", serde_json::json!(spec));
        }

        let record = inventory.insert_with_unique_name(record)?;
        let records = vec![record];
        match self
            .start(TaskKind::LoadbalancerCreate, &records, &req.manager_id, serde_json::json!({}), None)
            .await
        {
            Ok(task) => Ok(Accepted { task, records }),
            Err(e) => {
                self.rollback(&records, &req.owner_project_id, ResourceKind::Loadbalancer, 0)
                    .await;
                Err(e)
            }
        }
    }

    /// Delete a loadbalancer with all its listeners, rules and backend groups
    pub async fn delete_loadbalancer(&self, id: &str) -> Result<Task> {
        let record = self.inventory().get_kind(id, ResourceKind::Loadbalancer)?;
        if record.status == ResourceStatus::Deleting {
            return Err(ControlPlaneError::Conflict(format!(
                "loadbalancer {} is already being deleted",
                record.name
            )));
        }
        self.start(
            TaskKind::LoadbalancerDelete,
            std::slice::from_ref(&record),
            &record.manager_id,
            serde_json::json!({}),
            None,
        )
        .await
    }

    /// Add a routing rule to an http/https listener
    pub async fn create_listener_rule(&self, req: ListenerRuleCreateRequest) -> Result<Accepted> {
        let inventory = self.inventory();
        let listener = inventory.get_kind(&req.listener_id, ResourceKind::Listener)?;
        if !listener.is_live() {
            return Err(ControlPlaneError::InvalidParameter(format!(
                "listener {} is being deleted",
                listener.name
            )));
        }
        let listener_type: Option<String> = listener.get_metadata("listener_type");
        if !matches!(listener_type.as_deref(), Some("http") | Some("https")) {
            return Err(ControlPlaneError::InvalidParameter(format!(
                "listener {} is {}, rules need an http or https listener",
                listener.name,
                listener_type.as_deref().unwrap_or("untyped")
            )));
        }

        let group = inventory.get_kind(&req.backend_group_id, ResourceKind::BackendGroup)?;
        let listener_lb = listener.parent(ResourceKind::Loadbalancer);
        let group_lb = group.parent(ResourceKind::Loadbalancer);
        if group_lb != listener_lb {
            return Err(ControlPlaneError::InvalidParameter(format!(
                "backend group {} belongs to loadbalancer {} instead of {}",
                group.name,
                group_lb.unwrap_or("-"),
                listener_lb.unwrap_or("-")
            )));
        }

        let domain = req.domain.trim().to_string();
        let path = match req.path.trim() {
            "" => default_path(),
            p => p.to_string(),
        };

        let record = {
            let _class = self
                .services()
                .locks
                .lock_class(ResourceKind::ListenerRule, &listener.owner_project_id)
                .await?;
            let duplicate = inventory
                .children(ResourceKind::ListenerRule, ResourceKind::Listener, &listener.local_id)
                .into_iter()
                .any(|r| {
                    r.is_live()
                        && r.get_metadata::<String>("domain").as_deref() == Some(domain.as_str())
                        && r.get_metadata::<String>("path").as_deref() == Some(path.as_str())
                });
            if duplicate {
                return Err(ControlPlaneError::Conflict(format!(
                    "listener {} already has a rule for {}{}",
                    listener.name, domain, path
                )));
            }

            let mut record = ResourceRecord::new(
                ResourceKind::ListenerRule,
                &req.name,
                &listener.owner_project_id,
                &listener.manager_id,
            )
            .with_parent(ResourceKind::Listener, &listener.local_id)
            .with_parent(ResourceKind::BackendGroup, &group.local_id)
            .with_metadata("domain", serde_json::json!(domain))
            .with_metadata("path", serde_json::json!(path));
            if let Some(lb) = listener_lb {
                record = record.with_parent(ResourceKind::Loadbalancer, lb);
            }
            record.region_id = listener.region_id.clone();
            inventory.insert_with_unique_name(record)?
        };

        let records = vec![record];
        match self
            .start(TaskKind::ListenerRuleCreate, &records, &listener.manager_id, serde_json::json!({}), None)
            .await
        {
            Ok(task) => Ok(Accepted { task, records }),
            Err(e) => {
                self.rollback(&records, &listener.owner_project_id, ResourceKind::ListenerRule, 0)
                    .await;
                Err(e)
            }
        }
    }

    fn ensure_manages(&self, manager_id: &str, kind: ResourceKind) -> Result<()> {
        let adapter = self.services().adapters.get(manager_id)?;
        if !adapter.supports(kind) {
            return Err(ControlPlaneError::InvalidParameter(format!(
                "{} ({}) cannot manage {}",
                manager_id,
                adapter.display_name(),
                kind
            )));
        }
        Ok(())
    }

    async fn start(
        &self,
        kind: TaskKind,
        records: &[ResourceRecord],
        manager_id: &str,
        params: serde_json::Value,
        usage: Option<PendingUsage>,
    ) -> Result<Task> {
        let targets = records.iter().map(|r| r.local_id.clone()).collect();
        let tasks = self.tasks();
        let task = tasks
            .new_task_with_usage(kind, targets, manager_id, params, None, usage)
            .await?;

        // From here on the task owns the records and the reservation.
        if let Err(e) = tasks.schedule_run(&task.id, None).await {
            tracing::error!("Could not start {} task {}: {}", kind, task.id, e);
            return tasks.set_stage_failed(&task.id, &e.to_string()).await;
        }
        Ok(task)
    }

    /// Undo a request that failed before its task took over
    async fn rollback(&self, records: &[ResourceRecord], owner: &str, kind: ResourceKind, reserved: u64) {
        for record in records {
            if let Err(e) = self.inventory().remove(&record.local_id) {
                tracing::warn!("Rollback could not remove {}: {}", record.local_id, e);
            }
        }
        if reserved > 0 {
            if let Err(e) = self.services().quota.cancel_pending(owner, kind, reserved).await {
                tracing::warn!("Rollback could not cancel {} {} for {}: {}", reserved, kind, owner, e);
            }
        }
    }
}
