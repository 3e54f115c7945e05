//! Sakura Cloud adapter implementation

use crate::error::SakuraError;
use crate::usacloud::{CreateServerConfig, DiskInfo, ServerInfo, Usacloud, ZoneInfo};
use async_trait::async_trait;
use nimbus_cloud::{
    AuthStatus, CloudAdapter, CreateSpec, RemoteSnapshot, ResourceKind, ResourceStatus,
};

const CAPABILITIES: [ResourceKind; 3] = [
    ResourceKind::Zone,
    ResourceKind::Server,
    ResourceKind::Disk,
];

/// Sakura Cloud adapter
pub struct SakuraCloudAdapter {
    usacloud: Usacloud,
}

impl SakuraCloudAdapter {
    pub fn new(zone: impl Into<String>) -> Self {
        Self {
            usacloud: Usacloud::new(zone),
        }
    }

    /// Zones are keyed by name (`tk1a`), the handle every other object uses
    /// to reference its zone; the numeric id is kept as an attribute
    fn zone_snapshot(zone: ZoneInfo) -> RemoteSnapshot {
        let mut snapshot = RemoteSnapshot::new(ResourceKind::Zone, &zone.name, &zone.name)
            .with_attribute("zone_id", serde_json::json!(zone.id));
        if let Some(description) = zone.description {
            snapshot = snapshot.with_attribute("description", serde_json::json!(description));
        }
        snapshot
    }

    fn server_snapshot(&self, server: ServerInfo) -> RemoteSnapshot {
        let status = match (
            server.availability.as_deref(),
            server.instance_status.as_deref(),
        ) {
            (Some("failed"), _) => ResourceStatus::CreateFailed,
            (Some("migrating") | Some("uploading"), _) => ResourceStatus::Creating,
            (_, Some("up")) => ResourceStatus::Ready,
            (_, Some("down")) => ResourceStatus::Stopped,
            (_, Some("cleaning")) => ResourceStatus::Deleting,
            _ => ResourceStatus::Unknown,
        };

        let mut snapshot = RemoteSnapshot::new(ResourceKind::Server, server.id.clone(), &server.name)
            .with_status(status)
            .with_parent(ResourceKind::Zone, self.usacloud.zone());
        if let Some(ip) = server.ip_address() {
            snapshot = snapshot.with_attribute("ip", serde_json::json!(ip));
        }
        if let Some(cpu) = server.cpu {
            snapshot = snapshot.with_attribute("cpu", serde_json::json!(cpu));
        }
        if let Some(memory) = server.memory_mb {
            snapshot = snapshot.with_attribute("memory_mb", serde_json::json!(memory));
        }
        snapshot
    }

    fn disk_snapshot(&self, disk: DiskInfo) -> RemoteSnapshot {
        let status = match disk.availability.as_deref() {
            Some("available") => ResourceStatus::Ready,
            Some("migrating") | Some("uploading") => ResourceStatus::Creating,
            Some("failed") => ResourceStatus::CreateFailed,
            _ => ResourceStatus::Unknown,
        };

        let mut snapshot = RemoteSnapshot::new(ResourceKind::Disk, disk.id, disk.name)
            .with_status(status)
            .with_parent(ResourceKind::Zone, self.usacloud.zone());
        if let Some(size_mb) = disk.size_mb {
            snapshot = snapshot.with_attribute("size_gb", serde_json::json!(size_mb / 1024));
        }
        if let Some(server_id) = disk.server_id.filter(|v| !v.is_null()) {
            snapshot = snapshot.with_attribute("server_id", server_id);
        }
        snapshot
    }

    fn unsupported(kind: ResourceKind) -> nimbus_cloud::CloudError {
        SakuraError::UnsupportedKind(kind.to_string()).into()
    }
}

#[async_trait]
impl CloudAdapter for SakuraCloudAdapter {
    fn name(&self) -> &str {
        "sakura-cloud"
    }

    fn display_name(&self) -> &str {
        "さくらのクラウド"
    }

    fn capabilities(&self) -> &[ResourceKind] {
        &CAPABILITIES
    }

    async fn check_auth(&self) -> nimbus_cloud::Result<AuthStatus> {
        match self.usacloud.check_auth().await {
            Ok(auth) => {
                let account_info = auth
                    .account
                    .map(|a| format!("{} ({})", a.name, a.id))
                    .unwrap_or_else(|| "Unknown".to_string());
                Ok(AuthStatus::ok(account_info))
            }
            Err(SakuraError::UsacloudNotFound) => {
                Ok(AuthStatus::failed("usacloud がインストールされていません"))
            }
            Err(e) => Ok(AuthStatus::failed(e.to_string())),
        }
    }

    async fn list(&self, kind: ResourceKind) -> nimbus_cloud::Result<Vec<RemoteSnapshot>> {
        let snapshots = match kind {
            ResourceKind::Zone => self
                .usacloud
                .list_zones()
                .await?
                .into_iter()
                .map(Self::zone_snapshot)
                .collect(),
            ResourceKind::Server => self
                .usacloud
                .list_servers()
                .await?
                .into_iter()
                .map(|s| self.server_snapshot(s))
                .collect(),
            ResourceKind::Disk => self
                .usacloud
                .list_disks()
                .await?
                .into_iter()
                .map(|d| self.disk_snapshot(d))
                .collect(),
            other => return Err(Self::unsupported(other)),
        };
        Ok(snapshots)
    }

    async fn get(&self, kind: ResourceKind, global_id: &str) -> nimbus_cloud::Result<RemoteSnapshot> {
        match kind {
            ResourceKind::Zone => self
                .usacloud
                .list_zones()
                .await?
                .into_iter()
                .find(|z| z.name == global_id)
                .map(Self::zone_snapshot)
                .ok_or_else(|| SakuraError::ZoneNotFound(global_id.to_string()).into()),
            ResourceKind::Server => Ok(self.server_snapshot(self.usacloud.read_server(global_id).await?)),
            ResourceKind::Disk => Ok(self.disk_snapshot(self.usacloud.read_disk(global_id).await?)),
            other => Err(Self::unsupported(other)),
        }
    }

    async fn create(
        &self,
        kind: ResourceKind,
        spec: &CreateSpec,
    ) -> nimbus_cloud::Result<RemoteSnapshot> {
        match kind {
            ResourceKind::Server => {
                tracing::info!("Creating server: {}", spec.name);
                let config = CreateServerConfig {
                    name: spec.name.clone(),
                    core: spec.get_config::<i32>("core").unwrap_or(1),
                    memory: spec.get_config::<i32>("memory").unwrap_or(1),
                    disk_size: spec.get_config::<i32>("disk_size"),
                    os_type: spec.get_config::<String>("os_type"),
                };
                let server = self.usacloud.create_server(&config).await?;
                Ok(self.server_snapshot(server))
            }
            ResourceKind::Disk => {
                tracing::info!("Creating disk: {}", spec.name);
                let size_gb = spec.get_config::<u32>("size_gb").unwrap_or(20);
                let disk = self.usacloud.create_disk(&spec.name, size_gb).await?;
                Ok(self.disk_snapshot(disk))
            }
            other => Err(Self::unsupported(other)),
        }
    }

    async fn delete(&self, kind: ResourceKind, global_id: &str) -> nimbus_cloud::Result<()> {
        match kind {
            ResourceKind::Server => {
                tracing::info!("Deleting server: {}", global_id);
                Ok(self.usacloud.delete_server(global_id).await?)
            }
            ResourceKind::Disk => {
                tracing::info!("Deleting disk: {}", global_id);
                Ok(self.usacloud.delete_disk(global_id).await?)
            }
            other => Err(Self::unsupported(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn disk(availability: &str) -> DiskInfo {
        DiskInfo {
            id: "113600000001".to_string(),
            name: "data".to_string(),
            size_mb: Some(40960),
            availability: Some(availability.to_string()),
            server_id: None,
        }
    }

    #[test]
    fn test_disk_snapshot_mapping() {
        let adapter = SakuraCloudAdapter::new("is1a");
        let snapshot = adapter.disk_snapshot(disk("available"));
        assert_eq!(snapshot.global_id, "113600000001");
        assert_eq!(snapshot.status, ResourceStatus::Ready);
        assert_eq!(snapshot.get_attribute::<u64>("size_gb"), Some(40));
        assert_eq!(
            snapshot.parents.get(&ResourceKind::Zone).map(String::as_str),
            Some("is1a")
        );

        let migrating = adapter.disk_snapshot(disk("migrating"));
        assert_eq!(migrating.status, ResourceStatus::Creating);
    }

    #[test]
    fn test_server_status_mapping() {
        let adapter = SakuraCloudAdapter::new("tk1a");
        let server = ServerInfo {
            id: "1".to_string(),
            name: "web-01".to_string(),
            cpu: Some(2),
            memory_mb: Some(4096),
            instance_status: Some("down".to_string()),
            availability: Some("available".to_string()),
            interfaces: None,
        };
        assert_eq!(adapter.server_snapshot(server).status, ResourceStatus::Stopped);
    }

    #[test]
    fn test_zone_keyed_by_name() {
        let snapshot = SakuraCloudAdapter::zone_snapshot(ZoneInfo {
            id: "21001".to_string(),
            name: "tk1a".to_string(),
            description: Some("東京第1ゾーン".to_string()),
        });
        assert_eq!(snapshot.global_id, "tk1a");
        assert_eq!(snapshot.get_attribute::<String>("zone_id").as_deref(), Some("21001"));
    }

    #[test]
    fn test_capabilities() {
        let adapter = SakuraCloudAdapter::new("tk1a");
        assert!(adapter.supports(ResourceKind::Disk));
        assert!(!adapter.supports(ResourceKind::Loadbalancer));
    }
}
