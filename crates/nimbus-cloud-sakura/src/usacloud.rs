//! usacloud CLI wrapper
//!
//! Wraps the usacloud CLI commands for Sakura Cloud operations.

use crate::error::{Result, SakuraError};
use serde::{Deserialize, Deserializer, Serialize};
use std::process::Stdio;
use tokio::process::Command;

/// usacloud CLI wrapper
pub struct Usacloud {
    zone: String,
}

impl Usacloud {
    pub fn new(zone: impl Into<String>) -> Self {
        Self { zone: zone.into() }
    }

    pub fn zone(&self) -> &str {
        &self.zone
    }

    /// Check if usacloud is installed and authenticated
    pub async fn check_auth(&self) -> Result<UsacloudAuth> {
        let which = Command::new("which").arg("usacloud").output().await?;

        if !which.status.success() {
            return Err(SakuraError::UsacloudNotFound);
        }

        let output = self
            .run_command(&["auth-status", "--output-type", "json"])
            .await
            .map_err(|e| SakuraError::AuthenticationFailed(e.to_string()))?;

        let auth: UsacloudAuth = serde_json::from_str(&output)?;
        Ok(auth)
    }

    /// Run a usacloud command and return stdout
    async fn run_command(&self, args: &[&str]) -> Result<String> {
        let mut cmd = Command::new("usacloud");
        cmd.arg("--zone").arg(&self.zone);
        cmd.args(args);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        tracing::debug!("Running: usacloud --zone {} {}", self.zone, args.join(" "));

        let output = cmd.output().await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SakuraError::CommandFailed(stderr.to_string()));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    async fn list<T: serde::de::DeserializeOwned>(&self, resource: &str) -> Result<Vec<T>> {
        let output = self
            .run_command(&[resource, "list", "--output-type", "json"])
            .await?;
        parse_list(&output)
    }

    /// List all zones visible to the account
    pub async fn list_zones(&self) -> Result<Vec<ZoneInfo>> {
        self.list("zone").await
    }

    /// List all servers
    pub async fn list_servers(&self) -> Result<Vec<ServerInfo>> {
        self.list("server").await
    }

    /// Get server by ID
    pub async fn read_server(&self, id: &str) -> Result<ServerInfo> {
        let output = self
            .run_command(&["server", "read", id, "--output-type", "json"])
            .await
            .map_err(|e| not_found_or(e, || SakuraError::ServerNotFound(id.to_string())))?;
        first_of(&output).ok_or_else(|| SakuraError::ServerNotFound(id.to_string()))
    }

    /// Create a server
    pub async fn create_server(&self, config: &CreateServerConfig) -> Result<ServerInfo> {
        let core_str = config.core.to_string();
        let memory_str = config.memory.to_string();
        let disk_size_str = config.disk_size.map(|d| d.to_string());

        let mut args = vec![
            "server",
            "create",
            "--name",
            config.name.as_str(),
            "--core",
            core_str.as_str(),
            "--memory",
            memory_str.as_str(),
            "--output-type",
            "json",
            "--yes",
        ];

        if let Some(ref disk_size) = disk_size_str {
            args.push("--disk-size");
            args.push(disk_size.as_str());
        }

        if let Some(ref os) = config.os_type {
            args.push("--os-type");
            args.push(os.as_str());
        }

        let output = self.run_command(&args).await?;
        first_of(&output).ok_or_else(|| {
            SakuraError::CommandFailed(format!("server create returned no server: {}", output))
        })
    }

    /// Delete a server together with its disks
    pub async fn delete_server(&self, id: &str) -> Result<()> {
        self.run_command(&["server", "delete", id, "--with-disks", "--yes"])
            .await
            .map_err(|e| not_found_or(e, || SakuraError::ServerNotFound(id.to_string())))?;
        Ok(())
    }

    /// List all disks
    pub async fn list_disks(&self) -> Result<Vec<DiskInfo>> {
        self.list("disk").await
    }

    /// Get disk by ID
    pub async fn read_disk(&self, id: &str) -> Result<DiskInfo> {
        let output = self
            .run_command(&["disk", "read", id, "--output-type", "json"])
            .await
            .map_err(|e| not_found_or(e, || SakuraError::DiskNotFound(id.to_string())))?;
        first_of(&output).ok_or_else(|| SakuraError::DiskNotFound(id.to_string()))
    }

    /// Create a blank disk
    pub async fn create_disk(&self, name: &str, size_gb: u32) -> Result<DiskInfo> {
        let size_str = size_gb.to_string();
        let output = self
            .run_command(&[
                "disk",
                "create",
                "--name",
                name,
                "--size",
                size_str.as_str(),
                "--output-type",
                "json",
                "--yes",
            ])
            .await?;
        first_of(&output).ok_or_else(|| {
            SakuraError::CommandFailed(format!("disk create returned no disk: {}", output))
        })
    }

    pub async fn delete_disk(&self, id: &str) -> Result<()> {
        self.run_command(&["disk", "delete", id, "--yes"])
            .await
            .map_err(|e| not_found_or(e, || SakuraError::DiskNotFound(id.to_string())))?;
        Ok(())
    }
}

fn not_found_or(err: SakuraError, not_found: impl FnOnce() -> SakuraError) -> SakuraError {
    match &err {
        SakuraError::CommandFailed(msg) if msg.contains("404") || msg.contains("not found") => {
            not_found()
        }
        _ => err,
    }
}

/// Parse a usacloud JSON list, treating empty output as an empty list
fn parse_list<T: serde::de::DeserializeOwned>(output: &str) -> Result<Vec<T>> {
    let trimmed = output.trim();
    if trimmed.is_empty() || trimmed == "[]" {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_str(trimmed)?)
}

/// usacloud prints single objects as one-element arrays for read/create
fn first_of<T: serde::de::DeserializeOwned>(output: &str) -> Option<T> {
    let trimmed = output.trim();
    if let Ok(list) = serde_json::from_str::<Vec<T>>(trimmed) {
        return list.into_iter().next();
    }
    serde_json::from_str(trimmed).ok()
}

/// Sakura IDs are numbers in some outputs and strings in others
fn de_id<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    match value {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("invalid ID: {}", other))),
    }
}

/// Authentication status from usacloud
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsacloudAuth {
    #[serde(rename = "Account")]
    pub account: Option<AccountInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountInfo {
    #[serde(rename = "ID", deserialize_with = "de_id")]
    pub id: String,
    #[serde(rename = "Name")]
    pub name: String,
}

/// Zone information from usacloud
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneInfo {
    #[serde(rename = "ID", deserialize_with = "de_id")]
    pub id: String,

    #[serde(rename = "Name")]
    pub name: String,

    #[serde(rename = "Description", default)]
    pub description: Option<String>,
}

/// Server information from usacloud
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    #[serde(rename = "ID", deserialize_with = "de_id")]
    pub id: String,

    #[serde(rename = "Name")]
    pub name: String,

    #[serde(rename = "CPU")]
    pub cpu: Option<i32>,

    #[serde(rename = "MemoryMB")]
    pub memory_mb: Option<i32>,

    #[serde(rename = "InstanceStatus")]
    pub instance_status: Option<String>,

    #[serde(rename = "Availability")]
    pub availability: Option<String>,

    #[serde(rename = "Interfaces")]
    pub interfaces: Option<Vec<InterfaceInfo>>,
}

impl ServerInfo {
    /// Get the first IP address
    pub fn ip_address(&self) -> Option<String> {
        self.interfaces
            .as_ref()?
            .iter()
            .find_map(|i| i.ip_address.clone())
    }

    /// Check if server is running
    pub fn is_running(&self) -> bool {
        self.instance_status.as_deref() == Some("up")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceInfo {
    #[serde(rename = "IPAddress")]
    pub ip_address: Option<String>,
}

/// Disk information from usacloud
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskInfo {
    #[serde(rename = "ID", deserialize_with = "de_id")]
    pub id: String,

    #[serde(rename = "Name")]
    pub name: String,

    #[serde(rename = "SizeMB")]
    pub size_mb: Option<u64>,

    #[serde(rename = "Availability")]
    pub availability: Option<String>,

    #[serde(rename = "ServerID", default)]
    pub server_id: Option<serde_json::Value>,
}

/// Configuration for creating a server
#[derive(Debug, Clone)]
pub struct CreateServerConfig {
    pub name: String,
    pub core: i32,
    pub memory: i32,
    pub disk_size: Option<i32>,
    pub os_type: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_info_ip() {
        let server = ServerInfo {
            id: "123".to_string(),
            name: "test".to_string(),
            cpu: Some(4),
            memory_mb: Some(4096),
            instance_status: Some("up".to_string()),
            availability: Some("available".to_string()),
            interfaces: Some(vec![InterfaceInfo {
                ip_address: Some("192.168.1.1".to_string()),
            }]),
        };

        assert_eq!(server.ip_address(), Some("192.168.1.1".to_string()));
        assert!(server.is_running());
    }

    #[test]
    fn test_parse_numeric_and_string_ids() {
        let disks: Vec<DiskInfo> = parse_list(
            r#"[{"ID": 113600000001, "Name": "data", "SizeMB": 20480, "Availability": "available"},
                {"ID": "113600000002", "Name": "logs"}]"#,
        )
        .unwrap();
        assert_eq!(disks[0].id, "113600000001");
        assert_eq!(disks[1].id, "113600000002");
    }

    #[test]
    fn test_empty_list_output() {
        let zones: Vec<ZoneInfo> = parse_list("  \n").unwrap();
        assert!(zones.is_empty());
    }

    #[test]
    fn test_first_of_accepts_array_or_object() {
        let zone: ZoneInfo = first_of(r#"[{"ID": 31001, "Name": "is1a"}]"#).unwrap();
        assert_eq!(zone.name, "is1a");
        let zone: ZoneInfo = first_of(r#"{"ID": 29001, "Name": "tk1a"}"#).unwrap();
        assert_eq!(zone.id, "29001");
    }
}
