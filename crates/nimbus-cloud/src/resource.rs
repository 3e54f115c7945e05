//! Resource kinds and normalised statuses shared by every provider

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of cloud object tracked in the inventory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Zone,
    Host,
    Storage,
    Network,
    Disk,
    Server,
    Loadbalancer,
    Listener,
    ListenerRule,
    BackendGroup,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 10] = [
        ResourceKind::Zone,
        ResourceKind::Host,
        ResourceKind::Storage,
        ResourceKind::Network,
        ResourceKind::Disk,
        ResourceKind::Server,
        ResourceKind::Loadbalancer,
        ResourceKind::Listener,
        ResourceKind::ListenerRule,
        ResourceKind::BackendGroup,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Zone => "zone",
            ResourceKind::Host => "host",
            ResourceKind::Storage => "storage",
            ResourceKind::Network => "network",
            ResourceKind::Disk => "disk",
            ResourceKind::Server => "server",
            ResourceKind::Loadbalancer => "loadbalancer",
            ResourceKind::Listener => "listener",
            ResourceKind::ListenerRule => "listener_rule",
            ResourceKind::BackendGroup => "backend_group",
        }
    }

    /// Kinds whose live records block hard deletion of a record of this kind.
    pub fn dependent_kinds(&self) -> &'static [ResourceKind] {
        match self {
            ResourceKind::Zone => &[
                ResourceKind::Host,
                ResourceKind::Storage,
                ResourceKind::Network,
            ],
            ResourceKind::Storage => &[ResourceKind::Disk],
            ResourceKind::Host => &[ResourceKind::Server],
            ResourceKind::Loadbalancer => &[ResourceKind::Listener, ResourceKind::BackendGroup],
            ResourceKind::Listener => &[ResourceKind::ListenerRule],
            ResourceKind::Network
            | ResourceKind::Disk
            | ResourceKind::Server
            | ResourceKind::ListenerRule
            | ResourceKind::BackendGroup => &[],
        }
    }

    /// Whether a sync pass copies the remote name over the local one.
    ///
    /// Only zones follow the provider's naming; everything else keeps the
    /// collision-free name picked when the record was first imported.
    pub fn syncs_name(&self) -> bool {
        matches!(self, ResourceKind::Zone)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        ResourceKind::ALL
            .iter()
            .find(|k| k.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown resource kind: {}", s))
    }
}

/// Lifecycle status of a resource, shared by local records and remote snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    /// Requested locally, nothing has happened remotely yet
    Pending,
    /// Waiting for a placement decision
    Scheduling,
    /// No placement candidate was found
    ScheduleFailed,
    /// Remote creation in progress
    Creating,
    CreateFailed,
    /// Remote object exists and is usable
    Ready,
    /// Remote object exists but is stopped/disabled
    Stopped,
    /// Remote deletion in progress
    Deleting,
    DeleteFailed,
    /// Remote truth is gone or unreadable
    Unknown,
}

impl ResourceStatus {
    pub fn is_failed(&self) -> bool {
        matches!(
            self,
            ResourceStatus::ScheduleFailed
                | ResourceStatus::CreateFailed
                | ResourceStatus::DeleteFailed
        )
    }

    pub fn is_in_progress(&self) -> bool {
        matches!(
            self,
            ResourceStatus::Pending
                | ResourceStatus::Scheduling
                | ResourceStatus::Creating
                | ResourceStatus::Deleting
        )
    }
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceStatus::Pending => write!(f, "pending"),
            ResourceStatus::Scheduling => write!(f, "scheduling"),
            ResourceStatus::ScheduleFailed => write!(f, "schedule_failed"),
            ResourceStatus::Creating => write!(f, "creating"),
            ResourceStatus::CreateFailed => write!(f, "create_failed"),
            ResourceStatus::Ready => write!(f, "ready"),
            ResourceStatus::Stopped => write!(f, "stopped"),
            ResourceStatus::Deleting => write!(f, "deleting"),
            ResourceStatus::DeleteFailed => write!(f, "delete_failed"),
            ResourceStatus::Unknown => write!(f, "unknown"),
        }
    }
}
