//! Sakura Cloud adapter for Nimbus
//!
//! This crate implements the CloudAdapter trait for Sakura Cloud, so the
//! control plane can reconcile zones, servers and disks and drive disk/server
//! creation and deletion.
//!
//! # Requirements
//!
//! - `usacloud` CLI must be installed and configured
//! - Authentication is managed through usacloud configuration
//!
//! # Example
//!
//! ```ignore
//! use nimbus_cloud::{CloudAdapter, ResourceKind};
//! use nimbus_cloud_sakura::SakuraCloudAdapter;
//!
//! let adapter = SakuraCloudAdapter::new("tk1a");
//! let disks = adapter.list(ResourceKind::Disk).await?;
//! ```

pub mod adapter;
pub mod error;
pub mod usacloud;

pub use adapter::SakuraCloudAdapter;
pub use error::{Result, SakuraError};
pub use usacloud::{CreateServerConfig, DiskInfo, ServerInfo, Usacloud, ZoneInfo};
