//! Nimbus Cloud Adapters
//!
//! This crate defines the capability contract every cloud back end
//! implements, so the control plane can reconcile and drive resources across
//! heterogeneous providers through a single shape.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │               nimbus-controlplane                │
//! │        (reconciler / task engine)                │
//! └─────────────────┬───────────────────────────────┘
//!                   │ Arc<dyn CloudAdapter>
//! ┌─────────────────▼───────────────────────────────┐
//! │                 nimbus-cloud                     │
//! │  trait CloudAdapter { list / get / create / … }  │
//! │  RemoteSnapshot · ResourceKind · wait_for_status │
//! └───────┬─────────────────┬───────────────────────┘
//!         │                 │
//! ┌───────▼───────┐ ┌───────▼───────┐
//! │ sakura-cloud  │ │    memory     │
//! │   adapter     │ │   adapter     │
//! └───────────────┘ └───────────────┘
//! ```

pub mod adapter;
pub mod error;
pub mod memory;
pub mod resource;
pub mod snapshot;
pub mod wait;

// Re-exports
pub use adapter::{AuthStatus, CloudAdapter};
pub use error::{CloudError, Result};
pub use memory::{MemoryAdapter, MemoryOp};
pub use resource::{ResourceKind, ResourceStatus};
pub use snapshot::{CreateSpec, RemoteSnapshot};
pub use wait::{PollConfig, wait_for_status};
