//! Nimbus Control Plane
//!
//! Keeps a local inventory of cloud objects in step with the providers that
//! own them, and drives multi-stage remote work (placement, creation,
//! cascading deletion) as persisted asynchronous tasks.
//!
//! ```text
//!   request ──► ops ──► TaskEngine ──► stage handlers ──► CloudAdapter
//!                 │          │                │
//!                 ▼          ▼                ▼
//!             Inventory ◄── LockManager ──► Reconciler ◄── adapter.list
//! ```
//!
//! Every mutation of a record happens under its object lock; set-level work
//! (sync passes, duplicate checks, cascades) takes the class lock of
//! `(kind, owner)` first.

pub mod audit;
pub mod error;
pub mod inventory;
pub mod lock;
pub mod notify;
pub mod ops;
pub mod plane;
pub mod quota;
pub mod reconcile;
pub mod record;
pub mod registry;
pub mod scheduler;
pub mod services;
mod state_file;
pub mod task;

pub use audit::{AuditAction, AuditEvent, AuditLog};
pub use error::{ControlPlaneError, Result};
pub use inventory::Inventory;
pub use lock::{ClassLock, LockManager, ObjectLock};
pub use notify::{ChannelNotifier, LogNotifier, Notification, Notifier};
pub use ops::{Accepted, DiskCreateRequest, ListenerRuleCreateRequest, LoadbalancerCreateRequest};
pub use plane::{ControlPlane, ControlPlaneBuilder};
pub use quota::{MemoryQuotaLedger, PendingUsage, QuotaLedger};
pub use reconcile::{
    DeferredDeletePolicy, Reconciler, SYNC_DELETE_REASON, SyncResult, SyncScope,
};
pub use record::{DeleteState, RecordDiff, ResourceRecord};
pub use registry::AdapterRegistry;
pub use scheduler::{
    Candidate, HttpSchedulerClient, ScheduleInput, ScheduleResult, SchedulerClient,
    UnavailableScheduler,
};
pub use services::Services;
pub use task::{Task, TaskEngine, TaskKind, TaskRegistry, TaskState, TaskStore};
