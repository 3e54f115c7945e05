//! Asynchronous task engine and its workflows

mod create;
mod disk;
mod engine;
mod loadbalancer;
mod model;
mod schedule;
mod store;

pub use disk::DiskBatchParams;
pub use engine::{RESTART_REASON, TaskEngine, TaskRegistry};
pub use model::{
    BatchCreateStage, CreateStage, DeleteStage, Stage, Task, TaskKind, TaskState, Transition,
};
pub use schedule::NO_MATCH_REASON;
pub use store::TaskStore;
