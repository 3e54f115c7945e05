//! Keyed mutual exclusion for inventory writers
//!
//! Two lock families exist:
//!
//! - **class locks**, keyed by `(kind, owner project)`, serialize whole sync
//!   passes and cascades over a kind;
//! - **object locks**, keyed by a record's local id, serialize every write to
//!   that record.
//!
//! Acquisition order is always class before object, and a holder never takes
//! a class lock while holding an object lock. Locks are not reentrant.

use crate::error::{ControlPlaneError, Result};
use nimbus_cloud::ResourceKind;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Idle entries are pruned once a table grows past this size
const PRUNE_THRESHOLD: usize = 1024;

type Slot = Arc<AsyncMutex<()>>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ClassKey {
    kind: ResourceKind,
    owner: String,
}

/// Held class lock; released on drop
#[derive(Debug)]
pub struct ClassLock {
    pub kind: ResourceKind,
    pub owner: String,
    _guard: OwnedMutexGuard<()>,
}

/// Held object lock; released on drop
#[derive(Debug)]
pub struct ObjectLock {
    pub id: String,
    _guard: OwnedMutexGuard<()>,
}

pub struct LockManager {
    classes: Mutex<HashMap<ClassKey, Slot>>,
    objects: Mutex<HashMap<String, Slot>>,
    timeout: Duration,
}

impl LockManager {
    pub fn new(timeout: Duration) -> Self {
        Self {
            classes: Mutex::new(HashMap::new()),
            objects: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Lock every record of `kind` owned by `owner`
    pub async fn lock_class(&self, kind: ResourceKind, owner: &str) -> Result<ClassLock> {
        let key = ClassKey {
            kind,
            owner: owner.to_string(),
        };
        let slot = slot_for(&self.classes, key);
        let guard = self
            .acquire(slot, || format!("class lock {}/{}", kind, owner))
            .await?;
        Ok(ClassLock {
            kind,
            owner: owner.to_string(),
            _guard: guard,
        })
    }

    /// Lock a single record
    pub async fn lock_object(&self, id: &str) -> Result<ObjectLock> {
        let slot = slot_for(&self.objects, id.to_string());
        let guard = self
            .acquire(slot, || format!("object lock {}", id))
            .await?;
        Ok(ObjectLock {
            id: id.to_string(),
            _guard: guard,
        })
    }

    async fn acquire(
        &self,
        slot: Slot,
        describe: impl FnOnce() -> String,
    ) -> Result<OwnedMutexGuard<()>> {
        match tokio::time::timeout(self.timeout, slot.lock_owned()).await {
            Ok(guard) => Ok(guard),
            Err(_) => {
                let what = describe();
                tracing::warn!("Timed out after {:?} waiting for {}", self.timeout, what);
                Err(ControlPlaneError::Lock(format!(
                    "{} not acquired within {:?}",
                    what, self.timeout
                )))
            }
        }
    }
}

fn slot_for<K: Eq + std::hash::Hash>(table: &Mutex<HashMap<K, Slot>>, key: K) -> Slot {
    let mut table = table.lock().unwrap_or_else(PoisonError::into_inner);
    if table.len() > PRUNE_THRESHOLD {
        // Only the table references an idle slot: nobody holds or awaits it.
        table.retain(|_, slot| Arc::strong_count(slot) > 1);
    }
    table.entry(key).or_default().clone()
}
