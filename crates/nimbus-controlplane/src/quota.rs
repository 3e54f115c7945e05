//! Pending-usage quota ledger
//!
//! Requests reserve pending usage up front; the task that owns the
//! reservation cancels it per object once the object is either placed or has
//! definitively failed. Release bookkeeping lives on the task
//! ([`PendingUsage`]) so that each object is released at most once.

use crate::error::{ControlPlaneError, Result};
use async_trait::async_trait;
use nimbus_cloud::ResourceKind;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, PoisonError};

#[async_trait]
pub trait QuotaLedger: Send + Sync {
    /// Reserve `amount` for `owner`; fails with `InvalidParameter` past the limit
    async fn reserve_pending(&self, owner: &str, kind: ResourceKind, amount: u64) -> Result<()>;

    async fn cancel_pending(&self, owner: &str, kind: ResourceKind, amount: u64) -> Result<()>;
}

/// Reservation still held by a task, per target object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingUsage {
    pub owner_project_id: String,
    pub kind: ResourceKind,
    pub amounts: BTreeMap<String, u64>,
}

impl PendingUsage {
    pub fn new(owner_project_id: impl Into<String>, kind: ResourceKind) -> Self {
        Self {
            owner_project_id: owner_project_id.into(),
            kind,
            amounts: BTreeMap::new(),
        }
    }

    pub fn with_amount(mut self, object_id: impl Into<String>, amount: u64) -> Self {
        self.amounts.insert(object_id.into(), amount);
        self
    }

    pub fn total(&self) -> u64 {
        self.amounts.values().sum()
    }
}

type LedgerKey = (String, ResourceKind);

/// Ledger kept in process memory
#[derive(Default)]
pub struct MemoryQuotaLedger {
    limits: HashMap<LedgerKey, u64>,
    pending: Mutex<HashMap<LedgerKey, u64>>,
}

impl MemoryQuotaLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap pending usage of `kind` for `owner`; unlimited when unset
    pub fn with_limit(mut self, owner: impl Into<String>, kind: ResourceKind, limit: u64) -> Self {
        self.limits.insert((owner.into(), kind), limit);
        self
    }

    pub fn pending(&self, owner: &str, kind: ResourceKind) -> u64 {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(owner.to_string(), kind))
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl QuotaLedger for MemoryQuotaLedger {
    async fn reserve_pending(&self, owner: &str, kind: ResourceKind, amount: u64) -> Result<()> {
        let key = (owner.to_string(), kind);
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let current = pending.get(&key).copied().unwrap_or(0);
        let requested = current.saturating_add(amount);

        if let Some(limit) = self.limits.get(&key) {
            if requested > *limit {
                return Err(ControlPlaneError::InvalidParameter(format!(
                    "{} quota exceeded for {}: {} requested, {} pending, limit {}",
                    kind, owner, amount, current, limit
                )));
            }
        }
        pending.insert(key, requested);
        tracing::debug!("Reserved {} {} for {} (pending {})", amount, kind, owner, requested);
        Ok(())
    }

    async fn cancel_pending(&self, owner: &str, kind: ResourceKind, amount: u64) -> Result<()> {
        let key = (owner.to_string(), kind);
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let current = pending.get(&key).copied().unwrap_or(0);
        if amount > current {
            tracing::warn!(
                "Cancelling {} {} for {} but only {} is pending",
                amount,
                kind,
                owner,
                current
            );
        }
        pending.insert(key, current.saturating_sub(amount));
        Ok(())
    }
}
