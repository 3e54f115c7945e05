//! Per-pass counters

use serde::Serialize;
use std::fmt;

/// Outcome of one sync pass.
///
/// Every candidate lands in exactly one counter:
/// `added + add_errors` covers the remote-only set,
/// `updated + unchanged + update_errors` the matched set, and
/// `deleted + deferred + delete_errors` the local-only set.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncResult {
    pub added: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Hard-deleted, or marked unknown because dependents block deletion
    pub deleted: usize,
    /// Already marked unknown: not yet due, or retried and still blocked
    pub deferred: usize,
    pub add_errors: usize,
    pub update_errors: usize,
    pub delete_errors: usize,
    pub errors: Vec<String>,
    pub candidates: SyncCandidates,
}

/// Partition sizes the counters must add up to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncCandidates {
    pub added: usize,
    pub common: usize,
    pub removed: usize,
}

impl SyncResult {
    pub fn new(candidates: SyncCandidates) -> Self {
        Self {
            candidates,
            ..Default::default()
        }
    }

    pub fn add_error(&mut self, message: impl Into<String>) {
        self.add_errors += 1;
        self.errors.push(message.into());
    }

    pub fn update_error(&mut self, message: impl Into<String>) {
        self.update_errors += 1;
        self.errors.push(message.into());
    }

    pub fn delete_error(&mut self, message: impl Into<String>) {
        self.delete_errors += 1;
        self.errors.push(message.into());
    }

    pub fn is_error(&self) -> bool {
        self.total_errors() > 0
    }

    pub fn total_errors(&self) -> usize {
        self.add_errors + self.update_errors + self.delete_errors
    }

    pub fn has_changes(&self) -> bool {
        self.added + self.updated + self.deleted > 0
    }

    /// Whether every candidate was counted exactly once
    pub fn is_balanced(&self) -> bool {
        self.added + self.add_errors == self.candidates.added
            && self.updated + self.unchanged + self.update_errors == self.candidates.common
            && self.deleted + self.deferred + self.delete_errors == self.candidates.removed
    }

    pub fn merge(&mut self, other: SyncResult) {
        self.added += other.added;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
        self.deleted += other.deleted;
        self.deferred += other.deferred;
        self.add_errors += other.add_errors;
        self.update_errors += other.update_errors;
        self.delete_errors += other.delete_errors;
        self.errors.extend(other.errors);
        self.candidates.added += other.candidates.added;
        self.candidates.common += other.candidates.common;
        self.candidates.removed += other.candidates.removed;
    }
}

impl fmt::Display for SyncResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} added, {} updated, {} unchanged, {} deleted, {} deferred",
            self.added, self.updated, self.unchanged, self.deleted, self.deferred
        )?;
        if self.is_error() {
            write!(
                f,
                " ({} add / {} update / {} delete errors)",
                self.add_errors, self.update_errors, self.delete_errors
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_balance_and_display() {
        let mut result = SyncResult::new(SyncCandidates {
            added: 1,
            common: 2,
            removed: 1,
        });
        result.added = 1;
        result.updated = 1;
        result.update_error("lb-2: conflict");
        assert!(!result.is_balanced());

        result.deferred = 1;
        assert!(result.is_balanced());
        assert!(result.is_error());
        assert_eq!(
            result.to_string(),
            "1 added, 1 updated, 0 unchanged, 0 deleted, 1 deferred (0 add / 1 update / 0 delete errors)"
        );
    }
}
