//! Deadline-bounded polling for remote status transitions
//!
//! Remote creates and deletes are accepted quickly but settle later. Stage
//! handlers use [`wait_for_status`] to absorb that latency without ever
//! hanging: once the deadline passes the wait fails with
//! [`CloudError::Timeout`].

use crate::adapter::CloudAdapter;
use crate::error::{CloudError, Result};
use crate::resource::{ResourceKind, ResourceStatus};
use crate::snapshot::RemoteSnapshot;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// Polling configuration (exponential backoff with a hard deadline)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    /// First delay between two polls
    pub interval_ms: u64,

    /// Upper bound for the delay between two polls
    pub max_interval_ms: u64,

    /// Backoff multiplier
    pub multiplier: f64,

    /// Overall deadline
    pub deadline_secs: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            max_interval_ms: 10_000,
            multiplier: 2.0,
            deadline_secs: 300,
        }
    }
}

impl PollConfig {
    /// Delay before poll number `attempt + 1` (milliseconds)
    pub fn delay_for_attempt(&self, attempt: u32) -> u64 {
        let delay = self.interval_ms as f64 * self.multiplier.powi(attempt as i32);
        (delay as u64).min(self.max_interval_ms)
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }
}

/// Poll `adapter` until the object reaches one of `targets`.
///
/// Retryable errors are absorbed until the deadline; fatal errors and failed
/// remote statuses end the wait immediately.
pub async fn wait_for_status(
    adapter: &dyn CloudAdapter,
    kind: ResourceKind,
    global_id: &str,
    targets: &[ResourceStatus],
    config: &PollConfig,
) -> Result<RemoteSnapshot> {
    let deadline = Instant::now() + config.deadline();
    let mut attempt = 0u32;

    loop {
        match adapter.get(kind, global_id).await {
            Ok(snapshot) if targets.contains(&snapshot.status) => return Ok(snapshot),
            Ok(snapshot) if snapshot.status.is_failed() => {
                return Err(CloudError::ApiError(format!(
                    "{} {} entered status {}",
                    kind, global_id, snapshot.status
                )));
            }
            Ok(snapshot) => {
                tracing::debug!(
                    "{} {} is {}, waiting for {:?}",
                    kind,
                    global_id,
                    snapshot.status,
                    targets
                );
            }
            Err(e) if e.is_retryable() => {
                tracing::debug!("Transient error while polling {} {}: {}", kind, global_id, e);
            }
            Err(e) => return Err(e),
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(CloudError::Timeout(format!(
                "{} {} did not reach {:?} within {}s",
                kind, global_id, targets, config.deadline_secs
            )));
        }
        // The last sleep ends at the deadline, followed by one final poll.
        let delay = Duration::from_millis(config.delay_for_attempt(attempt)).min(deadline - now);
        sleep(delay).await;
        attempt = attempt.saturating_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryAdapter;
    use crate::snapshot::RemoteSnapshot;
    use std::sync::Arc;

    #[test]
    fn test_delay_calculation() {
        let config = PollConfig {
            interval_ms: 1000,
            max_interval_ms: 10000,
            multiplier: 2.0,
            deadline_secs: 60,
        };

        assert_eq!(config.delay_for_attempt(0), 1000);
        assert_eq!(config.delay_for_attempt(1), 2000);
        assert_eq!(config.delay_for_attempt(3), 8000);
        assert_eq!(config.delay_for_attempt(4), 10000); // capped at max
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_returns_when_target_reached() {
        let adapter = MemoryAdapter::new();
        adapter.insert(RemoteSnapshot::new(ResourceKind::Disk, "d-1", "data"));

        let snapshot = wait_for_status(
            &adapter,
            ResourceKind::Disk,
            "d-1",
            &[ResourceStatus::Ready],
            &PollConfig::default(),
        )
        .await
        .unwrap();
        assert_eq!(snapshot.global_id, "d-1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out() {
        let adapter = MemoryAdapter::new();
        adapter.insert(
            RemoteSnapshot::new(ResourceKind::Disk, "d-1", "data")
                .with_status(ResourceStatus::Creating),
        );

        let config = PollConfig {
            deadline_secs: 5,
            ..Default::default()
        };
        let err = wait_for_status(
            &adapter,
            ResourceKind::Disk,
            "d-1",
            &[ResourceStatus::Ready],
            &config,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CloudError::Timeout(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_fails_fast_on_missing_object() {
        let adapter = MemoryAdapter::new();
        let err = wait_for_status(
            &adapter,
            ResourceKind::Disk,
            "missing",
            &[ResourceStatus::Ready],
            &PollConfig::default(),
        )
        .await
        .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_polls_once_more_at_deadline() {
        let adapter = Arc::new(MemoryAdapter::new());
        adapter.insert(
            RemoteSnapshot::new(ResourceKind::Disk, "d-1", "data")
                .with_status(ResourceStatus::Creating),
        );
        let config = PollConfig {
            interval_ms: 3000,
            max_interval_ms: 3000,
            multiplier: 1.0,
            deadline_secs: 5,
        };

        // Ready between the second poll (3s) and the deadline (5s)
        let settle = {
            let adapter = adapter.clone();
            tokio::spawn(async move {
                sleep(Duration::from_millis(4500)).await;
                adapter.set_status(ResourceKind::Disk, "d-1", ResourceStatus::Ready);
            })
        };

        let started = Instant::now();
        let snapshot = wait_for_status(
            adapter.as_ref(),
            ResourceKind::Disk,
            "d-1",
            &[ResourceStatus::Ready],
            &config,
        )
        .await
        .unwrap();
        assert_eq!(snapshot.status, ResourceStatus::Ready);
        assert_eq!(started.elapsed(), Duration::from_secs(5));
        settle.await.unwrap();
    }
}
