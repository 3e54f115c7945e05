//! Failure notifications
//!
//! Delivery is fire-and-forget: a notifier must never block or fail the
//! operation that raised the notification.

use nimbus_cloud::{ResourceKind, ResourceStatus};
use serde::Serialize;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub resource_id: String,
    pub resource_kind: ResourceKind,
    pub resource_name: String,
    pub status: ResourceStatus,
    pub reason: String,
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Writes notifications to the log
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, n: Notification) {
        tracing::warn!(
            target: "notify",
            "{} {} ({}) is {}: {}",
            n.resource_kind,
            n.resource_name,
            n.resource_id,
            n.status,
            n.reason
        );
    }
}

/// Forwards notifications to a channel
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<Notification>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, notification: Notification) {
        if self.tx.send(notification).is_err() {
            tracing::debug!("Notification receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_notifier_delivers() {
        let (notifier, mut rx) = ChannelNotifier::new();
        notifier.notify(Notification {
            resource_id: "d-1".into(),
            resource_kind: ResourceKind::Disk,
            resource_name: "data".into(),
            status: ResourceStatus::ScheduleFailed,
            reason: "No matching resources".into(),
        });
        let received = rx.try_recv().unwrap();
        assert_eq!(received.status, ResourceStatus::ScheduleFailed);
    }

    #[test]
    fn test_dropped_receiver_is_ignored() {
        let (notifier, rx) = ChannelNotifier::new();
        drop(rx);
        notifier.notify(Notification {
            resource_id: "d-1".into(),
            resource_kind: ResourceKind::Disk,
            resource_name: "data".into(),
            status: ResourceStatus::CreateFailed,
            reason: "boom".into(),
        });
    }
}
