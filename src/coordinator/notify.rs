//! Change notifications for runs
//!
//! Every visible mutation of a run is broadcast to all current subscribers.
//! Slow subscribers may lag and miss notifications; publishing never waits.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

use crate::models::{Run, RunTestFile, Test, TestSuite};

const CHANNEL_CAPACITY: usize = 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Added,
    Updated,
    Removed,
}

/// The record whose mutation triggered a notification
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Change {
    Run,
    File(RunTestFile),
    Suite(TestSuite),
    Test { suite_id: String, test: Test },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunNotification {
    pub kind: NotificationKind,
    /// State of the run right after the change
    pub run: Run,
    pub change: Change,
}

/// Fan-out hub for run notifications
#[derive(Clone)]
pub struct Notifier {
    tx: broadcast::Sender<RunNotification>,
}

impl Notifier {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunNotification> {
        self.tx.subscribe()
    }

    pub fn publish(&self, kind: NotificationKind, run: Run, change: Change) {
        if self.tx.send(RunNotification { kind, run, change }).is_err() {
            trace!("No subscribers for run notification");
        }
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Status;
    use chrono::Utc;

    fn run() -> Run {
        Run {
            id: "r1".to_string(),
            title: "calm-river".to_string(),
            emoji: "🚀".to_string(),
            progress: 0.0,
            status: Status::InProgress,
            duration: None,
            created_at: Utc::now(),
            run_test_files: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_fan_out() {
        let notifier = Notifier::new();
        let mut a = notifier.subscribe();
        let mut b = notifier.subscribe();

        notifier.publish(NotificationKind::Added, run(), Change::Run);

        assert_eq!(a.recv().await.unwrap().kind, NotificationKind::Added);
        assert_eq!(b.recv().await.unwrap().run.id, "r1");
    }

    #[test]
    fn test_subscriber_waits_for_publish() {
        let notifier = Notifier::new();
        let mut rx = notifier.subscribe();
        let mut recv = tokio_test::task::spawn(rx.recv());

        tokio_test::assert_pending!(recv.poll());
        notifier.publish(NotificationKind::Updated, run(), Change::Run);
        assert!(recv.is_woken());
        let notification = tokio_test::assert_ready_ok!(recv.poll());
        assert_eq!(notification.kind, NotificationKind::Updated);
    }

    #[test]
    fn test_subscribers_see_close() {
        let notifier = Notifier::new();
        let mut rx = notifier.subscribe();
        drop(notifier);
        let mut recv = tokio_test::task::spawn(rx.recv());
        tokio_test::assert_ready_err!(recv.poll());
    }

    #[test]
    fn test_publish_without_subscribers() {
        Notifier::new().publish(NotificationKind::Removed, run(), Change::Run);
    }

    #[test]
    fn test_change_serialization() {
        let json = serde_json::to_value(Change::Run).unwrap();
        assert_eq!(json["type"], "run");
    }
}
