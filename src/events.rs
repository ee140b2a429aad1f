//! Push notifications for task logs and progress

use crate::task::{LogEntry, TaskStatus};
use serde::Serialize;
use tokio::sync::broadcast;

pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Event published while a sync task runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SyncEvent {
    /// Emitted once per appended log line
    Log { task_id: String, log: LogEntry },
    /// Emitted once per processed image and on every terminal transition
    Progress {
        task_id: String,
        progress: usize,
        total: usize,
        current_image: String,
        status: TaskStatus,
    },
}

impl SyncEvent {
    pub fn task_id(&self) -> &str {
        match self {
            SyncEvent::Log { task_id, .. } | SyncEvent::Progress { task_id, .. } => task_id,
        }
    }
}

/// Broadcast-based fan-out of [`SyncEvent`]s
///
/// Delivery is best effort. A subscriber that falls behind receives
/// `RecvError::Lagged` and should fall back to a ledger snapshot.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event. Without subscribers the event is dropped silently.
    pub fn publish(&self, event: SyncEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::LogLevel;

    fn progress(task_id: &str, progress: usize) -> SyncEvent {
        SyncEvent::Progress {
            task_id: task_id.into(),
            progress,
            total: 5,
            current_image: "nginx:1.25".into(),
            status: TaskStatus::Running,
        }
    }

    #[tokio::test]
    async fn publish_and_receive() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        bus.publish(progress("sync_a", 1));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.task_id(), "sync_a");
        assert_eq!(event, progress("sync_a", 1));
    }

    #[tokio::test]
    async fn no_subscribers_does_not_panic() {
        let bus = EventBus::default();
        bus.publish(progress("sync_a", 1));
    }

    #[tokio::test]
    async fn lagged_subscriber() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();
        for i in 0..5 {
            bus.publish(progress("sync_a", i));
        }
        match rx.recv().await {
            Err(broadcast::error::RecvError::Lagged(_)) => {}
            other => panic!("Expected Lagged, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn multiple_subscribers_receive_same_event() {
        let bus = EventBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        let event = SyncEvent::Log {
            task_id: "sync_b".into(),
            log: LogEntry::new(LogLevel::Warning, "retrying"),
        };
        bus.publish(event.clone());
        assert_eq!(rx1.recv().await.unwrap(), event);
        assert_eq!(rx2.recv().await.unwrap(), event);
    }

    #[test]
    fn event_serializes_with_tag() {
        let json = serde_json::to_value(progress("sync_c", 2)).unwrap();
        assert_eq!(json["event"], "progress");
        assert_eq!(json["status"], "running");
        assert_eq!(json["current_image"], "nginx:1.25");
    }
}
