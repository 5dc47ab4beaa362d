//! Real-time execution events
//!
//! The engine emits status and log deltas; fanning them out to subscribers is
//! the publisher's business.

use conveyor_core::dto::execution::ExecutionEvent;
use tokio::sync::broadcast;

/// Sink for execution events
pub trait EventPublisher: Send + Sync {
    /// Publishes an event. Must not block.
    fn publish(&self, event: ExecutionEvent);
}

/// Publisher backed by a tokio broadcast channel
///
/// Slow subscribers lag and miss events rather than slowing executions down.
#[derive(Clone)]
pub struct BroadcastPublisher {
    sender: broadcast::Sender<ExecutionEvent>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribes to every event published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastPublisher {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl EventPublisher for BroadcastPublisher {
    fn publish(&self, event: ExecutionEvent) {
        // No subscribers is fine.
        let _ = self.sender.send(event);
    }
}

/// Publisher that keeps every event, for assertions
#[cfg(test)]
#[derive(Default)]
pub(crate) struct RecordingPublisher {
    events: std::sync::Mutex<Vec<ExecutionEvent>>,
}

#[cfg(test)]
impl RecordingPublisher {
    pub(crate) fn events(&self) -> Vec<ExecutionEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl EventPublisher for RecordingPublisher {
    fn publish(&self, event: ExecutionEvent) {
        self.events.lock().unwrap().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conveyor_core::domain::execution::ExecutionStatus;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_subscribers_receive_events_in_order() {
        let publisher = BroadcastPublisher::new(16);
        let mut rx = publisher.subscribe();
        let id = Uuid::new_v4();

        publisher.publish(ExecutionEvent::StatusChanged {
            execution_id: id,
            status: ExecutionStatus::Running,
        });
        publisher.publish(ExecutionEvent::LogAppended {
            execution_id: id,
            chunk: "hello\n".to_string(),
        });

        let first = rx.recv().await.unwrap();
        assert!(matches!(
            first,
            ExecutionEvent::StatusChanged {
                status: ExecutionStatus::Running,
                ..
            }
        ));
        let second = rx.recv().await.unwrap();
        assert_eq!(second.execution_id(), id);
    }

    #[test]
    fn test_publish_without_subscribers_is_noop() {
        let publisher = BroadcastPublisher::default();
        publisher.publish(ExecutionEvent::StatusChanged {
            execution_id: Uuid::new_v4(),
            status: ExecutionStatus::Pending,
        });
    }
}
