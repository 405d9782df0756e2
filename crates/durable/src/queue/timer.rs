//! Adapter turning a timer watch subscription into an update queue

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::warn;

use super::broker::{QueueError, UpdateQueue, UpdateSource};
use crate::persistence::TimerEvent;

/// [`UpdateQueue`] over a timer store's watch subscription
///
/// Events are acknowledged on receipt, so `commit` has nothing to do. Events
/// dropped because the subscriber lagged are logged and skipped.
pub struct TimerEventQueue {
    events: Mutex<broadcast::Receiver<TimerEvent>>,
}

impl TimerEventQueue {
    pub fn new(events: broadcast::Receiver<TimerEvent>) -> Self {
        Self {
            events: Mutex::new(events),
        }
    }
}

#[async_trait]
impl UpdateQueue for TimerEventQueue {
    async fn poll(
        &self,
        _source: UpdateSource,
        max_count: usize,
    ) -> Result<Vec<Value>, QueueError> {
        let mut events = self.events.lock();
        let mut batch = Vec::new();
        while batch.len() < max_count {
            match events.try_recv() {
                Ok(event) => batch.push(
                    serde_json::to_value(&event)
                        .map_err(|e| QueueError::Unavailable(e.to_string()))?,
                ),
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "timer subscriber lagged, events dropped");
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Closed) => {
                    if batch.is_empty() {
                        return Err(QueueError::Unavailable("timer watch closed".to_string()));
                    }
                    break;
                }
            }
        }
        Ok(batch)
    }

    async fn commit(&self, _source: UpdateSource) -> Result<(), QueueError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::TimerKind;
    use serde_json::json;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_poll_serializes_events() {
        let (tx, rx) = broadcast::channel(16);
        let queue = TimerEventQueue::new(rx);
        let task_id = Uuid::now_v7();
        tx.send(TimerEvent {
            kind: TimerKind::AckTimeout,
            task_id,
        })
        .unwrap();

        let batch = queue.poll(UpdateSource::Timer, 100).await.unwrap();
        assert_eq!(batch, vec![json!({"type": "ACK_TIMEOUT", "taskId": task_id})]);
        assert!(queue.poll(UpdateSource::Timer, 100).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_poll_limits_batch() {
        let (tx, rx) = broadcast::channel(16);
        let queue = TimerEventQueue::new(rx);
        for _ in 0..3 {
            tx.send(TimerEvent {
                kind: TimerKind::Timeout,
                task_id: Uuid::now_v7(),
            })
            .unwrap();
        }

        assert_eq!(queue.poll(UpdateSource::Timer, 2).await.unwrap().len(), 2);
        assert_eq!(queue.poll(UpdateSource::Timer, 2).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_closed_watch_is_unavailable() {
        let (tx, rx) = broadcast::channel::<TimerEvent>(4);
        let queue = TimerEventQueue::new(rx);
        drop(tx);

        assert!(matches!(
            queue.poll(UpdateSource::Timer, 10).await,
            Err(QueueError::Unavailable(_))
        ));
    }
}
