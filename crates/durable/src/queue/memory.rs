//! In-memory broker for testing and single-process runs

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use baton_core::{TaskInstance, TaskStatusUpdate};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::trace;

use super::broker::*;

#[derive(Default)]
struct SourceQueue {
    pending: VecDeque<Value>,
    in_flight: Vec<Value>,
}

/// In-memory [`UpdateQueue`] and [`CommandChannel`]
///
/// Outbound commands are recorded so callers can inspect what was sent.
///
/// # Example
///
/// ```
/// use baton_durable::{InMemoryBroker, UpdateSource};
/// use serde_json::json;
///
/// let broker = InMemoryBroker::new();
/// broker.push(UpdateSource::Task, json!({"taskId": "x"}));
/// assert_eq!(broker.pending(UpdateSource::Task), 1);
/// ```
#[derive(Default)]
pub struct InMemoryBroker {
    queues: Mutex<HashMap<UpdateSource, SourceQueue>>,
    dispatched: Mutex<Vec<DispatchRequest>>,
    published: Mutex<Vec<TaskStatusUpdate>>,
    reloaded: Mutex<Vec<TaskInstance>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a raw message to `source`
    pub fn push(&self, source: UpdateSource, message: Value) {
        self.queues
            .lock()
            .entry(source)
            .or_default()
            .pending
            .push_back(message);
    }

    /// Append a status update to `source`
    pub fn push_update(
        &self,
        source: UpdateSource,
        update: &TaskStatusUpdate,
    ) -> Result<(), serde_json::Error> {
        self.push(source, serde_json::to_value(update)?);
        Ok(())
    }

    /// Messages not yet polled
    pub fn pending(&self, source: UpdateSource) -> usize {
        self.queues
            .lock()
            .get(&source)
            .map_or(0, |queue| queue.pending.len())
    }

    /// Messages polled but not committed
    pub fn in_flight(&self, source: UpdateSource) -> usize {
        self.queues
            .lock()
            .get(&source)
            .map_or(0, |queue| queue.in_flight.len())
    }

    /// Put uncommitted messages back in front of the queue
    ///
    /// Simulates a consumer restart: the next poll redelivers them.
    pub fn rewind(&self, source: UpdateSource) {
        let mut queues = self.queues.lock();
        let queue = queues.entry(source).or_default();
        for message in queue.in_flight.drain(..).rev() {
            queue.pending.push_front(message);
        }
    }

    pub fn dispatched(&self) -> Vec<DispatchRequest> {
        self.dispatched.lock().clone()
    }

    /// Drain recorded dispatches
    pub fn take_dispatched(&self) -> Vec<DispatchRequest> {
        std::mem::take(&mut *self.dispatched.lock())
    }

    pub fn published(&self) -> Vec<TaskStatusUpdate> {
        self.published.lock().clone()
    }

    pub fn reloaded(&self) -> Vec<TaskInstance> {
        self.reloaded.lock().clone()
    }
}

#[async_trait]
impl UpdateQueue for InMemoryBroker {
    async fn poll(
        &self,
        source: UpdateSource,
        max_count: usize,
    ) -> Result<Vec<Value>, QueueError> {
        let mut queues = self.queues.lock();
        let queue = queues.entry(source).or_default();
        let count = max_count.min(queue.pending.len());
        let batch: Vec<Value> = queue.pending.drain(..count).collect();
        queue.in_flight.extend(batch.iter().cloned());
        Ok(batch)
    }

    async fn commit(&self, source: UpdateSource) -> Result<(), QueueError> {
        if let Some(queue) = self.queues.lock().get_mut(&source) {
            trace!(%source, count = queue.in_flight.len(), "committing");
            queue.in_flight.clear();
        }
        Ok(())
    }
}

#[async_trait]
impl CommandChannel for InMemoryBroker {
    async fn dispatch(&self, request: DispatchRequest) -> Result<(), QueueError> {
        self.dispatched.lock().push(request);
        Ok(())
    }

    async fn publish(&self, update: &TaskStatusUpdate) -> Result<(), QueueError> {
        self.published.lock().push(update.clone());
        Ok(())
    }

    async fn reload(&self, task: &TaskInstance) -> Result<(), QueueError> {
        self.reloaded.lock().push(task.clone());
        Ok(())
    }
}
