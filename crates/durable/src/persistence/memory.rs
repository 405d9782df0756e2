//! In-memory stores for testing and single-process runs

use std::collections::HashMap;

use async_trait::async_trait;
use baton_core::{TaskInstance, WorkflowInstance};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, trace};
use uuid::Uuid;

use super::store::*;

const TIMER_EVENT_CAPACITY: usize = 1024;

/// In-memory [`TaskInstanceStore`]
///
/// # Example
///
/// ```
/// use baton_durable::InMemoryTaskStore;
///
/// let store = InMemoryTaskStore::new();
/// assert!(store.is_empty());
/// ```
#[derive(Default)]
pub struct InMemoryTaskStore {
    tasks: RwLock<HashMap<Uuid, TaskInstance>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tasks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.read().is_empty()
    }

    /// Every stored task, in no particular order
    pub fn all(&self) -> Vec<TaskInstance> {
        self.tasks.read().values().cloned().collect()
    }
}

#[async_trait]
impl TaskInstanceStore for InMemoryTaskStore {
    async fn get(&self, task_id: Uuid) -> Result<TaskInstance, StoreError> {
        self.tasks
            .read()
            .get(&task_id)
            .cloned()
            .ok_or(StoreError::TaskNotFound(task_id))
    }

    async fn set(&self, task: &TaskInstance) -> Result<(), StoreError> {
        self.tasks.write().insert(task.task_id, task.clone());
        Ok(())
    }
}

/// In-memory [`WorkflowInstanceStore`]
#[derive(Default)]
pub struct InMemoryWorkflowStore {
    workflows: RwLock<HashMap<Uuid, WorkflowInstance>>,
}

impl InMemoryWorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, workflow_id: Uuid) -> bool {
        self.workflows.read().contains_key(&workflow_id)
    }

    pub fn len(&self) -> usize {
        self.workflows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.workflows.read().is_empty()
    }
}

#[async_trait]
impl WorkflowInstanceStore for InMemoryWorkflowStore {
    async fn get(&self, workflow_id: Uuid) -> Result<WorkflowInstance, StoreError> {
        self.workflows
            .read()
            .get(&workflow_id)
            .cloned()
            .ok_or(StoreError::WorkflowNotFound(workflow_id))
    }

    async fn set(&self, workflow: &WorkflowInstance) -> Result<(), StoreError> {
        self.workflows
            .write()
            .insert(workflow.workflow_id, workflow.clone());
        Ok(())
    }

    async fn destroy(&self, workflow_id: Uuid) -> Result<(), StoreError> {
        self.workflows
            .write()
            .remove(&workflow_id)
            .map(|_| ())
            .ok_or(StoreError::WorkflowNotFound(workflow_id))
    }
}

/// In-memory [`TimerInstanceStore`]
///
/// Deadlines only fire when [`InMemoryTimerStore::fire_due`] is called; the
/// worker binary drives it from a ticker.
pub struct InMemoryTimerStore {
    timers: RwLock<HashMap<Uuid, TimerData>>,
    events: broadcast::Sender<TimerEvent>,
}

impl Default for InMemoryTimerStore {
    fn default() -> Self {
        let (events, _) = broadcast::channel(TIMER_EVENT_CAPACITY);
        Self {
            timers: RwLock::new(HashMap::new()),
            events,
        }
    }
}

impl InMemoryTimerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.timers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.read().is_empty()
    }

    /// Fire every deadline at or before `now`
    ///
    /// Each deadline fires once. Returns the number of events emitted.
    pub fn fire_due(&self, now: DateTime<Utc>) -> usize {
        let mut fired = Vec::new();
        {
            let mut timers = self.timers.write();
            for timer in timers.values_mut() {
                if timer.delay_until.is_some_and(|at| at <= now) {
                    timer.delay_until = None;
                    fired.push(TimerEvent {
                        kind: TimerKind::Delay,
                        task_id: timer.task_id,
                    });
                }
                if timer.ack_timeout_at.is_some_and(|at| at <= now) {
                    timer.ack_timeout_at = None;
                    fired.push(TimerEvent {
                        kind: TimerKind::AckTimeout,
                        task_id: timer.task_id,
                    });
                }
                if timer.timeout_at.is_some_and(|at| at <= now) {
                    timer.timeout_at = None;
                    fired.push(TimerEvent {
                        kind: TimerKind::Timeout,
                        task_id: timer.task_id,
                    });
                }
            }
        }

        let count = fired.len();
        for event in fired {
            trace!(task_id = %event.task_id, kind = %event.kind, "timer fired");
            // No subscribers is fine; the event is simply dropped.
            let _ = self.events.send(event);
        }
        if count > 0 {
            debug!(count, "fired due timers");
        }
        count
    }
}

#[async_trait]
impl TimerInstanceStore for InMemoryTimerStore {
    async fn create(&self, timer: TimerData) -> Result<TimerData, StoreError> {
        self.timers.write().insert(timer.task_id, timer.clone());
        Ok(timer)
    }

    async fn get(&self, task_id: Uuid) -> Result<TimerData, StoreError> {
        self.timers
            .read()
            .get(&task_id)
            .cloned()
            .ok_or(StoreError::TimerNotFound(task_id))
    }

    async fn update(&self, update: TimerUpdate) -> Result<TimerData, StoreError> {
        let mut timers = self.timers.write();
        let timer = timers
            .get_mut(&update.task_id)
            .ok_or(StoreError::TimerNotFound(update.task_id))?;

        if update.ack_timeout {
            timer.ack_timeout_at = None;
        }
        if update.timeout {
            timer.timeout_at = None;
        }
        Ok(timer.clone())
    }

    async fn delete(&self, task_id: Uuid) -> Result<(), StoreError> {
        self.timers
            .write()
            .remove(&task_id)
            .map(|_| ())
            .ok_or(StoreError::TimerNotFound(task_id))
    }

    fn watch(&self) -> broadcast::Receiver<TimerEvent> {
        self.events.subscribe()
    }
}
