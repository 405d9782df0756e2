//! Store traits for task, workflow and timer state

use async_trait::async_trait;
use baton_core::{TaskInstance, WorkflowInstance};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Task not found
    #[error("task not found: {0}")]
    TaskNotFound(Uuid),

    /// Workflow not found
    #[error("workflow not found: {0}")]
    WorkflowNotFound(Uuid),

    /// Timer not found
    #[error("timer not found: {0}")]
    TimerNotFound(Uuid),

    /// Backend could not be reached
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Task instance persistence
#[async_trait]
pub trait TaskInstanceStore: Send + Sync + 'static {
    async fn get(&self, task_id: Uuid) -> Result<TaskInstance, StoreError>;

    /// Insert or overwrite the task keyed by its `task_id`
    async fn set(&self, task: &TaskInstance) -> Result<(), StoreError>;
}

/// Workflow instance persistence
#[async_trait]
pub trait WorkflowInstanceStore: Send + Sync + 'static {
    async fn get(&self, workflow_id: Uuid) -> Result<WorkflowInstance, StoreError>;

    /// Insert or overwrite the workflow keyed by its `workflow_id`
    async fn set(&self, workflow: &WorkflowInstance) -> Result<(), StoreError>;

    /// Remove a finished workflow
    async fn destroy(&self, workflow_id: Uuid) -> Result<(), StoreError>;
}

/// Kind of timer expiration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimerKind {
    /// A delayed task is due to be handed to workers again
    Delay,
    /// The task ran past its overall deadline
    Timeout,
    /// Nobody acknowledged the task in time
    AckTimeout,
}

impl std::fmt::Display for TimerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Delay => write!(f, "DELAY"),
            Self::Timeout => write!(f, "TIMEOUT"),
            Self::AckTimeout => write!(f, "ACK_TIMEOUT"),
        }
    }
}

/// A fired timer, as delivered by [`TimerInstanceStore::watch`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerEvent {
    #[serde(rename = "type")]
    pub kind: TimerKind,
    pub task_id: Uuid,
}

/// Pending deadlines of one task
///
/// A deadline that is `None` is either not armed or has already fired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerData {
    pub task_id: Uuid,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_until: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack_timeout_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_at: Option<DateTime<Utc>>,
}

impl TimerData {
    pub fn new(task_id: Uuid) -> Self {
        Self {
            task_id,
            created_at: Utc::now(),
            delay_until: None,
            ack_timeout_at: None,
            timeout_at: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay_until = Some(self.created_at + delay);
        self
    }

    pub fn with_ack_timeout(mut self, ack_timeout: Duration) -> Self {
        self.ack_timeout_at = Some(self.created_at + ack_timeout);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_at = Some(self.created_at + timeout);
        self
    }

    /// True when no deadline is left to fire
    pub fn is_idle(&self) -> bool {
        self.delay_until.is_none() && self.ack_timeout_at.is_none() && self.timeout_at.is_none()
    }
}

/// Disarm request for a task's timer
///
/// Each flag that is set clears the matching deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerUpdate {
    pub task_id: Uuid,
    #[serde(default)]
    pub ack_timeout: bool,
    #[serde(default)]
    pub timeout: bool,
}

impl TimerUpdate {
    /// The task was acknowledged
    pub fn acknowledged(task_id: Uuid) -> Self {
        Self {
            task_id,
            ack_timeout: true,
            timeout: false,
        }
    }
}

/// Request to arm deadlines for a task, as carried on the timer source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TimerSchedule {
    pub task_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_second: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack_timeout_second: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_second: Option<i64>,
}

impl TimerSchedule {
    pub fn into_timer(self) -> TimerData {
        let mut timer = TimerData::new(self.task_id);
        if let Some(seconds) = self.delay_second {
            timer = timer.with_delay(Duration::seconds(seconds));
        }
        if let Some(seconds) = self.ack_timeout_second {
            timer = timer.with_ack_timeout(Duration::seconds(seconds));
        }
        if let Some(seconds) = self.timeout_second {
            timer = timer.with_timeout(Duration::seconds(seconds));
        }
        timer
    }
}

/// Timer persistence plus expiration notifications
#[async_trait]
pub trait TimerInstanceStore: Send + Sync + 'static {
    async fn create(&self, timer: TimerData) -> Result<TimerData, StoreError>;

    async fn get(&self, task_id: Uuid) -> Result<TimerData, StoreError>;

    async fn update(&self, update: TimerUpdate) -> Result<TimerData, StoreError>;

    async fn delete(&self, task_id: Uuid) -> Result<(), StoreError>;

    /// Subscribe to expirations fired after this call
    fn watch(&self) -> broadcast::Receiver<TimerEvent>;
}
