//! Update queue and command channel traits

use async_trait::async_trait;
use baton_core::{TaskInstance, TaskNode, TaskOutputs, TaskStatusUpdate};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Error type for queue operations
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// Broker could not be reached
    #[error("queue unavailable: {0}")]
    Unavailable(String),

    /// A command could not be delivered to workers
    #[error("dispatch failed: {0}")]
    DispatchFailed(String),
}

/// Stream a progression loop consumes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateSource {
    /// Status updates reported by task workers
    Task,
    /// Status updates reported by external event producers
    Event,
    /// Expired timers
    Timer,
}

impl UpdateSource {
    pub const ALL: [UpdateSource; 3] = [Self::Task, Self::Event, Self::Timer];
}

impl std::fmt::Display for UpdateSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Task => write!(f, "task"),
            Self::Event => write!(f, "event"),
            Self::Timer => write!(f, "timer"),
        }
    }
}

/// Inbound side of the broker
///
/// Messages returned by `poll` stay uncommitted until `commit` is called for
/// the same source; a consumer that restarts before committing sees them again.
#[async_trait]
pub trait UpdateQueue: Send + Sync + 'static {
    /// Take up to `max_count` messages, in arrival order
    async fn poll(&self, source: UpdateSource, max_count: usize)
        -> Result<Vec<Value>, QueueError>;

    /// Acknowledge everything polled so far from `source`
    async fn commit(&self, source: UpdateSource) -> Result<(), QueueError>;
}

/// Command handed to task workers when a task is scheduled
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchRequest {
    pub task: TaskInstance,
    pub node: TaskNode,
    /// Outputs of the workflow's earlier tasks, keyed by reference name
    pub context: TaskOutputs,
}

/// Outbound side of the broker
#[async_trait]
pub trait CommandChannel: Send + Sync + 'static {
    /// Hand a scheduled task to workers
    async fn dispatch(&self, request: DispatchRequest) -> Result<(), QueueError>;

    /// Announce an applied status update
    async fn publish(&self, update: &TaskStatusUpdate) -> Result<(), QueueError>;

    /// Ask workers to pick up an existing task again
    async fn reload(&self, task: &TaskInstance) -> Result<(), QueueError>;
}
