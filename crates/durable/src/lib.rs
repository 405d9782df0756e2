//! # Durable Progression Engine
//!
//! Moves workflow instances forward as task status updates arrive.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  poll / commit  ┌─────────────────────┐
//! │ UpdateQueue  │ ──────────────▶ │ ProgressionExecutor │  one per source:
//! │ (task/event) │                 │  (batch + backoff)  │  task, event, timer
//! └──────────────┘                 └─────────────────────┘
//!        ▲                                    │ UpdateHandler
//!        │ TimerEventQueue                    ▼
//! ┌──────────────┐                 ┌─────────────────────┐   dispatch/publish
//! │ TimerStore   │ ◀── sync ────── │     Progression     │ ─────────────────▶ CommandChannel
//! └──────────────┘                 └─────────────────────┘
//!                                             │ get / set / destroy
//!                                             ▼
//!                                  Task + Workflow stores
//! ```
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use baton_durable::prelude::*;
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let broker = Arc::new(InMemoryBroker::new());
//! let progression = Progression::new(
//!     Arc::new(InMemoryTaskStore::new()),
//!     Arc::new(InMemoryWorkflowStore::new()),
//!     broker.clone(),
//! );
//!
//! let definition = WorkflowDefinition::from_value(&json!({
//!     "name": "hello", "rev": 1,
//!     "tasks": [{ "name": "greet", "taskReferenceName": "greet", "type": "TASK" }]
//! }))
//! .unwrap();
//!
//! progression.start_workflow(definition, json!({})).await.unwrap();
//! assert_eq!(broker.dispatched().len(), 1);
//! # }
//! ```

pub mod engine;
pub mod persistence;
pub mod queue;
pub mod worker;

/// Prelude for common imports
pub mod prelude {
    pub use crate::engine::{
        ExecutorError, Progress, Progression, ProgressionExecutor, StatusUpdateHandler,
        TaskDeadlines, TimerHandler, UpdateHandler,
    };
    pub use crate::persistence::{
        InMemoryTaskStore, InMemoryTimerStore, InMemoryWorkflowStore, StoreError,
        TaskInstanceStore, TimerData, TimerEvent, TimerInstanceStore, TimerKind, TimerSchedule,
        WorkflowInstanceStore,
    };
    pub use crate::queue::{
        CommandChannel, DispatchRequest, InMemoryBroker, QueueError, TimerEventQueue,
        UpdateQueue, UpdateSource,
    };
    pub use crate::worker::{PollerConfig, UpdatePoller};
    pub use baton_core::{TaskStatus, TaskStatusUpdate, WorkflowDefinition};
}

// Re-export key types at crate root
pub use engine::{
    CycleReport, ExecutorError, Progress, Progression, ProgressionExecutor, StatusUpdateHandler,
    TaskDeadlines, TimerHandler, UpdateHandler,
};
pub use persistence::{
    InMemoryTaskStore, InMemoryTimerStore, InMemoryWorkflowStore, StoreError, TaskInstanceStore,
    TimerData, TimerEvent, TimerInstanceStore, TimerKind, TimerSchedule, TimerUpdate,
    WorkflowInstanceStore,
};
pub use queue::{
    CommandChannel, DispatchRequest, InMemoryBroker, QueueError, TimerEventQueue, UpdateQueue,
    UpdateSource,
};
pub use worker::{PollerConfig, PollerError, UpdatePoller};
