//! Persistence layer for progression state
//!
//! This module provides:
//! - [`TaskInstanceStore`], [`WorkflowInstanceStore`] and [`TimerInstanceStore`] traits
//! - In-memory implementations for testing and single-process runs

mod memory;
mod store;

pub use memory::{InMemoryTaskStore, InMemoryTimerStore, InMemoryWorkflowStore};
pub use store::{
    StoreError, TaskInstanceStore, TimerData, TimerEvent, TimerInstanceStore, TimerKind,
    TimerSchedule, TimerUpdate, WorkflowInstanceStore,
};
