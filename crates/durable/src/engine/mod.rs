//! Progression engine
//!
//! The engine module provides [`Progression`], which applies updates and
//! schedules follow-up tasks, the per-source [`UpdateHandler`]s, and the
//! [`ProgressionExecutor`] loop that feeds them.

mod executor;
mod handler;
mod progression;

pub use executor::{CycleReport, ExecutorError, ProgressionExecutor};
pub use handler::{StatusUpdateHandler, TimerHandler, UpdateHandler};
pub use progression::{Progress, Progression, TaskDeadlines};
