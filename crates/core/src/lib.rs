// Workflow Progression Core
//
// This crate holds the I/O-free heart of Baton: how a workflow definition is
// validated, how tasks inside its nested tree are addressed and found, which
// task runs after another one completes, and how a task's status may change.
//
// Key design decisions:
// - Task nodes are a tagged enum; traversal and validation match on it exhaustively
// - Tree addresses are typed segments, not mixed index/string lists
// - Validation reports every violation at once with the exact node location
// - Parallel joins are NOT enforced by traversal; the dispatcher owns that bookkeeping

pub mod definition;
pub mod path;
pub mod state;
pub mod task;
pub mod traversal;
pub mod validation;

// Telemetry (tracing subscriber setup for binaries)
pub mod telemetry;

// Re-exports for convenience
pub use definition::{
    DecisionTask, FailureStrategy, ParallelTask, RetryConfig, SimpleTask, SubWorkflowTask,
    TaskKind, TaskNode, WorkflowDefinition, WorkflowRef, DEFAULT_DESCRIPTION,
};
pub use path::{
    is_inside_decision_case, is_inside_decision_default, is_inside_parallel_branch, PathSegment,
    TreePath,
};
pub use state::{StateError, TaskStateMachine, TaskStatus};
pub use task::{LogEntries, TaskInstance, TaskOutputs, TaskStatusUpdate, WorkflowInstance};
pub use traversal::{
    find_task_path, find_task_path_from, get_next_task_path, get_workflow_task, TraversalError,
};
pub use validation::{validate_definition, DefinitionError};
