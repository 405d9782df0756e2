//! Task state machine
//!
//! Status transitions are driven by a table mapping each status to the statuses
//! it may move to. Updates that are not allowed are rejected and leave the task
//! untouched, so a redelivered update is refused instead of applied twice.
//!
//! ```text
//! SCHEDULED ──► INPROGRESS ──► COMPLETED
//!     │  │         │  ▲ │
//!     │  │         │  └─┘ (progress)
//!     │  │         ├──► FAILED ───────► SCHEDULED
//!     │  │         └──► TIMEOUT ──────► SCHEDULED
//!     │  └──► FAILED
//!     └──► ACK_TIMEOUT ───────────────► SCHEDULED
//! ```

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::task::{TaskInstance, TaskStatusUpdate};

/// Status of a task instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    #[serde(rename = "SCHEDULED")]
    Scheduled,
    #[serde(rename = "INPROGRESS")]
    InProgress,
    #[serde(rename = "COMPLETED")]
    Completed,
    #[serde(rename = "FAILED")]
    Failed,
    #[serde(rename = "TIMEOUT")]
    Timeout,
    #[serde(rename = "ACK_TIMEOUT")]
    AckTimeout,
}

impl TaskStatus {
    /// The status that moves a workflow on to its next task
    pub fn is_terminal_success(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Whether the current attempt of the task has ended
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Timeout | Self::AckTimeout
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "SCHEDULED",
            Self::InProgress => "INPROGRESS",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Timeout => "TIMEOUT",
            Self::AckTimeout => "ACK_TIMEOUT",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from applying a status update
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    /// The task is in a status the transition table does not know
    #[error("current status: \"{0}\" is invalid")]
    InvalidCurrentState(TaskStatus),

    /// The update asks for a transition the table does not allow
    #[error("cannot change status from {from} to {to}")]
    IllegalTransition { from: TaskStatus, to: TaskStatus },
}

/// Transition table plus the update-merge rules
#[derive(Debug, Clone)]
pub struct TaskStateMachine {
    transitions: HashMap<TaskStatus, Vec<TaskStatus>>,
}

impl Default for TaskStateMachine {
    fn default() -> Self {
        use TaskStatus::*;

        Self::with_transitions([
            (Scheduled, vec![InProgress, Failed, AckTimeout]),
            (InProgress, vec![InProgress, Completed, Failed, Timeout]),
            (Completed, vec![]),
            (Failed, vec![Scheduled]),
            (Timeout, vec![Scheduled]),
            (AckTimeout, vec![Scheduled]),
        ])
    }
}

impl TaskStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a state machine from a custom table
    ///
    /// Statuses missing from the table are treated as invalid current states.
    pub fn with_transitions(
        transitions: impl IntoIterator<Item = (TaskStatus, Vec<TaskStatus>)>,
    ) -> Self {
        Self {
            transitions: transitions.into_iter().collect(),
        }
    }

    /// Statuses reachable from `current`
    pub fn next_states(&self, current: TaskStatus) -> Option<&[TaskStatus]> {
        self.transitions.get(&current).map(Vec::as_slice)
    }

    /// Whether `current` may move to `next`
    pub fn can_transition(
        &self,
        current: TaskStatus,
        next: TaskStatus,
    ) -> Result<bool, StateError> {
        self.next_states(current)
            .map(|allowed| allowed.contains(&next))
            .ok_or(StateError::InvalidCurrentState(current))
    }

    /// Merge `update` into `task`
    ///
    /// The output is replaced only when the update carries one; logs are
    /// appended. Persisting the task is up to the caller.
    pub fn apply_update<'a>(
        &self,
        task: &'a mut TaskInstance,
        update: &TaskStatusUpdate,
    ) -> Result<&'a mut TaskInstance, StateError> {
        if !self.can_transition(task.status, update.status)? {
            return Err(StateError::IllegalTransition {
                from: task.status,
                to: update.status,
            });
        }

        task.status = update.status;
        if let Some(output) = &update.output {
            task.output = output.clone();
        }
        if let Some(logs) = &update.logs {
            task.logs.extend(logs.iter().cloned());
        }
        Ok(task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::TaskKind;
    use serde_json::json;
    use uuid::Uuid;

    const ALL: [TaskStatus; 6] = [
        TaskStatus::Scheduled,
        TaskStatus::InProgress,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Timeout,
        TaskStatus::AckTimeout,
    ];

    fn task(status: TaskStatus) -> TaskInstance {
        TaskInstance {
            task_id: Uuid::now_v7(),
            workflow_id: Uuid::now_v7(),
            task_reference_name: "t1".into(),
            kind: TaskKind::Simple,
            status,
            output: json!({ "previous": true }),
            logs: vec![json!("first")],
        }
    }

    #[test]
    fn test_transition_succeeds_iff_allowed() {
        let machine = TaskStateMachine::default();
        for current in ALL {
            let allowed = machine.next_states(current).unwrap().to_vec();
            for next in ALL {
                let mut t = task(current);
                let update = TaskStatusUpdate::new(t.task_id, next);
                let result = machine.apply_update(&mut t, &update).map(|t| t.status);

                if allowed.contains(&next) {
                    assert_eq!(result, Ok(next), "{current} -> {next}");
                } else {
                    assert_eq!(
                        result,
                        Err(StateError::IllegalTransition {
                            from: current,
                            to: next
                        }),
                        "{current} -> {next}"
                    );
                    assert_eq!(t.status, current);
                }
            }
        }
    }

    #[test]
    fn test_completed_is_final() {
        let machine = TaskStateMachine::default();
        assert_eq!(machine.next_states(TaskStatus::Completed), Some(&[][..]));
    }

    #[test]
    fn test_unknown_current_state() {
        let machine = TaskStateMachine::with_transitions([(
            TaskStatus::Scheduled,
            vec![TaskStatus::InProgress],
        )]);
        let mut t = task(TaskStatus::InProgress);
        let update = TaskStatusUpdate::new(t.task_id, TaskStatus::Completed);

        assert_eq!(
            machine.apply_update(&mut t, &update).map(|t| t.status),
            Err(StateError::InvalidCurrentState(TaskStatus::InProgress))
        );
        assert_eq!(t.status, TaskStatus::InProgress);
    }

    #[test]
    fn test_output_preserved_when_absent() {
        let machine = TaskStateMachine::default();
        let mut t = task(TaskStatus::Scheduled);
        let update = TaskStatusUpdate::new(t.task_id, TaskStatus::InProgress);

        machine.apply_update(&mut t, &update).unwrap();
        assert_eq!(t.output, json!({ "previous": true }));
    }

    #[test]
    fn test_output_replaced_when_present() {
        let machine = TaskStateMachine::default();
        let mut t = task(TaskStatus::InProgress);
        let update =
            TaskStatusUpdate::new(t.task_id, TaskStatus::Completed).with_output(json!({ "a": 1 }));

        machine.apply_update(&mut t, &update).unwrap();
        assert_eq!(t.output, json!({ "a": 1 }));
    }

    #[test]
    fn test_logs_appended() {
        let machine = TaskStateMachine::default();
        let mut t = task(TaskStatus::Scheduled);

        let single =
            TaskStatusUpdate::new(t.task_id, TaskStatus::InProgress).with_log(json!("second"));
        machine.apply_update(&mut t, &single).unwrap();

        let many = TaskStatusUpdate::new(t.task_id, TaskStatus::InProgress)
            .with_logs(vec![json!("third"), json!({ "line": 4 })]);
        machine.apply_update(&mut t, &many).unwrap();

        assert_eq!(
            t.logs,
            vec![json!("first"), json!("second"), json!("third"), json!({ "line": 4 })]
        );
    }

    #[test]
    fn test_other_fields_untouched() {
        let machine = TaskStateMachine::default();
        let mut t = task(TaskStatus::Scheduled);
        let before = t.clone();
        let update = TaskStatusUpdate::new(Uuid::now_v7(), TaskStatus::InProgress);

        machine.apply_update(&mut t, &update).unwrap();
        assert_eq!(t.task_id, before.task_id);
        assert_eq!(t.workflow_id, before.workflow_id);
        assert_eq!(t.task_reference_name, before.task_reference_name);
        assert_eq!(t.kind, before.kind);
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            StateError::IllegalTransition {
                from: TaskStatus::Completed,
                to: TaskStatus::InProgress
            }
            .to_string(),
            "cannot change status from COMPLETED to INPROGRESS"
        );
    }
}
