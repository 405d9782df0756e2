//! Runtime task and workflow instances

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::definition::{TaskKind, TaskNode, WorkflowDefinition};
use crate::state::TaskStatus;

/// One spawned task of a running workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskInstance {
    pub task_id: Uuid,
    pub workflow_id: Uuid,
    pub task_reference_name: String,
    #[serde(rename = "type")]
    pub kind: TaskKind,
    pub status: TaskStatus,
    #[serde(default)]
    pub output: Value,
    #[serde(default)]
    pub logs: Vec<Value>,
}

impl TaskInstance {
    /// A freshly scheduled instance of `node`
    pub fn scheduled(workflow_id: Uuid, node: &TaskNode) -> Self {
        Self {
            task_id: Uuid::now_v7(),
            workflow_id,
            task_reference_name: node.reference_name().to_string(),
            kind: node.kind(),
            status: TaskStatus::Scheduled,
            output: Value::Null,
            logs: Vec::new(),
        }
    }
}

/// Log payload of an update: one entry or several
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LogEntries {
    Many(Vec<Value>),
    One(Value),
}

impl LogEntries {
    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        match self {
            Self::Many(entries) => entries.iter(),
            Self::One(entry) => std::slice::from_ref(entry).iter(),
        }
    }
}

/// A status change reported for one task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatusUpdate {
    pub task_id: Uuid,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs: Option<LogEntries>,
}

impl TaskStatusUpdate {
    pub fn new(task_id: Uuid, status: TaskStatus) -> Self {
        Self {
            task_id,
            status,
            output: None,
            logs: None,
        }
    }

    pub fn with_output(mut self, output: Value) -> Self {
        self.output = Some(output);
        self
    }

    pub fn with_log(mut self, entry: Value) -> Self {
        self.logs = Some(LogEntries::One(entry));
        self
    }

    pub fn with_logs(mut self, entries: Vec<Value>) -> Self {
        self.logs = Some(LogEntries::Many(entries));
        self
    }
}

/// A running workflow
///
/// `task_refs` grows as tasks are spawned; keys are never removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowInstance {
    pub workflow_id: Uuid,
    pub workflow_definition: WorkflowDefinition,
    #[serde(default)]
    pub input: Value,
    #[serde(default)]
    pub task_refs: IndexMap<String, Uuid>,
}

impl WorkflowInstance {
    pub fn new(workflow_definition: WorkflowDefinition, input: Value) -> Self {
        Self {
            workflow_id: Uuid::now_v7(),
            workflow_definition,
            input,
            task_refs: IndexMap::new(),
        }
    }
}

/// Outputs of already spawned tasks, keyed by reference name
pub type TaskOutputs = Map<String, Value>;
