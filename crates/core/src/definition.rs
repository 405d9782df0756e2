//! Workflow definition model
//!
//! A [`WorkflowDefinition`] is produced once by the validator and never
//! mutated afterwards. Its task tree is made of [`TaskNode`]s, a tagged union
//! keyed by the `type` field of the JSON representation.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Description applied when a definition does not provide one
pub const DEFAULT_DESCRIPTION: &str = "No description";

/// Kind of a task node, as spelled in the `type` field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskKind {
    #[serde(rename = "TASK")]
    Simple,
    #[serde(rename = "SUB_WORKFLOW")]
    SubWorkflow,
    #[serde(rename = "PARALLEL")]
    Parallel,
    #[serde(rename = "DECISION")]
    Decision,
}

impl TaskKind {
    /// Parse the `type` field of a raw task node
    pub fn from_type_name(name: &str) -> Option<Self> {
        match name {
            "TASK" => Some(Self::Simple),
            "SUB_WORKFLOW" => Some(Self::SubWorkflow),
            "PARALLEL" => Some(Self::Parallel),
            "DECISION" => Some(Self::Decision),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Simple => "TASK",
            Self::SubWorkflow => "SUB_WORKFLOW",
            Self::Parallel => "PARALLEL",
            Self::Decision => "DECISION",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to another workflow definition by name and revision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowRef {
    pub name: String,
    pub rev: i64,
}

impl WorkflowRef {
    pub fn new(name: impl Into<String>, rev: i64) -> Self {
        Self {
            name: name.into(),
            rev,
        }
    }
}

/// A leaf task executed by an external worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimpleTask {
    pub name: String,
    pub task_reference_name: String,
    #[serde(default)]
    pub input_parameters: Map<String, Value>,
}

/// A task that runs another workflow definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubWorkflowTask {
    pub name: String,
    pub task_reference_name: String,
    #[serde(default)]
    pub input_parameters: Map<String, Value>,
    pub workflow: WorkflowRef,
}

/// A fan-out into independent branches
///
/// Every branch is a non-empty sequence of nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParallelTask {
    pub name: String,
    pub task_reference_name: String,
    #[serde(default)]
    pub input_parameters: Map<String, Value>,
    pub parallel_tasks: Vec<Vec<TaskNode>>,
}

/// A choice between labelled cases with a default fallback
///
/// Case order is the order of insertion and is the order traversal visits them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionTask {
    pub name: String,
    pub task_reference_name: String,
    #[serde(default)]
    pub input_parameters: Map<String, Value>,
    pub decisions: IndexMap<String, Vec<TaskNode>>,
    pub default_decision: Vec<TaskNode>,
}

/// One node of a workflow definition's task tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TaskNode {
    #[serde(rename = "TASK")]
    Simple(SimpleTask),
    #[serde(rename = "SUB_WORKFLOW")]
    SubWorkflow(SubWorkflowTask),
    #[serde(rename = "PARALLEL")]
    Parallel(ParallelTask),
    #[serde(rename = "DECISION")]
    Decision(DecisionTask),
}

impl TaskNode {
    pub fn kind(&self) -> TaskKind {
        match self {
            Self::Simple(_) => TaskKind::Simple,
            Self::SubWorkflow(_) => TaskKind::SubWorkflow,
            Self::Parallel(_) => TaskKind::Parallel,
            Self::Decision(_) => TaskKind::Decision,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Simple(t) => &t.name,
            Self::SubWorkflow(t) => &t.name,
            Self::Parallel(t) => &t.name,
            Self::Decision(t) => &t.name,
        }
    }

    /// Reference name, unique within one definition
    pub fn reference_name(&self) -> &str {
        match self {
            Self::Simple(t) => &t.task_reference_name,
            Self::SubWorkflow(t) => &t.task_reference_name,
            Self::Parallel(t) => &t.task_reference_name,
            Self::Decision(t) => &t.task_reference_name,
        }
    }

    pub fn input_parameters(&self) -> &Map<String, Value> {
        match self {
            Self::Simple(t) => &t.input_parameters,
            Self::SubWorkflow(t) => &t.input_parameters,
            Self::Parallel(t) => &t.input_parameters,
            Self::Decision(t) => &t.input_parameters,
        }
    }
}

/// What happens when a workflow fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureStrategy {
    #[default]
    None,
    Retry,
    RecoveryWorkflow,
}

impl FailureStrategy {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "NONE" => Some(Self::None),
            "RETRY" => Some(Self::Retry),
            "RECOVERY_WORKFLOW" => Some(Self::RecoveryWorkflow),
            _ => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

/// Retry settings for [`FailureStrategy::Retry`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    pub delay_second: i64,
    pub limit: i64,
}

/// A validated, normalized workflow definition
///
/// Build one with [`WorkflowDefinition::from_value`]; deserializing directly
/// skips validation and is only meant for reloading definitions that were
/// validated before they were stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDefinition {
    pub name: String,
    pub rev: i64,
    pub description: String,
    pub tasks: Vec<TaskNode>,
    #[serde(default, skip_serializing_if = "FailureStrategy::is_none")]
    pub failure_strategy: FailureStrategy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery_workflow: Option<WorkflowRef>,
}

impl WorkflowDefinition {
    /// Validate and normalize a raw definition
    pub fn from_value(raw: &Value) -> Result<Self, crate::validation::DefinitionError> {
        crate::validation::validate_definition(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_task_kind_round_trips_type_names() {
        for kind in [
            TaskKind::Simple,
            TaskKind::SubWorkflow,
            TaskKind::Parallel,
            TaskKind::Decision,
        ] {
            assert_eq!(TaskKind::from_type_name(kind.as_str()), Some(kind));
        }
        assert_eq!(TaskKind::from_type_name("SOME_RANDOM_TYPE"), None);
    }

    #[test]
    fn test_task_node_tagged_by_type() {
        let node: TaskNode = serde_json::from_value(json!({
            "name": "huhu",
            "taskReferenceName": "HUHU",
            "type": "SUB_WORKFLOW",
            "inputParameters": { "a": "b" },
            "workflow": { "name": "a", "rev": 1 }
        }))
        .unwrap();

        assert_eq!(node.kind(), TaskKind::SubWorkflow);
        assert_eq!(node.reference_name(), "HUHU");
        assert_eq!(node.input_parameters()["a"], json!("b"));
    }

    #[test]
    fn test_failure_strategy_omitted_when_none() {
        let definition = WorkflowDefinition {
            name: "hello-world".into(),
            rev: 1,
            description: DEFAULT_DESCRIPTION.into(),
            tasks: vec![],
            failure_strategy: FailureStrategy::None,
            retry: None,
            recovery_workflow: None,
        };

        let value = serde_json::to_value(&definition).unwrap();
        assert!(value.get("failureStrategy").is_none());
        assert!(value.get("retry").is_none());
    }
}
