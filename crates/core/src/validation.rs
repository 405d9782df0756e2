//! Workflow definition validation
//!
//! Validation walks the raw JSON tree once, collecting every violation with the
//! exact location of the offending node, and builds the normalized
//! [`WorkflowDefinition`] on the way. Nothing is returned unless the whole tree
//! is valid.
//!
//! Locations are rendered from the root object named `workflowDefinition`:
//!
//! ```text
//! workflowDefinition.tasks[2].parallelTasks[1].tasks[0].workflow.name is invalid
//! workflowDefinition.tasks[1].decisions["case1"].tasks[0].taskReferenceName is duplicated
//! workflowDefinition.tasks[1].defaultDecision cannot be empty
//! ```

use std::collections::HashSet;

use indexmap::IndexMap;
use serde_json::{Map, Value};
use tracing::debug;

use crate::definition::{
    DecisionTask, FailureStrategy, ParallelTask, RetryConfig, SimpleTask, SubWorkflowTask,
    TaskKind, TaskNode, WorkflowDefinition, WorkflowRef, DEFAULT_DESCRIPTION,
};

const ROOT: &str = "workflowDefinition";

/// A rejected workflow definition
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DefinitionError {
    /// Every violation found, in document order
    #[error("{}", .errors.join("\n"))]
    Invalid { errors: Vec<String> },
}

impl DefinitionError {
    pub fn errors(&self) -> &[String] {
        match self {
            Self::Invalid { errors } => errors,
        }
    }
}

/// Validate a raw definition and apply defaults
pub fn validate_definition(raw: &Value) -> Result<WorkflowDefinition, DefinitionError> {
    let mut validator = Validator::default();
    let definition = validator.definition(raw);

    match definition {
        Some(definition) if validator.errors.is_empty() => Ok(definition),
        _ => {
            debug!(
                error_count = validator.errors.len(),
                "workflow definition rejected"
            );
            Err(DefinitionError::Invalid {
                errors: validator.errors,
            })
        }
    }
}

#[derive(Default)]
struct Validator {
    errors: Vec<String>,
    references: HashSet<String>,
}

impl Validator {
    fn invalid(&mut self, path: &str) {
        self.errors.push(format!("{path} is invalid"));
    }

    fn empty(&mut self, path: &str) {
        self.errors.push(format!("{path} cannot be empty"));
    }

    fn non_empty_string(&mut self, value: Option<&Value>, path: &str) -> Option<String> {
        match value.and_then(Value::as_str) {
            Some(text) if !text.is_empty() => Some(text.to_string()),
            _ => {
                self.invalid(path);
                None
            }
        }
    }

    fn integer(&mut self, value: Option<&Value>, path: &str) -> Option<i64> {
        let integer = value.and_then(Value::as_i64);
        if integer.is_none() {
            self.invalid(path);
        }
        integer
    }

    fn definition(&mut self, raw: &Value) -> Option<WorkflowDefinition> {
        let Some(object) = raw.as_object() else {
            self.invalid(ROOT);
            return None;
        };

        let name = self.non_empty_string(object.get("name"), &format!("{ROOT}.name"));
        let rev = self.integer(object.get("rev"), &format!("{ROOT}.rev"));
        let description = match object.get("description") {
            None | Some(Value::Null) => Some(DEFAULT_DESCRIPTION.to_string()),
            Some(Value::String(text)) => Some(text.clone()),
            Some(_) => {
                self.invalid(&format!("{ROOT}.description"));
                None
            }
        };

        let failure_strategy = match object.get("failureStrategy") {
            None | Some(Value::Null) => Some(FailureStrategy::None),
            Some(value) => {
                let strategy = value.as_str().and_then(FailureStrategy::from_name);
                if strategy.is_none() {
                    self.invalid(&format!("{ROOT}.failureStrategy"));
                }
                strategy
            }
        };
        let retry = self.retry(
            object.get("retry"),
            failure_strategy == Some(FailureStrategy::Retry),
        );
        let recovery_workflow = self.recovery_workflow(
            object.get("recoveryWorkflow"),
            failure_strategy == Some(FailureStrategy::RecoveryWorkflow),
        );

        let tasks = self.node_list(
            object.get("tasks"),
            &format!("{ROOT}.tasks"),
            &format!("{ROOT}.tasks"),
        );

        Some(WorkflowDefinition {
            name: name?,
            rev: rev?,
            description: description?,
            tasks: tasks?,
            failure_strategy: failure_strategy?,
            retry: retry?,
            recovery_workflow: recovery_workflow?,
        })
    }

    /// `Some(None)` when retry settings are absent and not required
    fn retry(&mut self, value: Option<&Value>, required: bool) -> Option<Option<RetryConfig>> {
        let path = format!("{ROOT}.retry");
        match value {
            None | Some(Value::Null) if !required => Some(None),
            Some(Value::Object(object)) => {
                let delay_second =
                    self.integer(object.get("delaySecond"), &format!("{path}.delaySecond"));
                let limit = self.integer(object.get("limit"), &format!("{path}.limit"));
                Some(Some(RetryConfig {
                    delay_second: delay_second?,
                    limit: limit?,
                }))
            }
            _ => {
                self.invalid(&path);
                None
            }
        }
    }

    /// `Some(None)` when no recovery workflow is set and none is required
    fn recovery_workflow(
        &mut self,
        value: Option<&Value>,
        required: bool,
    ) -> Option<Option<WorkflowRef>> {
        let path = format!("{ROOT}.recoveryWorkflow");
        match value {
            None | Some(Value::Null) if !required => Some(None),
            Some(value @ Value::Object(_)) => self.workflow_ref(Some(value), &path).map(Some),
            _ => {
                self.invalid(&path);
                None
            }
        }
    }

    fn workflow_ref(&mut self, value: Option<&Value>, path: &str) -> Option<WorkflowRef> {
        let object = value.and_then(Value::as_object);
        let name =
            self.non_empty_string(object.and_then(|o| o.get("name")), &format!("{path}.name"));
        let rev = self.integer(object.and_then(|o| o.get("rev")), &format!("{path}.rev"));
        Some(WorkflowRef {
            name: name?,
            rev: rev?,
        })
    }

    /// Validate a non-empty sequence of nodes
    ///
    /// `container` names the sequence in the "cannot be empty" message and
    /// `node_prefix` is indexed to name each node.
    fn node_list(
        &mut self,
        value: Option<&Value>,
        container: &str,
        node_prefix: &str,
    ) -> Option<Vec<TaskNode>> {
        let items = match value.and_then(Value::as_array) {
            Some(items) if !items.is_empty() => items,
            _ => {
                self.empty(container);
                return None;
            }
        };

        // Every node is visited before any failure is folded in
        let nodes: Vec<Option<TaskNode>> = items
            .iter()
            .enumerate()
            .map(|(index, item)| self.node(item, &format!("{node_prefix}[{index}]")))
            .collect();
        nodes.into_iter().collect()
    }

    fn reference_name(&mut self, value: Option<&Value>, path: &str) -> Option<String> {
        let field = format!("{path}.taskReferenceName");
        let reference_name = self.non_empty_string(value, &field)?;
        if !self.references.insert(reference_name.clone()) {
            self.errors.push(format!("{field} is duplicated"));
            return None;
        }
        Some(reference_name)
    }

    fn node(&mut self, raw: &Value, path: &str) -> Option<TaskNode> {
        let Some(object) = raw.as_object() else {
            self.invalid(path);
            return None;
        };

        let name = self.non_empty_string(object.get("name"), &format!("{path}.name"));
        let task_reference_name = self.reference_name(object.get("taskReferenceName"), path);
        let kind = object
            .get("type")
            .and_then(Value::as_str)
            .and_then(TaskKind::from_type_name);
        if kind.is_none() {
            self.invalid(&format!("{path}.type"));
        }
        let input_parameters = match object.get("inputParameters") {
            None | Some(Value::Null) => Some(Map::new()),
            Some(Value::Object(parameters)) => Some(parameters.clone()),
            Some(_) => {
                self.invalid(&format!("{path}.inputParameters"));
                None
            }
        };

        // Unknown kinds have no children-specific rules to check
        match kind? {
            TaskKind::Simple => Some(TaskNode::Simple(SimpleTask {
                name: name?,
                task_reference_name: task_reference_name?,
                input_parameters: input_parameters?,
            })),
            TaskKind::SubWorkflow => {
                let workflow =
                    self.workflow_ref(object.get("workflow"), &format!("{path}.workflow"));
                Some(TaskNode::SubWorkflow(SubWorkflowTask {
                    name: name?,
                    task_reference_name: task_reference_name?,
                    input_parameters: input_parameters?,
                    workflow: workflow?,
                }))
            }
            TaskKind::Parallel => {
                let parallel_tasks = self.parallel_branches(object.get("parallelTasks"), path);
                Some(TaskNode::Parallel(ParallelTask {
                    name: name?,
                    task_reference_name: task_reference_name?,
                    input_parameters: input_parameters?,
                    parallel_tasks: parallel_tasks?,
                }))
            }
            TaskKind::Decision => {
                let default_decision = self.node_list(
                    object.get("defaultDecision"),
                    &format!("{path}.defaultDecision"),
                    &format!("{path}.defaultDecision.tasks"),
                );
                let decisions = self.decision_cases(object.get("decisions"), path);
                Some(TaskNode::Decision(DecisionTask {
                    name: name?,
                    task_reference_name: task_reference_name?,
                    input_parameters: input_parameters?,
                    decisions: decisions?,
                    default_decision: default_decision?,
                }))
            }
        }
    }

    fn parallel_branches(
        &mut self,
        value: Option<&Value>,
        path: &str,
    ) -> Option<Vec<Vec<TaskNode>>> {
        let branches = match value.and_then(Value::as_array) {
            Some(branches) if !branches.is_empty() => branches,
            _ => {
                self.empty(&format!("{path}.parallelTasks"));
                return None;
            }
        };

        let branches: Vec<Option<Vec<TaskNode>>> = branches
            .iter()
            .enumerate()
            .map(|(index, branch)| {
                let container = format!("{path}.parallelTasks[{index}]");
                self.node_list(Some(branch), &container, &format!("{container}.tasks"))
            })
            .collect();
        branches.into_iter().collect()
    }

    fn decision_cases(
        &mut self,
        value: Option<&Value>,
        path: &str,
    ) -> Option<IndexMap<String, Vec<TaskNode>>> {
        let cases = match value.and_then(Value::as_object) {
            Some(cases) if !cases.is_empty() => cases,
            _ => {
                self.empty(&format!("{path}.decisions"));
                return None;
            }
        };

        let cases: Vec<(String, Option<Vec<TaskNode>>)> = cases
            .iter()
            .map(|(label, case)| {
                let container = format!("{path}.decisions[{label:?}]");
                let nodes = self.node_list(Some(case), &container, &format!("{container}.tasks"));
                (label.clone(), nodes)
            })
            .collect();
        cases
            .into_iter()
            .map(|(label, nodes)| nodes.map(|nodes| (label, nodes)))
            .collect()
    }
}
