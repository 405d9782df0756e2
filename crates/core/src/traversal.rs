//! Task tree traversal
//!
//! Locates tasks by reference name and decides where execution continues once a
//! task completes.

use crate::definition::{TaskNode, WorkflowDefinition};
use crate::path::{
    is_inside_decision_case, is_inside_decision_default, is_inside_parallel_branch, TreePath,
};

/// Errors from traversal operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TraversalError {
    /// No node in the tree carries this reference name
    #[error("taskReferenceName: \"{0}\" not found")]
    TaskReferenceNotFound(String),

    /// The path does not follow any nesting this traversal produces
    #[error("task path {0} is malformed")]
    MalformedTaskPath(TreePath),
}

/// Find the path of `reference_name`, searching from the first top-level task
pub fn find_task_path(reference_name: &str, tasks: &[TaskNode]) -> Option<TreePath> {
    find_task_path_from(reference_name, tasks, TreePath::root(0))
}

/// Depth-first, left-to-right search starting at `start`
///
/// Children of a node are searched before its later siblings. Decision cases
/// are visited in insertion order, then the default branch.
pub fn find_task_path_from(
    reference_name: &str,
    tasks: &[TaskNode],
    start: TreePath,
) -> Option<TreePath> {
    let mut path = start;
    while let Some(node) = path.resolve(tasks) {
        if node.reference_name() == reference_name {
            return Some(path);
        }

        let found = match node {
            TaskNode::Parallel(task) => (0..task.parallel_tasks.len()).find_map(|branch| {
                find_task_path_from(reference_name, tasks, path.parallel_branch(branch))
            }),
            TaskNode::Decision(task) => task
                .decisions
                .keys()
                .map(|label| path.decision_case(label.as_str()))
                .chain(std::iter::once(path.decision_default()))
                .find_map(|branch| find_task_path_from(reference_name, tasks, branch)),
            TaskNode::Simple(_) | TaskNode::SubWorkflow(_) => None,
        };
        if found.is_some() {
            return found;
        }

        path = path.next_sibling();
    }
    None
}

/// Resolve a reference name to its node in `definition`
pub fn get_workflow_task<'a>(
    reference_name: &str,
    definition: &'a WorkflowDefinition,
) -> Result<&'a TaskNode, TraversalError> {
    find_task_path(reference_name, &definition.tasks)
        .and_then(|path| path.resolve(&definition.tasks))
        .ok_or_else(|| TraversalError::TaskReferenceNotFound(reference_name.to_string()))
}

/// Path of the task to run after the task at `completed` finished successfully
///
/// Returns `Ok(None)` when the workflow has nothing left to run.
///
/// Finishing the last task of one `Parallel` branch moves past the whole
/// `Parallel` node. Whether the other branches are done is not checked here;
/// the dispatcher that owns branch bookkeeping has to hold the join.
///
/// Moving past a nested node goes through the same rules as the node itself,
/// so the next path is never simply the enclosing node's sibling. A `Parallel`
/// or `Decision` that is the last top-level task finishes the workflow instead
/// of yielding a path one past the end.
pub fn get_next_task_path(
    tasks: &[TaskNode],
    completed: &TreePath,
) -> Result<Option<TreePath>, TraversalError> {
    let last = tasks.len().checked_sub(1).map(TreePath::root);
    if last.as_ref() == Some(completed) {
        return Ok(None);
    }

    let sibling = completed.next_sibling();
    if sibling.resolve(tasks).is_some() {
        return Ok(Some(sibling));
    }

    let nested = is_inside_parallel_branch(tasks, completed)
        || is_inside_decision_default(tasks, completed)
        || is_inside_decision_case(tasks, completed);
    match completed.parent() {
        // Continue as if the enclosing node itself had just completed
        Some(parent) if nested => get_next_task_path(tasks, &parent),
        _ => Err(TraversalError::MalformedTaskPath(completed.clone())),
    }
}
