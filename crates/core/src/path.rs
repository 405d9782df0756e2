//! Typed addresses into a definition's task tree
//!
//! A [`TreePath`] starts with the index of a top-level task. Descending into a
//! `Parallel` or `Decision` node appends a branch segment followed by the index
//! inside that branch, so every path ends with [`PathSegment::Index`]:
//!
//! ```text
//! [Index(2)]                                         tasks[2]
//! [Index(2), ParallelBranch(1), Index(0)]            tasks[2].parallelTasks[1].tasks[0]
//! [Index(1), DecisionCase("case1"), Index(0)]        tasks[1].decisions["case1"].tasks[0]
//! [Index(1), DecisionDefault, Index(3)]              tasks[1].defaultDecision.tasks[3]
//! ```

use std::fmt;

use crate::definition::{TaskKind, TaskNode};

/// One step of a [`TreePath`]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    /// Position inside the current sequence
    Index(usize),
    /// Branch of a `Parallel` node
    ParallelBranch(usize),
    /// Named case of a `Decision` node
    DecisionCase(String),
    /// Default branch of a `Decision` node
    DecisionDefault,
}

/// Address of exactly one node inside a task tree
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TreePath {
    segments: Vec<PathSegment>,
}

impl TreePath {
    /// Path of the top-level task at `index`
    pub fn root(index: usize) -> Self {
        Self {
            segments: vec![PathSegment::Index(index)],
        }
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    pub fn is_top_level(&self) -> bool {
        self.segments.len() == 1
    }

    /// The node immediately following this one in the same sequence
    pub fn next_sibling(&self) -> Self {
        let mut segments = self.segments.clone();
        if let Some(PathSegment::Index(index)) = segments.last_mut() {
            *index += 1;
        }
        Self { segments }
    }

    /// The `Parallel` or `Decision` node enclosing this one, if any
    pub fn parent(&self) -> Option<Self> {
        if self.is_top_level() {
            return None;
        }
        let mut segments = self.segments.clone();
        segments.truncate(segments.len() - 2);
        Some(Self { segments })
    }

    /// First node of branch `branch` of the `Parallel` node at this path
    pub fn parallel_branch(&self, branch: usize) -> Self {
        self.descend(PathSegment::ParallelBranch(branch))
    }

    /// First node of case `label` of the `Decision` node at this path
    pub fn decision_case(&self, label: impl Into<String>) -> Self {
        self.descend(PathSegment::DecisionCase(label.into()))
    }

    /// First node of the default branch of the `Decision` node at this path
    pub fn decision_default(&self) -> Self {
        self.descend(PathSegment::DecisionDefault)
    }

    fn descend(&self, branch: PathSegment) -> Self {
        let mut segments = Vec::with_capacity(self.segments.len() + 2);
        segments.extend_from_slice(&self.segments);
        segments.push(branch);
        segments.push(PathSegment::Index(0));
        Self { segments }
    }

    /// Dereference this path against a task tree
    pub fn resolve<'a>(&self, tasks: &'a [TaskNode]) -> Option<&'a TaskNode> {
        let mut sequence = tasks;
        let mut node = None;
        for segment in &self.segments {
            match segment {
                PathSegment::Index(index) => node = Some(sequence.get(*index)?),
                branch => sequence = branch_of(node?, branch)?,
            }
        }
        node
    }
}

fn branch_of<'a>(node: &'a TaskNode, segment: &PathSegment) -> Option<&'a [TaskNode]> {
    match (node, segment) {
        (TaskNode::Parallel(task), PathSegment::ParallelBranch(branch)) => {
            task.parallel_tasks.get(*branch).map(Vec::as_slice)
        }
        (TaskNode::Decision(task), PathSegment::DecisionCase(label)) => {
            task.decisions.get(label).map(Vec::as_slice)
        }
        (TaskNode::Decision(task), PathSegment::DecisionDefault) => Some(&task.default_decision),
        _ => None,
    }
}

impl fmt::Display for TreePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (position, segment) in self.segments.iter().enumerate() {
            if position > 0 {
                f.write_str(".")?;
            }
            match segment {
                PathSegment::Index(index) => write!(f, "tasks[{index}]")?,
                PathSegment::ParallelBranch(branch) => write!(f, "parallelTasks[{branch}]")?,
                PathSegment::DecisionCase(label) => write!(f, "decisions[{label:?}]")?,
                PathSegment::DecisionDefault => f.write_str("defaultDecision")?,
            }
        }
        Ok(())
    }
}

fn parent_kind(tasks: &[TaskNode], path: &TreePath) -> Option<TaskKind> {
    path.parent()
        .and_then(|parent| parent.resolve(tasks))
        .map(TaskNode::kind)
}

/// True when `path` addresses a node inside one branch of a `Parallel` node
pub fn is_inside_parallel_branch(tasks: &[TaskNode], path: &TreePath) -> bool {
    matches!(
        path.segments(),
        [.., PathSegment::ParallelBranch(_), PathSegment::Index(_)]
    ) && parent_kind(tasks, path) == Some(TaskKind::Parallel)
}

/// True when `path` addresses a node inside the default branch of a `Decision` node
pub fn is_inside_decision_default(tasks: &[TaskNode], path: &TreePath) -> bool {
    matches!(
        path.segments(),
        [.., PathSegment::DecisionDefault, PathSegment::Index(_)]
    ) && parent_kind(tasks, path) == Some(TaskKind::Decision)
}

/// True when `path` addresses a node inside a named case of a `Decision` node
pub fn is_inside_decision_case(tasks: &[TaskNode], path: &TreePath) -> bool {
    matches!(
        path.segments(),
        [.., PathSegment::DecisionCase(_), PathSegment::Index(_)]
    ) && parent_kind(tasks, path) == Some(TaskKind::Decision)
}
