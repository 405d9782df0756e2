//! Applying status updates and scheduling follow-up tasks
//!
//! `Progression` is the only place that touches all collaborators at once:
//! it loads the task and its workflow, runs the state machine, persists the
//! result, and either schedules the next task or retires the workflow.

use std::sync::Arc;

use baton_core::{
    find_task_path, get_next_task_path, TaskInstance, TaskOutputs, TaskStateMachine, TaskStatus,
    TaskStatusUpdate, TraversalError, TreePath, WorkflowDefinition, WorkflowInstance,
};
use chrono::Duration;
use futures::future::try_join_all;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::executor::ExecutorError;
use crate::persistence::{
    StoreError, TaskInstanceStore, TimerData, TimerInstanceStore, TimerSchedule, TimerUpdate,
    WorkflowInstanceStore,
};
use crate::queue::{CommandChannel, DispatchRequest};

/// Outcome of applying one update
#[derive(Debug, Clone, PartialEq)]
pub enum Progress {
    /// The task changed status; nothing else happened
    Updated { task_id: Uuid, status: TaskStatus },

    /// The task completed and the next task was scheduled
    Dispatched {
        completed: Uuid,
        next: TaskInstance,
        path: TreePath,
    },

    /// The task completed and it was the workflow's last one
    WorkflowFinished { workflow_id: Uuid },
}

/// Deadlines armed for every task when it is scheduled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskDeadlines {
    /// Time a worker has to acknowledge (INPROGRESS) the task
    pub ack_timeout: Option<Duration>,
    /// Time the task has to reach a terminal status
    pub timeout: Option<Duration>,
}

impl TaskDeadlines {
    pub fn is_empty(&self) -> bool {
        self.ack_timeout.is_none() && self.timeout.is_none()
    }

    /// Timer for a task scheduled now, or `None` when nothing is armed
    pub fn timer_for(&self, task_id: Uuid) -> Option<TimerData> {
        if self.is_empty() {
            return None;
        }
        let mut timer = TimerData::new(task_id);
        if let Some(ack_timeout) = self.ack_timeout {
            timer = timer.with_ack_timeout(ack_timeout);
        }
        if let Some(timeout) = self.timeout {
            timer = timer.with_timeout(timeout);
        }
        Some(timer)
    }
}

/// Drives workflows forward one update at a time
pub struct Progression {
    tasks: Arc<dyn TaskInstanceStore>,
    workflows: Arc<dyn WorkflowInstanceStore>,
    timers: Option<Arc<dyn TimerInstanceStore>>,
    deadlines: TaskDeadlines,
    channel: Arc<dyn CommandChannel>,
    state_machine: TaskStateMachine,
}

impl Progression {
    pub fn new(
        tasks: Arc<dyn TaskInstanceStore>,
        workflows: Arc<dyn WorkflowInstanceStore>,
        channel: Arc<dyn CommandChannel>,
    ) -> Self {
        Self {
            tasks,
            workflows,
            timers: None,
            deadlines: TaskDeadlines::default(),
            channel,
            state_machine: TaskStateMachine::default(),
        }
    }

    /// Keep task timers in sync with status changes
    pub fn with_timers(mut self, timers: Arc<dyn TimerInstanceStore>) -> Self {
        self.timers = Some(timers);
        self
    }

    /// Arm these deadlines for every scheduled task; needs [`Self::with_timers`]
    pub fn with_deadlines(mut self, deadlines: TaskDeadlines) -> Self {
        self.deadlines = deadlines;
        self
    }

    pub fn with_state_machine(mut self, state_machine: TaskStateMachine) -> Self {
        self.state_machine = state_machine;
        self
    }

    pub fn tasks(&self) -> &Arc<dyn TaskInstanceStore> {
        &self.tasks
    }

    pub fn channel(&self) -> &Arc<dyn CommandChannel> {
        &self.channel
    }

    /// Create a workflow instance and schedule its first task
    ///
    /// Returns the new workflow id.
    #[instrument(
        skip(self, definition, input),
        fields(workflow = %definition.name, rev = definition.rev)
    )]
    pub async fn start_workflow(
        &self,
        definition: WorkflowDefinition,
        input: Value,
    ) -> Result<Uuid, ExecutorError> {
        let mut workflow = WorkflowInstance::new(definition, input);
        self.workflows.set(&workflow).await?;

        self.start_task(&mut workflow, &TreePath::root(0), TaskOutputs::new())
            .await?;

        info!(workflow_id = %workflow.workflow_id, "workflow started");
        Ok(workflow.workflow_id)
    }

    /// Validate a raw definition, then start it
    ///
    /// Nothing is persisted when validation fails.
    pub async fn start_workflow_from_value(
        &self,
        raw: &Value,
        input: Value,
    ) -> Result<Uuid, ExecutorError> {
        let definition = WorkflowDefinition::from_value(raw)?;
        self.start_workflow(definition, input).await
    }

    /// Apply one status update
    ///
    /// The updated task is persisted and announced before any follow-up work.
    /// If scheduling the next task fails afterwards, the update stays applied.
    #[instrument(skip(self, update), fields(task_id = %update.task_id, status = %update.status))]
    pub async fn apply_update(&self, update: TaskStatusUpdate) -> Result<Progress, ExecutorError> {
        let mut task = self.tasks.get(update.task_id).await?;
        let mut workflow = self.workflows.get(task.workflow_id).await?;

        self.state_machine.apply_update(&mut task, &update)?;
        self.tasks.set(&task).await?;
        self.channel.publish(&update).await?;
        self.sync_timer(&task).await;

        debug!(reference = %task.task_reference_name, "task updated");

        if !task.status.is_terminal_success() {
            return Ok(Progress::Updated {
                task_id: task.task_id,
                status: task.status,
            });
        }

        let tree = &workflow.workflow_definition.tasks;
        let completed = find_task_path(&task.task_reference_name, tree).ok_or_else(|| {
            TraversalError::TaskReferenceNotFound(task.task_reference_name.clone())
        })?;

        match get_next_task_path(tree, &completed)? {
            Some(path) => {
                let context = self.task_outputs(&workflow).await?;
                let next = self.start_task(&mut workflow, &path, context).await?;
                Ok(Progress::Dispatched {
                    completed: task.task_id,
                    next,
                    path,
                })
            }
            None => {
                self.workflows.destroy(workflow.workflow_id).await?;
                info!(workflow_id = %workflow.workflow_id, "workflow finished");
                Ok(Progress::WorkflowFinished {
                    workflow_id: workflow.workflow_id,
                })
            }
        }
    }

    /// Schedule the node at `path` of `workflow`
    ///
    /// The task is persisted before the workflow that references it. Both are
    /// persisted, and the task's deadlines armed, before workers are told about
    /// the task.
    #[instrument(
        skip(self, workflow, context),
        fields(workflow_id = %workflow.workflow_id, path = %path)
    )]
    pub async fn start_task(
        &self,
        workflow: &mut WorkflowInstance,
        path: &TreePath,
        context: TaskOutputs,
    ) -> Result<TaskInstance, ExecutorError> {
        let node = path
            .resolve(&workflow.workflow_definition.tasks)
            .cloned()
            .ok_or_else(|| TraversalError::MalformedTaskPath(path.clone()))?;

        let task = TaskInstance::scheduled(workflow.workflow_id, &node);
        workflow
            .task_refs
            .insert(task.task_reference_name.clone(), task.task_id);

        self.tasks.set(&task).await?;
        self.workflows.set(workflow).await?;
        self.arm_timer(&task).await;
        self.channel
            .dispatch(DispatchRequest {
                task: task.clone(),
                node,
                context,
            })
            .await?;

        debug!(task_id = %task.task_id, reference = %task.task_reference_name, "task dispatched");
        Ok(task)
    }

    /// Arm the deadlines requested on the timer source
    #[instrument(skip(self, schedule), fields(task_id = %schedule.task_id))]
    pub async fn schedule_timer(
        &self,
        schedule: TimerSchedule,
    ) -> Result<TimerData, ExecutorError> {
        let timers = self
            .timers
            .as_ref()
            .ok_or_else(|| StoreError::Unavailable("no timer store configured".to_string()))?;
        let timer = timers.create(schedule.into_timer()).await?;
        debug!("timer scheduled");
        Ok(timer)
    }

    /// Create the configured deadlines for a freshly scheduled task
    ///
    /// Like [`Self::sync_timer`], failures are logged and never block dispatch.
    async fn arm_timer(&self, task: &TaskInstance) {
        let (Some(timers), Some(timer)) = (&self.timers, self.deadlines.timer_for(task.task_id))
        else {
            return;
        };
        if let Err(e) = timers.create(timer).await {
            warn!(task_id = %task.task_id, error = %e, "failed to arm task timer");
        }
    }

    /// Outputs of every task spawned so far, keyed by reference name
    async fn task_outputs(&self, workflow: &WorkflowInstance) -> Result<TaskOutputs, StoreError> {
        let tasks = try_join_all(workflow.task_refs.values().map(|id| self.tasks.get(*id))).await?;
        Ok(tasks
            .into_iter()
            .map(|task| (task.task_reference_name, task.output))
            .collect())
    }

    /// Disarm or drop the task's timer after a status change
    ///
    /// Timer maintenance never fails an update; problems are logged.
    async fn sync_timer(&self, task: &TaskInstance) {
        let Some(timers) = &self.timers else {
            return;
        };

        let result = match task.status {
            TaskStatus::InProgress => timers
                .update(TimerUpdate::acknowledged(task.task_id))
                .await
                .map(|_| ()),
            status if status.is_terminal() => timers.delete(task.task_id).await,
            _ => Ok(()),
        };

        match result {
            Ok(()) | Err(StoreError::TimerNotFound(_)) => {}
            Err(e) => warn!(task_id = %task.task_id, error = %e, "failed to sync task timer"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{InMemoryTaskStore, InMemoryTimerStore, InMemoryWorkflowStore};
    use crate::queue::InMemoryBroker;
    use baton_core::StateError;
    use serde_json::json;

    struct Fixture {
        tasks: Arc<InMemoryTaskStore>,
        workflows: Arc<InMemoryWorkflowStore>,
        timers: Arc<InMemoryTimerStore>,
        broker: Arc<InMemoryBroker>,
        progression: Progression,
    }

    fn fixture() -> Fixture {
        let tasks = Arc::new(InMemoryTaskStore::new());
        let workflows = Arc::new(InMemoryWorkflowStore::new());
        let timers = Arc::new(InMemoryTimerStore::new());
        let broker = Arc::new(InMemoryBroker::new());
        let progression = Progression::new(tasks.clone(), workflows.clone(), broker.clone())
            .with_timers(timers.clone());
        Fixture {
            tasks,
            workflows,
            timers,
            broker,
            progression,
        }
    }

    fn two_step() -> WorkflowDefinition {
        WorkflowDefinition::from_value(&json!({
            "name": "two-step", "rev": 1,
            "tasks": [
                { "name": "fetch", "taskReferenceName": "fetch", "type": "TASK" },
                { "name": "store", "taskReferenceName": "store", "type": "TASK" }
            ]
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_start_workflow_dispatches_first_task() {
        let f = fixture();
        let workflow_id = f
            .progression
            .start_workflow(two_step(), json!({"user": 1}))
            .await
            .unwrap();

        let dispatched = f.broker.dispatched();
        assert_eq!(dispatched.len(), 1);
        assert_eq!(dispatched[0].task.task_reference_name, "fetch");
        assert_eq!(dispatched[0].task.status, TaskStatus::Scheduled);
        assert!(dispatched[0].context.is_empty());

        let stored = f.workflows.get(workflow_id).await.unwrap();
        assert_eq!(stored.task_refs.len(), 1);
        assert_eq!(stored.input, json!({"user": 1}));
        assert_eq!(f.tasks.len(), 1);
    }

    #[tokio::test]
    async fn test_completion_dispatches_next_with_context() {
        let f = fixture();
        f.progression.start_workflow(two_step(), json!({})).await.unwrap();
        let first = f.broker.take_dispatched().remove(0).task;

        let progress = f
            .progression
            .apply_update(TaskStatusUpdate::new(first.task_id, TaskStatus::InProgress))
            .await
            .unwrap();
        assert!(matches!(
            progress,
            Progress::Updated {
                status: TaskStatus::InProgress,
                ..
            }
        ));

        let progress = f
            .progression
            .apply_update(
                TaskStatusUpdate::new(first.task_id, TaskStatus::Completed)
                    .with_output(json!({"rows": 3})),
            )
            .await
            .unwrap();

        let Progress::Dispatched { next, path, .. } = progress else {
            panic!("expected dispatch, got {progress:?}");
        };
        assert_eq!(path, TreePath::root(1));
        assert_eq!(next.task_reference_name, "store");

        let dispatched = f.broker.dispatched();
        assert_eq!(dispatched[0].context.get("fetch"), Some(&json!({"rows": 3})));
        assert_eq!(f.broker.published().len(), 2);
    }

    #[tokio::test]
    async fn test_last_task_destroys_workflow() {
        let f = fixture();
        let definition = WorkflowDefinition::from_value(&json!({
            "name": "single", "rev": 1,
            "tasks": [{ "name": "only", "taskReferenceName": "only", "type": "TASK" }]
        }))
        .unwrap();
        let workflow_id = f
            .progression
            .start_workflow(definition, json!({}))
            .await
            .unwrap();
        let task = f.broker.take_dispatched().remove(0).task;

        f.progression
            .apply_update(TaskStatusUpdate::new(task.task_id, TaskStatus::InProgress))
            .await
            .unwrap();
        let progress = f
            .progression
            .apply_update(TaskStatusUpdate::new(task.task_id, TaskStatus::Completed))
            .await
            .unwrap();

        assert_eq!(progress, Progress::WorkflowFinished { workflow_id });
        assert!(f.workflows.is_empty());
        assert!(f.broker.dispatched().is_empty());
    }

    #[tokio::test]
    async fn test_illegal_transition_leaves_task_untouched() {
        let f = fixture();
        f.progression.start_workflow(two_step(), json!({})).await.unwrap();
        let task = f.broker.take_dispatched().remove(0).task;

        let err = f
            .progression
            .apply_update(TaskStatusUpdate::new(task.task_id, TaskStatus::Completed))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ExecutorError::State(StateError::IllegalTransition {
                from: TaskStatus::Scheduled,
                to: TaskStatus::Completed
            })
        ));
        assert!(!err.is_corruption());
        assert_eq!(
            f.tasks.get(task.task_id).await.unwrap().status,
            TaskStatus::Scheduled
        );
        assert!(f.broker.published().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_raw_definition_persists_nothing() {
        let f = fixture();
        let err = f
            .progression
            .start_workflow_from_value(&json!({"name": "broken", "rev": 1, "tasks": []}), json!({}))
            .await
            .unwrap_err();

        let ExecutorError::Definition(definition) = err else {
            panic!("expected definition error, got {err:?}");
        };
        assert_eq!(
            definition.errors(),
            ["workflowDefinition.tasks cannot be empty".to_string()]
        );
        assert!(f.workflows.is_empty());
        assert!(f.broker.dispatched().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_task_is_store_error() {
        let f = fixture();
        let err = f
            .progression
            .apply_update(TaskStatusUpdate::new(Uuid::now_v7(), TaskStatus::InProgress))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::Store(StoreError::TaskNotFound(_))));
    }

    #[tokio::test]
    async fn test_timer_follows_status() {
        let mut f = fixture();
        f.progression = f.progression.with_deadlines(TaskDeadlines {
            ack_timeout: Some(Duration::seconds(5)),
            timeout: Some(Duration::seconds(60)),
        });
        f.progression.start_workflow(two_step(), json!({})).await.unwrap();
        let task = f.broker.take_dispatched().remove(0).task;
        let armed = f.timers.get(task.task_id).await.unwrap();
        assert!(armed.ack_timeout_at.is_some());

        f.progression
            .apply_update(TaskStatusUpdate::new(task.task_id, TaskStatus::InProgress))
            .await
            .unwrap();
        let timer = f.timers.get(task.task_id).await.unwrap();
        assert!(timer.ack_timeout_at.is_none());
        assert!(timer.timeout_at.is_some());

        f.progression
            .apply_update(TaskStatusUpdate::new(task.task_id, TaskStatus::Completed))
            .await
            .unwrap();
        assert!(f.timers.get(task.task_id).await.is_err());
        // the next task gets its own deadlines
        assert_eq!(f.timers.len(), 1);
    }

    #[tokio::test]
    async fn test_decision_node_is_dispatched_whole() {
        let f = fixture();
        let definition = WorkflowDefinition::from_value(&json!({
            "name": "branching", "rev": 1,
            "tasks": [
                { "name": "check", "taskReferenceName": "check", "type": "TASK" },
                {
                    "name": "route", "taskReferenceName": "route", "type": "DECISION",
                    "decisions": {
                        "yes": [{ "name": "y", "taskReferenceName": "y", "type": "TASK" }]
                    },
                    "defaultDecision": [{ "name": "n", "taskReferenceName": "n", "type": "TASK" }]
                }
            ]
        }))
        .unwrap();
        f.progression.start_workflow(definition, json!({})).await.unwrap();
        let task = f.broker.take_dispatched().remove(0).task;

        f.progression
            .apply_update(TaskStatusUpdate::new(task.task_id, TaskStatus::InProgress))
            .await
            .unwrap();
        f.progression
            .apply_update(TaskStatusUpdate::new(task.task_id, TaskStatus::Completed))
            .await
            .unwrap();

        let dispatched = f.broker.dispatched();
        assert_eq!(dispatched.len(), 1);
        assert_eq!(dispatched[0].node.reference_name(), "route");
        assert_eq!(dispatched[0].task.kind, baton_core::TaskKind::Decision);
    }

    #[tokio::test]
    async fn test_no_deadlines_arm_no_timer() {
        let f = fixture();
        f.progression.start_workflow(two_step(), json!({})).await.unwrap();
        assert_eq!(f.broker.dispatched().len(), 1);
        assert!(f.timers.is_empty());
    }

    #[tokio::test]
    async fn test_deadlines_armed_before_dispatch_for_every_task() {
        let mut f = fixture();
        f.progression = f.progression.with_deadlines(TaskDeadlines {
            ack_timeout: Some(Duration::seconds(5)),
            timeout: None,
        });
        f.progression.start_workflow(two_step(), json!({})).await.unwrap();
        let first = f.broker.take_dispatched().remove(0).task;
        assert!(f.timers.get(first.task_id).await.is_ok());

        for status in [TaskStatus::InProgress, TaskStatus::Completed] {
            f.progression
                .apply_update(TaskStatusUpdate::new(first.task_id, status))
                .await
                .unwrap();
        }
        let second = f.broker.take_dispatched().remove(0).task;
        let timer = f.timers.get(second.task_id).await.unwrap();
        assert!(timer.ack_timeout_at.is_some());
        assert!(timer.timeout_at.is_none());
        assert!(matches!(
            f.timers.get(first.task_id).await,
            Err(StoreError::TimerNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_schedule_timer_requires_timer_store() {
        let tasks = Arc::new(InMemoryTaskStore::new());
        let workflows = Arc::new(InMemoryWorkflowStore::new());
        let broker = Arc::new(InMemoryBroker::new());
        let progression = Progression::new(tasks, workflows, broker);
        let schedule = TimerSchedule {
            task_id: Uuid::now_v7(),
            delay_second: Some(1),
            ack_timeout_second: None,
            timeout_second: None,
        };
        let err = progression.schedule_timer(schedule).await.unwrap_err();
        assert!(matches!(err, ExecutorError::Store(StoreError::Unavailable(_))));
    }

    #[test]
    fn test_empty_deadlines_build_no_timer() {
        assert!(TaskDeadlines::default().timer_for(Uuid::now_v7()).is_none());
        let deadlines = TaskDeadlines {
            ack_timeout: None,
            timeout: Some(Duration::minutes(1)),
        };
        let timer = deadlines.timer_for(Uuid::now_v7()).unwrap();
        assert!(timer.ack_timeout_at.is_none());
        assert!(timer.timeout_at.is_some());
    }
}
