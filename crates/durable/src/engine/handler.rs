//! Per-source message handlers

use std::sync::Arc;

use async_trait::async_trait;
use baton_core::{TaskStatus, TaskStatusUpdate};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::executor::ExecutorError;
use super::progression::Progression;
use crate::persistence::{TimerEvent, TimerKind, TimerSchedule};

/// Turns one raw queue message into progression work
#[async_trait]
pub trait UpdateHandler: Send + Sync + 'static {
    async fn handle(&self, message: Value) -> Result<(), ExecutorError>;
}

/// Handles [`TaskStatusUpdate`] messages from task and event sources
pub struct StatusUpdateHandler {
    progression: Arc<Progression>,
}

impl StatusUpdateHandler {
    pub fn new(progression: Arc<Progression>) -> Self {
        Self { progression }
    }
}

#[async_trait]
impl UpdateHandler for StatusUpdateHandler {
    async fn handle(&self, message: Value) -> Result<(), ExecutorError> {
        let update: TaskStatusUpdate = serde_json::from_value(message)?;
        self.progression.apply_update(update).await?;
        Ok(())
    }
}

/// Messages carried on the timer source
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TimerMessage {
    Fired(TimerEvent),
    Schedule(TimerSchedule),
}

/// Handles the timer source
///
/// Deadline expirations become ordinary status updates; a finished delay asks
/// workers to pick the task up again. Schedule requests arm a new timer.
pub struct TimerHandler {
    progression: Arc<Progression>,
}

impl TimerHandler {
    pub fn new(progression: Arc<Progression>) -> Self {
        Self { progression }
    }
}

#[async_trait]
impl UpdateHandler for TimerHandler {
    async fn handle(&self, message: Value) -> Result<(), ExecutorError> {
        let message: TimerMessage = serde_json::from_value(message)?;
        let event = match message {
            TimerMessage::Fired(event) => event,
            TimerMessage::Schedule(schedule) => {
                self.progression.schedule_timer(schedule).await?;
                return Ok(());
            }
        };
        debug!(task_id = %event.task_id, kind = %event.kind, "handling timer");

        let status = match event.kind {
            TimerKind::Timeout => TaskStatus::Timeout,
            TimerKind::AckTimeout => TaskStatus::AckTimeout,
            TimerKind::Delay => {
                let task = self.progression.tasks().get(event.task_id).await?;
                self.progression.channel().reload(&task).await?;
                return Ok(());
            }
        };

        self.progression
            .apply_update(TaskStatusUpdate::new(event.task_id, status))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{
        InMemoryTaskStore, InMemoryTimerStore, InMemoryWorkflowStore, TaskInstanceStore,
        TimerInstanceStore,
    };
    use crate::queue::InMemoryBroker;
    use baton_core::WorkflowDefinition;
    use serde_json::json;

    fn setup() -> (Arc<InMemoryTaskStore>, Arc<InMemoryBroker>, Arc<Progression>) {
        let tasks = Arc::new(InMemoryTaskStore::new());
        let broker = Arc::new(InMemoryBroker::new());
        let progression = Arc::new(Progression::new(
            tasks.clone(),
            Arc::new(InMemoryWorkflowStore::new()),
            broker.clone(),
        ));
        (tasks, broker, progression)
    }

    fn definition() -> WorkflowDefinition {
        WorkflowDefinition::from_value(&json!({
            "name": "wf", "rev": 1,
            "tasks": [{ "name": "t", "taskReferenceName": "t", "type": "TASK" }]
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_malformed_message_is_invalid() {
        let (_, _, progression) = setup();
        let handler = StatusUpdateHandler::new(progression);

        let err = handler.handle(json!({"status": "BOGUS"})).await.unwrap_err();
        assert!(matches!(err, ExecutorError::InvalidMessage(_)));
    }

    #[tokio::test]
    async fn test_status_update_applies() {
        let (tasks, broker, progression) = setup();
        progression.start_workflow(definition(), json!({})).await.unwrap();
        let task = broker.take_dispatched().remove(0).task;

        StatusUpdateHandler::new(progression)
            .handle(json!({"taskId": task.task_id, "status": "INPROGRESS"}))
            .await
            .unwrap();
        assert_eq!(
            tasks.get(task.task_id).await.unwrap().status,
            TaskStatus::InProgress
        );
    }

    #[tokio::test]
    async fn test_ack_timeout_marks_task() {
        let (tasks, broker, progression) = setup();
        progression.start_workflow(definition(), json!({})).await.unwrap();
        let task = broker.take_dispatched().remove(0).task;

        TimerHandler::new(progression)
            .handle(json!({"type": "ACK_TIMEOUT", "taskId": task.task_id}))
            .await
            .unwrap();
        assert_eq!(
            tasks.get(task.task_id).await.unwrap().status,
            TaskStatus::AckTimeout
        );
    }

    #[tokio::test]
    async fn test_delay_reloads_task() {
        let (_, broker, progression) = setup();
        progression.start_workflow(definition(), json!({})).await.unwrap();
        let task = broker.take_dispatched().remove(0).task;

        TimerHandler::new(progression)
            .handle(json!({"type": "DELAY", "taskId": task.task_id}))
            .await
            .unwrap();
        let reloaded = broker.reloaded();
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded[0].task_id, task.task_id);
        assert!(broker.published().is_empty());
    }

    #[tokio::test]
    async fn test_timeout_of_scheduled_task_is_rejected() {
        let (_, broker, progression) = setup();
        progression.start_workflow(definition(), json!({})).await.unwrap();
        let task = broker.take_dispatched().remove(0).task;

        // SCHEDULED may only time out on acknowledgement
        let err = TimerHandler::new(progression)
            .handle(json!({"type": "TIMEOUT", "taskId": task.task_id}))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::State(_)));
    }

    #[tokio::test]
    async fn test_schedule_request_arms_timer() {
        let timers = Arc::new(InMemoryTimerStore::new());
        let broker = Arc::new(InMemoryBroker::new());
        let progression = Arc::new(
            Progression::new(
                Arc::new(InMemoryTaskStore::new()),
                Arc::new(InMemoryWorkflowStore::new()),
                broker.clone(),
            )
            .with_timers(timers.clone()),
        );
        progression.start_workflow(definition(), json!({})).await.unwrap();
        let task = broker.take_dispatched().remove(0).task;

        TimerHandler::new(progression)
            .handle(json!({"taskId": task.task_id, "delaySecond": 30, "timeoutSecond": 600}))
            .await
            .unwrap();
        let timer = timers.get(task.task_id).await.unwrap();
        assert!(timer.delay_until.is_some());
        assert!(timer.timeout_at.is_some());
        assert!(timer.ack_timeout_at.is_none());
    }

    #[tokio::test]
    async fn test_unknown_timer_message_is_invalid() {
        let (_, _, progression) = setup();
        let err = TimerHandler::new(progression)
            .handle(json!({"taskId": uuid::Uuid::now_v7(), "delayMinutes": 3}))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::InvalidMessage(_)));
    }
}
