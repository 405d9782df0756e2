//! Progression worker: one loop per update source plus shared collaborators

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use baton_durable::{
    CommandChannel, InMemoryBroker, InMemoryTaskStore, InMemoryTimerStore, InMemoryWorkflowStore,
    PollerConfig, Progression, ProgressionExecutor, StatusUpdateHandler, TaskDeadlines,
    TaskInstanceStore, TimerEventQueue, TimerHandler, TimerInstanceStore, UpdateHandler,
    UpdatePoller, UpdateQueue, UpdateSource, WorkflowInstanceStore,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

// =============================================================================
// WorkerConfig
// =============================================================================

/// Worker configuration
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Identifier attached to this worker's logs
    pub worker_id: String,
    /// Polling settings shared by every source loop
    pub poller: PollerConfig,
    /// How often in-memory timers are checked for expiry
    pub timer_tick: Duration,
    /// Deadlines armed for every scheduled task
    pub deadlines: TaskDeadlines,
    /// Definition to start once at boot
    pub definition_file: Option<PathBuf>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", Uuid::now_v7()),
            poller: PollerConfig::default(),
            timer_tick: Duration::from_millis(500),
            deadlines: TaskDeadlines::default(),
            definition_file: None,
        }
    }
}

impl WorkerConfig {
    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `BATON_WORKER_ID`: Worker id (default: "worker-<uuid>")
    /// - `BATON_BATCH_SIZE`: Messages per poll (default: 100)
    /// - `BATON_POLL_MIN_INTERVAL_MS` / `BATON_POLL_MAX_INTERVAL_MS`: Backoff bounds
    /// - `BATON_TIMER_TICK_MS`: Timer check interval (default: 500)
    /// - `BATON_ACK_TIMEOUT_MS`: Time to acknowledge a scheduled task (default: none)
    /// - `BATON_TASK_TIMEOUT_MS`: Time for a task to finish (default: none)
    /// - `BATON_DEFINITION_FILE`: Workflow definition JSON to start at boot
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from any key lookup; unparseable values fall back to defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let millis = |key: &str| {
            lookup(key)
                .and_then(|s| s.parse::<u64>().ok())
                .map(Duration::from_millis)
        };

        let mut poller = defaults.poller.clone();
        if let Some(size) = lookup("BATON_BATCH_SIZE").and_then(|s| s.parse().ok()) {
            poller = poller.with_batch_size(size);
        }
        if let Some(interval) = millis("BATON_POLL_MIN_INTERVAL_MS") {
            poller = poller.with_min_interval(interval);
        }
        if let Some(interval) = millis("BATON_POLL_MAX_INTERVAL_MS") {
            poller = poller.with_max_interval(interval);
        }

        let deadline = |key: &str| millis(key).and_then(|d| chrono::Duration::from_std(d).ok());
        let deadlines = TaskDeadlines {
            ack_timeout: deadline("BATON_ACK_TIMEOUT_MS"),
            timeout: deadline("BATON_TASK_TIMEOUT_MS"),
        };

        Self {
            worker_id: lookup("BATON_WORKER_ID").unwrap_or(defaults.worker_id),
            poller,
            timer_tick: millis("BATON_TIMER_TICK_MS").unwrap_or(defaults.timer_tick),
            deadlines,
            definition_file: lookup("BATON_DEFINITION_FILE").map(PathBuf::from),
        }
    }
}

// =============================================================================
// Collaborators
// =============================================================================

/// External systems the worker talks to
#[derive(Clone)]
pub struct Collaborators {
    pub queue: Arc<dyn UpdateQueue>,
    pub channel: Arc<dyn CommandChannel>,
    pub tasks: Arc<dyn TaskInstanceStore>,
    pub workflows: Arc<dyn WorkflowInstanceStore>,
    pub timers: Arc<dyn TimerInstanceStore>,
}

impl Collaborators {
    /// Wire everything to in-memory implementations
    ///
    /// The broker and timer store are also returned concretely: the broker for
    /// inspection, the timer store to drive with [`run_timer_ticker`].
    pub fn in_memory() -> (Self, Arc<InMemoryBroker>, Arc<InMemoryTimerStore>) {
        let broker = Arc::new(InMemoryBroker::new());
        let timers = Arc::new(InMemoryTimerStore::new());
        let collaborators = Self {
            queue: broker.clone(),
            channel: broker.clone(),
            tasks: Arc::new(InMemoryTaskStore::new()),
            workflows: Arc::new(InMemoryWorkflowStore::new()),
            timers: timers.clone(),
        };
        (collaborators, broker, timers)
    }
}

// =============================================================================
// ProgressionWorker
// =============================================================================

/// Runs the task, event and timer progression loops
///
/// The timer source has two loops: one for expirations reported by the timer
/// store and one for schedule requests arriving on the update queue.
pub struct ProgressionWorker {
    config: WorkerConfig,
    collaborators: Collaborators,
    progression: Arc<Progression>,
    shutdown_tx: watch::Sender<bool>,
}

impl ProgressionWorker {
    pub fn new(config: WorkerConfig, collaborators: Collaborators) -> Self {
        info!(
            worker_id = %config.worker_id,
            batch_size = config.poller.batch_size,
            "Creating progression worker"
        );

        let progression = Arc::new(
            Progression::new(
                collaborators.tasks.clone(),
                collaborators.workflows.clone(),
                collaborators.channel.clone(),
            )
            .with_timers(collaborators.timers.clone())
            .with_deadlines(config.deadlines),
        );
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            config,
            collaborators,
            progression,
            shutdown_tx,
        }
    }

    pub fn progression(&self) -> Arc<Progression> {
        self.progression.clone()
    }

    /// Receiver that flips to `true` on shutdown
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Start the workflow in `config.definition_file`, if one is set
    pub async fn start_configured_workflow(&self) -> Result<Option<Uuid>> {
        let Some(path) = &self.config.definition_file else {
            return Ok(None);
        };

        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let raw: serde_json::Value = serde_json::from_str(&text)
            .with_context(|| format!("{} is not valid JSON", path.display()))?;
        let input = raw
            .get("input")
            .cloned()
            .unwrap_or_else(|| serde_json::json!({}));
        let definition = raw.get("definition").unwrap_or(&raw);

        let workflow_id = self
            .progression
            .start_workflow_from_value(definition, input)
            .await
            .with_context(|| format!("Failed to start workflow from {}", path.display()))?;
        Ok(Some(workflow_id))
    }

    /// Spawn one executor per loop; each stops once [`Self::shutdown`] is called
    pub fn spawn_loops(&self) -> Vec<JoinHandle<()>> {
        info!(worker_id = %self.config.worker_id, "Starting progression loops");

        let status_handler: Arc<dyn UpdateHandler> =
            Arc::new(StatusUpdateHandler::new(self.progression.clone()));
        let timer_handler: Arc<dyn UpdateHandler> =
            Arc::new(TimerHandler::new(self.progression.clone()));
        let fired_timers: Arc<dyn UpdateQueue> =
            Arc::new(TimerEventQueue::new(self.collaborators.timers.watch()));
        let queue = &self.collaborators.queue;

        let loops = [
            (UpdateSource::Task, queue.clone(), status_handler.clone()),
            (UpdateSource::Event, queue.clone(), status_handler),
            (UpdateSource::Timer, queue.clone(), timer_handler.clone()),
            (UpdateSource::Timer, fired_timers, timer_handler),
        ];

        loops
            .into_iter()
            .map(|(source, queue, handler)| {
                let poller = UpdatePoller::new(
                    queue,
                    source,
                    self.config.poller.clone(),
                    self.shutdown_tx.subscribe(),
                );
                tokio::spawn(ProgressionExecutor::new(poller, handler).run())
            })
            .collect()
    }

    /// Run all source loops until [`Self::shutdown`] is called
    pub async fn run(&self) -> Result<()> {
        self.join_loops(self.spawn_loops()).await
    }

    /// Run all source loops until `signal` resolves, then stop them and wait
    /// for every in-flight batch to be committed
    pub async fn run_until(&self, signal: impl Future<Output = ()>) -> Result<()> {
        let loops = self.join_loops(self.spawn_loops());
        tokio::pin!(loops);

        tokio::select! {
            result = &mut loops => return result,
            _ = signal => {
                info!(worker_id = %self.config.worker_id, "Shutdown requested");
                self.shutdown();
            }
        }
        loops.await
    }

    async fn join_loops(&self, handles: Vec<JoinHandle<()>>) -> Result<()> {
        for result in futures::future::join_all(handles).await {
            result.context("Progression loop panicked")?;
        }
        info!(worker_id = %self.config.worker_id, "Progression worker stopped");
        Ok(())
    }

    /// Signal every loop to stop
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

/// Fire due in-memory timers every `tick` until shutdown
pub async fn run_timer_ticker(
    timers: Arc<InMemoryTimerStore>,
    tick: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(tick);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let fired = timers.fire_due(chrono::Utc::now());
                if fired > 0 {
                    debug!(fired, "Timers fired");
                }
            }
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    warn!("Shutdown sender dropped, stopping timer ticker");
                }
                break;
            }
        }
    }
}
