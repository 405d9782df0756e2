//! Update polling with exponential backoff
//!
//! Busy sources are polled back to back; idle ones back off up to a ceiling.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, instrument, trace};

use crate::queue::{QueueError, UpdateQueue, UpdateSource};

/// Polling configuration
#[derive(Debug, Clone, PartialEq)]
pub struct PollerConfig {
    /// Minimum poll interval (when updates are flowing)
    pub min_interval: Duration,

    /// Maximum poll interval (when idle)
    pub max_interval: Duration,

    /// Backoff multiplier when a poll comes back empty
    pub backoff_multiplier: f64,

    /// Maximum messages taken per poll
    pub batch_size: usize,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(5),
            backoff_multiplier: 1.5,
            batch_size: 100,
        }
    }
}

impl PollerConfig {
    /// Create a new poller configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set minimum poll interval
    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    /// Set maximum poll interval
    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    /// Set backoff multiplier
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier.max(1.0);
        self
    }

    /// Set batch size
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }
}

/// Update poller with adaptive backoff
///
/// Polls one source of an [`UpdateQueue`]. Backs off exponentially while the
/// source is empty or failing and resets to the minimum interval as soon as
/// messages arrive.
pub struct UpdatePoller {
    queue: Arc<dyn UpdateQueue>,
    source: UpdateSource,
    config: PollerConfig,
    current_interval: Duration,
    shutdown_rx: watch::Receiver<bool>,
}

impl UpdatePoller {
    /// Create a new update poller
    pub fn new(
        queue: Arc<dyn UpdateQueue>,
        source: UpdateSource,
        config: PollerConfig,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            queue,
            source,
            current_interval: config.min_interval,
            config,
            shutdown_rx,
        }
    }

    pub fn source(&self) -> UpdateSource {
        self.source
    }

    /// Poll the next batch
    ///
    /// Returns the messages and updates internal backoff state.
    #[instrument(skip(self), fields(source = %self.source))]
    pub async fn poll(&mut self) -> Result<Vec<Value>, PollerError> {
        if *self.shutdown_rx.borrow() {
            debug!("Poller shutdown requested");
            return Err(PollerError::Shutdown);
        }

        let messages = match self.queue.poll(self.source, self.config.batch_size).await {
            Ok(messages) => messages,
            Err(e) => {
                self.increase_backoff();
                return Err(e.into());
            }
        };

        if messages.is_empty() {
            self.increase_backoff();
            trace!(
                interval_ms = self.current_interval.as_millis(),
                "No updates found, backing off"
            );
        } else {
            self.reset_backoff();
            debug!(count = messages.len(), "Polled updates");
        }

        Ok(messages)
    }

    /// Acknowledge everything polled so far
    pub async fn commit(&self) -> Result<(), PollerError> {
        self.queue.commit(self.source).await?;
        Ok(())
    }

    /// Wait for the current backoff interval
    ///
    /// Returns `true` if shutdown was signaled while waiting.
    pub async fn wait(&mut self) -> bool {
        let mut shutdown_rx = self.shutdown_rx.clone();
        tokio::select! {
            _ = tokio::time::sleep(self.current_interval) => false,
            _ = shutdown_rx.changed() => {
                debug!("Shutdown signal received during wait");
                true
            }
        }
    }

    /// Get the current poll interval
    pub fn current_interval(&self) -> Duration {
        self.current_interval
    }

    /// Check if shutdown has been requested
    pub fn is_shutdown(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    fn reset_backoff(&mut self) {
        self.current_interval = self.config.min_interval;
    }

    fn increase_backoff(&mut self) {
        let new_interval = Duration::from_secs_f64(
            self.current_interval.as_secs_f64() * self.config.backoff_multiplier,
        );
        self.current_interval = new_interval.min(self.config.max_interval);
    }
}

/// Poller errors
#[derive(Debug, thiserror::Error)]
pub enum PollerError {
    /// Queue error
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    /// Worker shutdown
    #[error("worker is shutting down")]
    Shutdown,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::InMemoryBroker;
    use serde_json::json;

    fn poller(broker: Arc<InMemoryBroker>) -> (UpdatePoller, watch::Sender<bool>) {
        let (tx, rx) = watch::channel(false);
        let config = PollerConfig::new()
            .with_min_interval(Duration::from_millis(100))
            .with_max_interval(Duration::from_millis(400))
            .with_backoff_multiplier(2.0);
        (UpdatePoller::new(broker, UpdateSource::Task, config, rx), tx)
    }

    #[test]
    fn test_default_config() {
        let config = PollerConfig::default();
        assert_eq!(config.min_interval, Duration::from_millis(100));
        assert_eq!(config.max_interval, Duration::from_secs(5));
        assert_eq!(config.backoff_multiplier, 1.5);
        assert_eq!(config.batch_size, 100);
    }

    #[test]
    fn test_config_builder_clamps() {
        let config = PollerConfig::new()
            .with_backoff_multiplier(0.5)
            .with_batch_size(0);

        assert_eq!(config.backoff_multiplier, 1.0);
        assert_eq!(config.batch_size, 1);
    }

    #[tokio::test]
    async fn test_backoff_grows_and_resets() {
        let broker = Arc::new(InMemoryBroker::new());
        let (mut poller, _tx) = poller(broker.clone());

        poller.poll().await.unwrap();
        assert_eq!(poller.current_interval(), Duration::from_millis(200));
        poller.poll().await.unwrap();
        poller.poll().await.unwrap();
        assert_eq!(poller.current_interval(), Duration::from_millis(400));

        broker.push(UpdateSource::Task, json!({}));
        assert_eq!(poller.poll().await.unwrap().len(), 1);
        assert_eq!(poller.current_interval(), Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_poll_after_shutdown() {
        let broker = Arc::new(InMemoryBroker::new());
        let (mut poller, tx) = poller(broker);
        tx.send(true).unwrap();

        assert!(poller.is_shutdown());
        assert!(matches!(poller.poll().await, Err(PollerError::Shutdown)));
    }

    #[tokio::test]
    async fn test_wait_returns_on_shutdown() {
        let broker = Arc::new(InMemoryBroker::new());
        let (mut poller, tx) = poller(broker);

        let waiter = tokio::spawn(async move { poller.wait().await });
        tx.send(true).unwrap();
        assert!(waiter.await.unwrap());
    }
}
