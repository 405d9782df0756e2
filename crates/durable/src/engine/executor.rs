//! Progression loop
//!
//! One `ProgressionExecutor` runs per update source. Each cycle it:
//! - Polls a bounded batch of messages
//! - Hands every message to its handler, in order
//! - Commits the batch once every message was processed
//!
//! A message that fails is logged and skipped; it never blocks the rest of the
//! batch and is not redelivered.

use std::sync::Arc;

use baton_core::{DefinitionError, StateError, TraversalError};
use tracing::{debug, error, info, instrument, warn};

use super::handler::UpdateHandler;
use crate::persistence::StoreError;
use crate::queue::QueueError;
use crate::worker::{PollerError, UpdatePoller};

/// Errors from processing a single update
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// Store error
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Queue or command channel error
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    /// Status change rejected
    #[error("state error: {0}")]
    State(#[from] StateError),

    /// Task tree lookup failed
    #[error("traversal error: {0}")]
    Traversal(#[from] TraversalError),

    /// Workflow definition rejected
    #[error("{0}")]
    Definition(#[from] DefinitionError),

    /// Message could not be decoded
    #[error("invalid message: {0}")]
    InvalidMessage(#[from] serde_json::Error),
}

impl ExecutorError {
    /// Whether the error points at inconsistent stored state rather than a bad update
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::State(StateError::InvalidCurrentState(_))
                | Self::Traversal(TraversalError::MalformedTaskPath(_))
        )
    }
}

/// What one cycle did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub polled: usize,
    pub applied: usize,
    pub failed: usize,
}

/// Poll/process/commit loop for one update source
pub struct ProgressionExecutor {
    poller: UpdatePoller,
    handler: Arc<dyn UpdateHandler>,
}

impl ProgressionExecutor {
    pub fn new(poller: UpdatePoller, handler: Arc<dyn UpdateHandler>) -> Self {
        Self { poller, handler }
    }

    /// Process one batch
    #[instrument(skip(self), fields(source = %self.poller.source()))]
    pub async fn run_cycle(&mut self) -> Result<CycleReport, PollerError> {
        let messages = self.poller.poll().await?;
        let mut report = CycleReport {
            polled: messages.len(),
            ..CycleReport::default()
        };

        for message in messages {
            match self.handler.handle(message).await {
                Ok(()) => report.applied += 1,
                Err(e) if e.is_corruption() => {
                    report.failed += 1;
                    error!(error = %e, corruption = true, "update hit inconsistent workflow state");
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(error = %e, "failed to process update");
                }
            }
        }

        self.poller.commit().await?;

        if report.polled > 0 {
            debug!(
                polled = report.polled,
                applied = report.applied,
                failed = report.failed,
                "batch committed"
            );
        }
        Ok(report)
    }

    /// Run until shutdown is signaled
    ///
    /// Full batches are followed immediately by the next poll; empty batches
    /// and queue failures wait out the poller's backoff.
    pub async fn run(mut self) {
        let source = self.poller.source();
        info!(%source, "progression loop started");

        loop {
            if self.poller.is_shutdown() {
                break;
            }

            let idle = match self.run_cycle().await {
                Ok(report) => report.polled == 0,
                Err(PollerError::Shutdown) => break,
                Err(e) => {
                    error!(%source, error = %e, "poll cycle failed");
                    true
                }
            };

            if idle {
                if self.poller.wait().await {
                    break;
                }
            } else {
                tokio::task::yield_now().await;
            }
        }

        info!(%source, "progression loop stopped");
    }
}
