// Result publishing - sends verdicts (and optional fault records) to queues.
//
// The Publisher trait is the only thing that touches the broker, so the
// review and routing code can be driven in tests with RecordingPublisher.

pub mod recording;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{error, info};

use crate::events::{FaultEvent, VerdictEvent};

pub use recording::RecordingPublisher;

/// Sends an already-encoded message to a named queue.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, queue: &str, payload: &[u8]) -> Result<()>;
}

/// Publishes review results to the posts queue.
///
/// Publishing is fire-and-forget from the caller's point of view: failures
/// are logged and reported as `false`, never raised.
pub struct ResultPublisher {
    sink: Arc<dyn Publisher>,
    verdict_queue: String,
    dead_letter_queue: Option<String>,
}

impl ResultPublisher {
    pub fn new(sink: Arc<dyn Publisher>, verdict_queue: impl Into<String>) -> Self {
        Self {
            sink,
            verdict_queue: verdict_queue.into(),
            dead_letter_queue: None,
        }
    }

    /// Also publish a fault record for each review that failed to finish.
    pub fn with_dead_letter(mut self, queue: Option<String>) -> Self {
        self.dead_letter_queue = queue;
        self
    }

    pub fn verdict_queue(&self) -> &str {
        &self.verdict_queue
    }

    pub async fn publish_verdict(&self, verdict: &VerdictEvent) -> bool {
        let payload = match verdict.to_json() {
            Ok(p) => p,
            Err(e) => {
                error!(error = %e, "Failed to encode verdict");
                return false;
            }
        };

        match self.sink.publish(&self.verdict_queue, &payload).await {
            Ok(()) => {
                info!(
                    queue = %self.verdict_queue,
                    pattern = %verdict.pattern,
                    post_id = %verdict.data.post_id,
                    success = verdict.data.success,
                    "Published verdict"
                );
                true
            }
            Err(e) => {
                error!(
                    queue = %self.verdict_queue,
                    post_id = %verdict.data.post_id,
                    error = %format!("{e:#}"),
                    "Failed to publish verdict"
                );
                false
            }
        }
    }

    /// Publish a fault record if a dead-letter queue is configured.
    /// Returns false when there is nowhere to send it or sending failed.
    pub async fn publish_fault(&self, fault: &FaultEvent) -> bool {
        let Some(queue) = self.dead_letter_queue.as_deref() else {
            return false;
        };

        let payload = match fault.to_json() {
            Ok(p) => p,
            Err(e) => {
                error!(error = %e, "Failed to encode fault record");
                return false;
            }
        };

        match self.sink.publish(queue, &payload).await {
            Ok(()) => {
                info!(queue, workflow = %fault.data.workflow, "Published fault record");
                true
            }
            Err(e) => {
                error!(queue, error = %format!("{e:#}"), "Failed to publish fault record");
                false
            }
        }
    }
}
