// In-memory publisher that records what would have been sent.
//
// Used by the tests and by the `review` command, which runs one event through
// the pipeline without a broker.

use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;

use super::Publisher;
use crate::events::VerdictEvent;

/// A message captured by RecordingPublisher.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub queue: String,
    pub payload: Vec<u8>,
}

#[derive(Default)]
pub struct RecordingPublisher {
    messages: Mutex<Vec<PublishedMessage>>,
    fail: bool,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// A publisher that rejects every message and records nothing.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn messages(&self) -> Vec<PublishedMessage> {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn count(&self) -> usize {
        self.messages.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn published_to(&self, queue: &str) -> Vec<PublishedMessage> {
        self.messages()
            .into_iter()
            .filter(|m| m.queue == queue)
            .collect()
    }

    /// Decode the verdicts sent to `queue`. Payloads that aren't verdicts are skipped.
    pub fn verdicts(&self, queue: &str) -> Vec<VerdictEvent> {
        self.published_to(queue)
            .iter()
            .filter_map(|m| serde_json::from_slice(&m.payload).ok())
            .collect()
    }

    pub fn clear(&self) {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, queue: &str, payload: &[u8]) -> Result<()> {
        if self.fail {
            anyhow::bail!("recording publisher is set to fail");
        }
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(PublishedMessage {
                queue: queue.to_string(),
                payload: payload.to_vec(),
            });
        Ok(())
    }
}
