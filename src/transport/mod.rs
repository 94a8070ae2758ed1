// Broker transport - AMQP consumer/publisher and the consumer supervisor.

pub mod amqp;
pub mod supervisor;

use std::time::Duration;

use crate::router::RouteOutcome;

pub use amqp::{AmqpConsumer, AmqpPublisher};
pub use supervisor::{spawn_consumer, MessageSource, RestartPolicy};

/// When an inbound message is acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckMode {
    /// Acked by the broker on delivery. A crash mid-review loses the message.
    OnReceipt,
    /// Acked once routing finishes; rejected without requeue otherwise.
    AfterProcessing,
}

impl AckMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "receipt" | "on-receipt" | "auto" => Some(AckMode::OnReceipt),
            "processed" | "after-processing" | "manual" => Some(AckMode::AfterProcessing),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            AckMode::OnReceipt => "receipt",
            AckMode::AfterProcessing => "processed",
        }
    }
}

/// What to tell the broker about a delivery once it has been routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Ack,
    /// Negative acknowledgement without requeue.
    Reject,
}

/// Settlement for a routed delivery. `None` under `OnReceipt`, where the
/// broker already considers the message delivered.
pub fn settlement(ack_mode: AckMode, outcome: &RouteOutcome) -> Option<Settlement> {
    match ack_mode {
        AckMode::OnReceipt => None,
        AckMode::AfterProcessing if outcome.should_ack() => Some(Settlement::Ack),
        AckMode::AfterProcessing => Some(Settlement::Reject),
    }
}

/// Connection settings shared by the consumer and publisher.
#[derive(Debug, Clone)]
pub struct BrokerSettings {
    pub url: String,
    /// Drives both queue declaration and message persistence.
    pub durable: bool,
    /// Upper bound on connecting, declaring and publishing.
    pub timeout: Duration,
}

impl BrokerSettings {
    /// AMQP delivery mode matching the queue durability: 2 persistent, 1 transient.
    pub fn delivery_mode(&self) -> u8 {
        if self.durable {
            2
        } else {
            1
        }
    }
}
