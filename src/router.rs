// Event router - one inbound message in, at most one verdict out.
//
// The router decodes the envelope, looks the pattern up in the workflow
// table, runs the review and hands the result to the publisher. It never
// returns an error: every message ends as one of the RouteOutcome variants
// and the consumer loop moves on.

use tracing::{error, info, warn};

use crate::events::envelope::peek_post_id;
use crate::events::{Envelope, EnvelopeError, FaultEvent};
use crate::moderation::{Outcome, ReviewFault, Reviewer, Workflow};
use crate::publish::ResultPublisher;

/// What happened to one inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteOutcome {
    /// The body wasn't a usable envelope. Nothing was published.
    Malformed(EnvelopeError),
    /// No workflow handles this pattern. Nothing was published.
    Ignored { pattern: Option<String> },
    /// The review finished and a verdict was sent (or failed to send).
    Reviewed {
        workflow: Workflow,
        post_id: String,
        outcome: Outcome,
        published: bool,
    },
    /// The review broke before reaching an outcome. No verdict was sent.
    Faulted {
        workflow: Workflow,
        post_id: Option<String>,
        fault: ReviewFault,
    },
}

impl RouteOutcome {
    /// Whether the message is done with and can be acknowledged.
    ///
    /// Ignored patterns belong to someone else and are acked. Malformed
    /// bodies, faults and unsent verdicts are rejected so a broker-side
    /// dead-letter exchange can keep them.
    pub fn should_ack(&self) -> bool {
        match self {
            RouteOutcome::Ignored { .. } => true,
            RouteOutcome::Reviewed { published, .. } => *published,
            RouteOutcome::Malformed(_) | RouteOutcome::Faulted { .. } => false,
        }
    }
}

pub struct Router {
    reviewer: Reviewer,
    publisher: ResultPublisher,
}

impl Router {
    pub fn new(reviewer: Reviewer, publisher: ResultPublisher) -> Self {
        Self {
            reviewer,
            publisher,
        }
    }

    pub async fn route(&self, body: &[u8]) -> RouteOutcome {
        let envelope = match Envelope::decode(body) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, bytes = body.len(), "Dropping malformed message");
                return RouteOutcome::Malformed(e);
            }
        };

        let Some(workflow) = envelope.pattern.as_deref().and_then(Workflow::for_pattern) else {
            warn!(pattern = ?envelope.pattern, "No workflow for pattern, ignoring message");
            return RouteOutcome::Ignored {
                pattern: envelope.pattern,
            };
        };

        let post_id = peek_post_id(&envelope.data).map(str::to_string);
        info!(
            workflow = workflow.name(),
            post_id = post_id.as_deref().unwrap_or("<missing>"),
            "Reviewing post"
        );

        match self.reviewer.run(workflow, &envelope.data).await {
            Ok(review) => {
                let published = self.publisher.publish_verdict(&review.verdict).await;
                RouteOutcome::Reviewed {
                    workflow,
                    post_id: review.verdict.data.post_id,
                    outcome: review.outcome,
                    published,
                }
            }
            Err(fault) => {
                error!(
                    workflow = workflow.name(),
                    post_id = post_id.as_deref().unwrap_or("<missing>"),
                    error = %fault,
                    "Review failed, no verdict sent"
                );
                let record =
                    FaultEvent::new(post_id.as_deref(), workflow.name(), &fault.to_string());
                self.publisher.publish_fault(&record).await;
                RouteOutcome::Faulted {
                    workflow,
                    post_id,
                    fault,
                }
            }
        }
    }
}
