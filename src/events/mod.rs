// Wire types - the JSON shapes exchanged with the rest of the platform.
//
// Inbound messages are `{pattern, data}` envelopes produced by the posts
// service. Outbound messages use the same envelope shape so the posts service
// can route them by pattern on its side.

pub mod envelope;
pub mod verdict;

pub use envelope::{Envelope, EnvelopeError, PostEvent};
pub use verdict::{FaultEvent, VerdictEvent};

/// A new post was submitted and needs review.
pub const POST_CREATED: &str = "post.created";
/// An existing post was edited and needs review again.
pub const POST_UPDATED: &str = "post.updated";
/// Verdict for a `post.created` review.
pub const POST_REVIEWED: &str = "post.reviewed";
/// Verdict for a `post.updated` review. A separate topic downstream.
pub const POST_UPDATED_REVIEWED: &str = "post.updated.reviewed";
/// Pipeline fault report, only sent when a dead-letter queue is configured.
pub const POST_REVIEW_FAILED: &str = "post.review.failed";
