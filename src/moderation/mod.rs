// Moderation - review workflows for post lifecycle events.

pub mod workflow;

pub use workflow::{Outcome, Review, ReviewFault, Reviewer, ScreenTarget, Workflow};
