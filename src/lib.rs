// postscreen: content moderation worker for a blogging platform
//
// This is the library root. Post lifecycle events come in through
// `transport`, are dispatched by `router` to the `moderation` workflows
// (which use `extract` and `screen`), and verdicts leave through `publish`.

pub mod config;
pub mod events;
pub mod extract;
pub mod moderation;
pub mod output;
pub mod publish;
pub mod related;
pub mod router;
pub mod screen;
pub mod status;
pub mod transport;
