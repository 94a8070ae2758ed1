// Content screening - the "is this disallowed?" predicate and its backends.
//
// The review workflow only sees the ContentScreen trait. Which backend sits
// behind it (local ONNX model, Perspective API, term list) is decided once
// at startup from configuration.

pub mod download;
pub mod onnx;
pub mod perspective;
pub mod rate_limiter;
pub mod stub;
pub mod traits;
pub mod wordlist;

pub use stub::StubScreen;
pub use traits::{ContentScorer, ContentScreen, ScreenScore, ThresholdScreen};
pub use wordlist::WordlistScreen;
