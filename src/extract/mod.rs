// Text extraction - turns rich post content into plain text for screening.
//
// The TextExtractor trait is the seam the review workflow depends on. The
// HTML implementation is the only one in production; tests wrap it to count
// calls or substitute a failing extractor.

pub mod html;

use thiserror::Error;

pub use html::HtmlExtractor;

/// Why content could not be turned into plain text.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExtractError {
    #[error("content is {size} bytes, over the {limit} byte limit")]
    TooLarge { size: usize, limit: usize },
    #[error("content contains a NUL character at byte {0}")]
    NulCharacter(usize),
}

/// Result of one extraction.
///
/// `ok` is the only failure signal. When `ok` is false, `text` carries a
/// human-readable description of the error, not content.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub text: String,
    pub ok: bool,
}

impl Extraction {
    pub fn success(text: String) -> Self {
        Self { text, ok: true }
    }

    pub fn failure(err: &ExtractError) -> Self {
        Self {
            text: err.to_string(),
            ok: false,
        }
    }
}

impl From<Result<String, ExtractError>> for Extraction {
    fn from(result: Result<String, ExtractError>) -> Self {
        match result {
            Ok(text) => Extraction::success(text),
            Err(e) => Extraction::failure(&e),
        }
    }
}

/// Converts raw post content into normalized plain text.
pub trait TextExtractor: Send + Sync {
    fn extract(&self, raw: &str) -> Extraction;
}
