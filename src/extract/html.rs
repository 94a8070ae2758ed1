// HTML to plain text extraction using the `scraper` crate.
//
// Content is prefixed with a sentinel text node before parsing so that a
// fragment made only of markup still yields a leading text node, then the
// sentinel is stripped from the output. Only the leading sentinel is removed:
// "..." typed by the author stays in the text.
//
// html5ever recovers from any malformed markup, so parsing itself never
// fails. Extraction fails on input we refuse to parse at all: oversized
// bodies and embedded NUL characters.

use scraper::Html;
use tracing::debug;

use super::{ExtractError, Extraction, TextExtractor};

/// Prepended to every input and removed from every output.
pub const SENTINEL: &str = "...";

/// Default upper bound on accepted content (1 MiB).
pub const DEFAULT_MAX_CONTENT_BYTES: usize = 1024 * 1024;

/// Elements whose text is never rendered.
const HIDDEN_ELEMENTS: [&str; 4] = ["script", "style", "noscript", "template"];

#[derive(Debug, Clone)]
pub struct HtmlExtractor {
    max_bytes: usize,
}

impl Default for HtmlExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONTENT_BYTES)
    }
}

impl HtmlExtractor {
    pub fn new(max_bytes: usize) -> Self {
        Self { max_bytes }
    }

    /// Extract visible text: text nodes trimmed, joined by single spaces,
    /// whitespace runs collapsed, sentinel removed.
    pub fn try_extract(&self, raw: &str) -> Result<String, ExtractError> {
        if raw.len() > self.max_bytes {
            return Err(ExtractError::TooLarge {
                size: raw.len(),
                limit: self.max_bytes,
            });
        }
        if let Some(pos) = raw.find('\0') {
            return Err(ExtractError::NulCharacter(pos));
        }

        let wrapped = format!("{SENTINEL} {raw}");
        let fragment = Html::parse_fragment(&wrapped);

        let mut parts: Vec<&str> = Vec::new();
        for node in fragment.tree.root().descendants() {
            let Some(text) = node.value().as_text() else {
                continue;
            };
            let hidden = node.ancestors().any(|ancestor| {
                ancestor
                    .value()
                    .as_element()
                    .is_some_and(|el| HIDDEN_ELEMENTS.contains(&el.name()))
            });
            if hidden {
                continue;
            }
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                parts.push(trimmed);
            }
        }

        let collapsed = parts
            .iter()
            .flat_map(|part| part.split_whitespace())
            .collect::<Vec<_>>()
            .join(" ");

        let plain = collapsed
            .strip_prefix(SENTINEL)
            .unwrap_or(&collapsed)
            .trim()
            .to_string();

        debug!(
            input_bytes = raw.len(),
            output_chars = plain.chars().count(),
            "Extracted plain text"
        );

        Ok(plain)
    }
}

impl TextExtractor for HtmlExtractor {
    fn extract(&self, raw: &str) -> Extraction {
        self.try_extract(raw).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(raw: &str) -> Extraction {
        HtmlExtractor::default().extract(raw)
    }

    #[test]
    fn test_paragraph() {
        let result = extract("<p>Hello</p>");
        assert!(result.ok);
        assert_eq!(result.text, "Hello");
    }

    #[test]
    fn test_nested_nodes_joined_with_space() {
        let result = extract("<h1>Title</h1><p>First <b>bold</b> line</p>");
        assert_eq!(result.text, "Title First bold line");
    }

    #[test]
    fn test_whitespace_collapsed() {
        let result = extract("<p>  lots \n\n of\t\tspace  </p>");
        assert_eq!(result.text, "lots of space");
    }

    #[test]
    fn test_entities_decoded() {
        let result = extract("<p>Fish &amp; chips &lt;3</p>");
        assert_eq!(result.text, "Fish & chips <3");
    }

    #[test]
    fn test_hidden_elements_skipped() {
        let result = extract("<p>shown</p><script>var x = 1;</script><style>p{}</style>");
        assert_eq!(result.text, "shown");
    }

    #[test]
    fn test_empty_content() {
        let result = extract("");
        assert!(result.ok);
        assert_eq!(result.text, "");
    }

    #[test]
    fn test_markup_only_content() {
        let result = extract("<img src=\"a.png\"><br>");
        assert!(result.ok);
        assert_eq!(result.text, "");
    }

    #[test]
    fn test_author_ellipsis_preserved() {
        assert_eq!(extract("...and then").text, "...and then");
        assert_eq!(extract("<p>wait for it...</p>").text, "wait for it...");
    }

    #[test]
    fn test_malformed_markup_recovers() {
        let result = extract("<p>unclosed <b>bold <i>text");
        assert!(result.ok);
        assert_eq!(result.text, "unclosed bold text");
    }

    #[test]
    fn test_oversized_content_fails() {
        let extractor = HtmlExtractor::new(8);
        let result = extractor.extract("<p>too long</p>");
        assert!(!result.ok);
        assert!(result.text.contains("limit"), "got: {}", result.text);
    }

    #[test]
    fn test_nul_character_fails() {
        let result = extract("<p>bad\0byte</p>");
        assert!(!result.ok);
        assert_eq!(
            HtmlExtractor::default().try_extract("<p>bad\0byte</p>"),
            Err(ExtractError::NulCharacter(6))
        );
    }

    #[test]
    fn test_plain_text_is_stable_under_reextraction() {
        for text in ["Hello", "Nice sunset photo", "a b c", "Ready... set go"] {
            let once = extract(text).text;
            let twice = extract(&once).text;
            assert_eq!(once, text);
            assert_eq!(twice, once);
        }
    }
}
