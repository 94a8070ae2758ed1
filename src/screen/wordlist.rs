// Term-list screening backend.
//
// Flags text containing any listed term as a whole word, ASCII
// case-insensitively. Word boundaries apply only at term edges that are word
// characters. Needs no model and no network, which makes it the
// backend of choice for small deployments and local development.
//
// File format: one term per line. Blank lines and lines starting with `#`
// are ignored.

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex_lite::Regex;
use tracing::debug;

use super::traits::ContentScreen;

pub struct WordlistScreen {
    /// None when the list is empty: nothing is ever flagged.
    pattern: Option<Regex>,
    term_count: usize,
}

impl WordlistScreen {
    pub fn new<I, S>(terms: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let alternatives: Vec<String> = terms
            .into_iter()
            .map(|t| t.as_ref().trim().to_string())
            .filter(|t| !t.is_empty())
            .map(|t| term_pattern(&t))
            .collect();

        let term_count = alternatives.len();
        let pattern = if alternatives.is_empty() {
            None
        } else {
            let source = format!("(?i)(?:{})", alternatives.join("|"));
            Some(Regex::new(&source).context("Failed to compile term list")?)
        };

        Ok(Self {
            pattern,
            term_count,
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read term list {}", path.display()))?;
        let terms = contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.starts_with('#'));
        let screen = Self::new(terms)?;
        debug!(path = %path.display(), terms = screen.term_count, "Loaded term list");
        Ok(screen)
    }

    pub fn term_count(&self) -> usize {
        self.term_count
    }
}

/// Escaped term with a `\b` on each edge that is a word character. An edge
/// like the `+` in `c++` has no boundary to anchor to, so it matches as is.
fn term_pattern(term: &str) -> String {
    let is_word = |c: char| c.is_ascii_alphanumeric() || c == '_';
    let start = if term.starts_with(is_word) { r"\b" } else { "" };
    let end = if term.ends_with(is_word) { r"\b" } else { "" };
    format!("{start}{}{end}", regex_lite::escape(term))
}

#[async_trait]
impl ContentScreen for WordlistScreen {
    async fn is_flagged(&self, text: &str) -> Result<bool> {
        Ok(self
            .pattern
            .as_ref()
            .is_some_and(|pattern| pattern.is_match(text)))
    }

    fn name(&self) -> &'static str {
        "wordlist"
    }
}
