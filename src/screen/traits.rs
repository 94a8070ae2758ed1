// Screening traits - the seams between the review workflow and the models.
//
// ContentScreen is the boolean predicate the workflow calls. ContentScorer is
// the continuous-score interface the model backends implement. ThresholdScreen
// turns any scorer into a screen, so a backend only has to produce scores.

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

/// Scores for one piece of text, all 0.0 (clean) to 1.0 (offensive).
/// Backends fill in whichever categories they support.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScreenScore {
    pub toxicity: f64,
    pub categories: ScoreCategories,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScoreCategories {
    pub severe_toxicity: Option<f64>,
    pub obscene: Option<f64>,
    pub identity_attack: Option<f64>,
    pub insult: Option<f64>,
    pub threat: Option<f64>,
    pub sexual_explicit: Option<f64>,
}

impl ScreenScore {
    /// Highest score across toxicity and every populated category.
    pub fn peak(&self) -> f64 {
        let c = &self.categories;
        [
            c.severe_toxicity,
            c.obscene,
            c.identity_attack,
            c.insult,
            c.threat,
            c.sexual_explicit,
        ]
        .into_iter()
        .flatten()
        .fold(self.toxicity, f64::max)
    }
}

/// Produces continuous scores for text. Implemented by model backends.
#[async_trait]
pub trait ContentScorer: Send + Sync {
    async fn score_text(&self, text: &str) -> Result<ScreenScore>;

    /// Score several texts, results in input order. Backends that can batch
    /// inference override this.
    async fn score_batch(&self, texts: &[String]) -> Result<Vec<ScreenScore>> {
        let mut scores = Vec::with_capacity(texts.len());
        for text in texts {
            scores.push(self.score_text(text).await?);
        }
        Ok(scores)
    }
}

/// Binary "is this text disallowed" predicate used by the review workflow.
///
/// `Err` means the screen could not decide (backend down, model error). It
/// is never a stand-in for "flagged".
#[async_trait]
pub trait ContentScreen: Send + Sync {
    async fn is_flagged(&self, text: &str) -> Result<bool>;

    /// Backend requests needed to screen `text`. The workflow's screen
    /// timeout applies to each one.
    fn requests_for(&self, _text: &str) -> u32 {
        1
    }

    /// Short backend name for logs.
    fn name(&self) -> &'static str;
}

/// Words per scoring window. Long bodies are split so that text past the
/// model's context length is still screened.
pub const WINDOW_WORDS: usize = 200;

/// Most windows sent to the scorer in one `score_batch` call. Bounds the
/// size of a single model forward pass.
pub const SCORE_BATCH: usize = 16;

/// Flags text whose peak score reaches `threshold` in any window.
pub struct ThresholdScreen {
    scorer: Box<dyn ContentScorer>,
    threshold: f64,
    name: &'static str,
}

impl ThresholdScreen {
    pub fn new(scorer: Box<dyn ContentScorer>, threshold: f64, name: &'static str) -> Self {
        Self {
            scorer,
            threshold,
            name,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Peak score across all windows of `text`. Empty text scores 0.0
    /// without calling the backend.
    pub async fn peak_score(&self, text: &str) -> Result<f64> {
        let windows = split_windows(text, WINDOW_WORDS);
        if windows.is_empty() {
            return Ok(0.0);
        }
        let mut peak: f64 = 0.0;
        for batch in windows.chunks(SCORE_BATCH) {
            let scores = self.scorer.score_batch(batch).await?;
            peak = scores.iter().map(ScreenScore::peak).fold(peak, f64::max);
        }
        Ok(peak)
    }
}

#[async_trait]
impl ContentScreen for ThresholdScreen {
    async fn is_flagged(&self, text: &str) -> Result<bool> {
        let peak = self.peak_score(text).await?;
        let flagged = peak >= self.threshold;
        debug!(
            screen = self.name,
            peak,
            threshold = self.threshold,
            flagged,
            "Screened text"
        );
        Ok(flagged)
    }

    fn requests_for(&self, text: &str) -> u32 {
        let windows = window_count(text, WINDOW_WORDS);
        u32::try_from(windows).unwrap_or(u32::MAX).max(1)
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

/// Number of windows `split_windows` would produce, without building them.
pub fn window_count(text: &str, max_words: usize) -> usize {
    text.split_whitespace().count().div_ceil(max_words.max(1))
}

/// Split text into windows of at most `max_words` whitespace-separated words.
pub fn split_windows(text: &str, max_words: usize) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    words
        .chunks(max_words.max(1))
        .map(|chunk| chunk.join(" "))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Scores 0.9 for any window containing "bad", 0.1 otherwise.
    struct KeywordScorer {
        batches: Arc<AtomicUsize>,
        largest: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ContentScorer for KeywordScorer {
        async fn score_text(&self, text: &str) -> Result<ScreenScore> {
            let toxicity = if text.contains("bad") { 0.9 } else { 0.1 };
            Ok(ScreenScore {
                toxicity,
                ..Default::default()
            })
        }

        async fn score_batch(&self, texts: &[String]) -> Result<Vec<ScreenScore>> {
            self.batches.fetch_add(1, Ordering::SeqCst);
            self.largest.fetch_max(texts.len(), Ordering::SeqCst);
            let mut out = Vec::new();
            for t in texts {
                out.push(self.score_text(t).await?);
            }
            Ok(out)
        }
    }

    fn make_screen(threshold: f64) -> (ThresholdScreen, Arc<AtomicUsize>) {
        let (screen, batches, _) = make_counted_screen(threshold);
        (screen, batches)
    }

    /// Also returns the largest batch the scorer was handed.
    fn make_counted_screen(
        threshold: f64,
    ) -> (ThresholdScreen, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let batches = Arc::new(AtomicUsize::new(0));
        let largest = Arc::new(AtomicUsize::new(0));
        let scorer = KeywordScorer {
            batches: Arc::clone(&batches),
            largest: Arc::clone(&largest),
        };
        (
            ThresholdScreen::new(Box::new(scorer), threshold, "test"),
            batches,
            largest,
        )
    }

    #[test]
    fn test_peak_uses_highest_category() {
        let score = ScreenScore {
            toxicity: 0.2,
            categories: ScoreCategories {
                insult: Some(0.7),
                obscene: Some(0.4),
                ..Default::default()
            },
        };
        assert!((score.peak() - 0.7).abs() < 1e-10);
    }

    #[test]
    fn test_peak_without_categories_is_toxicity() {
        let score = ScreenScore {
            toxicity: 0.3,
            ..Default::default()
        };
        assert!((score.peak() - 0.3).abs() < 1e-10);
    }

    #[test]
    fn test_split_windows() {
        assert!(split_windows("", 3).is_empty());
        assert!(split_windows("   \n ", 3).is_empty());
        assert_eq!(split_windows("a b c d e", 2), vec!["a b", "c d", "e"]);
        assert_eq!(split_windows("one", 0), vec!["one"]);
    }

    #[tokio::test]
    async fn test_threshold_flags_at_boundary() {
        let (screen, _) = make_screen(0.9);
        assert!(screen.is_flagged("this is bad").await.unwrap());
        let (screen, _) = make_screen(0.91);
        assert!(!screen.is_flagged("this is bad").await.unwrap());
    }

    #[tokio::test]
    async fn test_late_window_still_flags() {
        let (screen, _) = make_screen(0.5);
        let mut text = "fine ".repeat(WINDOW_WORDS * 2);
        text.push_str("bad");
        assert!(screen.is_flagged(&text).await.unwrap());
    }

    #[tokio::test]
    async fn test_empty_text_skips_backend() {
        let (screen, batches) = make_screen(0.5);
        assert!(!screen.is_flagged("").await.unwrap());
        assert_eq!(batches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_huge_body_scored_in_bounded_batches() {
        let (screen, batches, largest) = make_counted_screen(0.5);
        let mut text = "a ".repeat(524_288);
        text.push_str("bad");

        assert!(screen.is_flagged(&text).await.unwrap());
        assert_eq!(largest.load(Ordering::SeqCst), SCORE_BATCH);
        let windows = window_count(&text, WINDOW_WORDS);
        assert_eq!(windows, 2622);
        assert_eq!(batches.load(Ordering::SeqCst), windows.div_ceil(SCORE_BATCH));
    }

    #[test]
    fn test_requests_for_counts_windows() {
        let (screen, _) = make_screen(0.5);
        assert_eq!(screen.requests_for(""), 1);
        assert_eq!(screen.requests_for("short title"), 1);
        assert_eq!(screen.requests_for(&"word ".repeat(WINDOW_WORDS + 1)), 2);
        assert_eq!(window_count("a b c d e", 2), split_windows("a b c d e", 2).len());
    }
}
