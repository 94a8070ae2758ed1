// Review workflows - the stage machine that turns a post event into a verdict.
//
// Create and Update run the same three stages and differ only in the verdict
// pattern they report under:
//
//   ScreenTitle ──flagged──▶ TitleRejected
//        │
//   ExtractContent ──not ok──▶ ContentUnparseable
//        │
//   ScreenContent ──flagged──▶ ContentRejected
//        │
//     Approved
//
// The first failing stage ends the review; nothing is retried. Rejections are
// ordinary outcomes. Anything that stops the machine from reaching an outcome
// (bad payload, screen error or timeout, panic) is a ReviewFault and produces
// no verdict.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::events::{
    PostEvent, VerdictEvent, POST_CREATED, POST_REVIEWED, POST_UPDATED, POST_UPDATED_REVIEWED,
};
use crate::extract::TextExtractor;
use crate::screen::ContentScreen;

pub const TITLE_REJECTED_MESSAGE: &str = "Sensitive content detected. Please change your title then resubmit again. All the rejected posts will be removed in 7 days.";
pub const CONTENT_UNPARSEABLE_MESSAGE: &str =
    "Something went wrong. Please re-submit again. All the rejected posts will be removed in 7 days.";
pub const CONTENT_REJECTED_MESSAGE: &str = "Sensitive content detected. Please change your content then resubmit again. All the rejected posts will be removed in 7 days.";
pub const APPROVED_MESSAGE: &str = "Ready to publish";

/// Which review a post event asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Workflow {
    Create,
    Update,
}

/// Inbound pattern to workflow. The set of supported events is closed.
pub const WORKFLOWS: [(&str, Workflow); 2] = [
    (POST_CREATED, Workflow::Create),
    (POST_UPDATED, Workflow::Update),
];

impl Workflow {
    pub fn for_pattern(pattern: &str) -> Option<Self> {
        WORKFLOWS
            .iter()
            .find(|(p, _)| *p == pattern)
            .map(|(_, workflow)| *workflow)
    }

    pub fn inbound_pattern(self) -> &'static str {
        match self {
            Workflow::Create => POST_CREATED,
            Workflow::Update => POST_UPDATED,
        }
    }

    /// Pattern of the verdict event, whatever the outcome.
    pub fn verdict_pattern(self) -> &'static str {
        match self {
            Workflow::Create => POST_REVIEWED,
            Workflow::Update => POST_UPDATED_REVIEWED,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Workflow::Create => "create",
            Workflow::Update => "update",
        }
    }
}

/// Terminal outcome of a completed review.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    TitleRejected,
    ContentUnparseable,
    ContentRejected,
    Approved,
}

impl Outcome {
    pub fn message(self) -> &'static str {
        match self {
            Outcome::TitleRejected => TITLE_REJECTED_MESSAGE,
            Outcome::ContentUnparseable => CONTENT_UNPARSEABLE_MESSAGE,
            Outcome::ContentRejected => CONTENT_REJECTED_MESSAGE,
            Outcome::Approved => APPROVED_MESSAGE,
        }
    }

    pub fn is_approved(self) -> bool {
        self == Outcome::Approved
    }

    pub fn label(self) -> &'static str {
        match self {
            Outcome::TitleRejected => "title-rejected",
            Outcome::ContentUnparseable => "content-unparseable",
            Outcome::ContentRejected => "content-rejected",
            Outcome::Approved => "approved",
        }
    }

    pub fn verdict(self, workflow: Workflow, post_id: &str) -> VerdictEvent {
        VerdictEvent::new(
            workflow.verdict_pattern(),
            post_id,
            self.message(),
            self.is_approved(),
        )
    }
}

/// Which text a screening call was looking at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScreenTarget {
    Title,
    Content,
}

impl fmt::Display for ScreenTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ScreenTarget::Title => "title",
            ScreenTarget::Content => "content",
        })
    }
}

/// A review that broke before reaching an outcome.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReviewFault {
    #[error("payload is not a post event: {0}")]
    InvalidPayload(String),
    #[error("{target} screen failed: {message}")]
    ScreenFailed {
        target: ScreenTarget,
        message: String,
    },
    #[error("{target} screen timed out after {timeout:?}")]
    ScreenTimedOut {
        target: ScreenTarget,
        timeout: Duration,
    },
    #[error("review panicked: {0}")]
    Panicked(String),
}

/// A completed review: the outcome and the verdict event reporting it.
#[derive(Debug, Clone, PartialEq)]
pub struct Review {
    pub workflow: Workflow,
    pub outcome: Outcome,
    pub verdict: VerdictEvent,
}

enum Stage {
    ScreenTitle,
    ExtractContent,
    ScreenContent(String),
    Done(Outcome),
}

/// Runs review workflows against an injected screen and extractor.
pub struct Reviewer {
    screen: Arc<dyn ContentScreen>,
    extractor: Arc<dyn TextExtractor>,
    screen_timeout: Duration,
}

impl Reviewer {
    pub fn new(
        screen: Arc<dyn ContentScreen>,
        extractor: Arc<dyn TextExtractor>,
        screen_timeout: Duration,
    ) -> Self {
        Self {
            screen,
            extractor,
            screen_timeout,
        }
    }

    /// Run `workflow` over a raw event payload.
    ///
    /// This is the workflow boundary: payload errors, screen errors and
    /// panics all come back as a ReviewFault instead of escaping.
    pub async fn run(&self, workflow: Workflow, data: &Value) -> Result<Review, ReviewFault> {
        let post =
            PostEvent::from_data(data).map_err(|e| ReviewFault::InvalidPayload(e.to_string()))?;

        let outcome = AssertUnwindSafe(self.review(&post))
            .catch_unwind()
            .await
            .map_err(|panic| ReviewFault::Panicked(panic_message(panic.as_ref())))??;

        Ok(Review {
            workflow,
            outcome,
            verdict: outcome.verdict(workflow, &post.id),
        })
    }

    /// Drive the stage machine for one post.
    pub async fn review(&self, post: &PostEvent) -> Result<Outcome, ReviewFault> {
        let mut stage = Stage::ScreenTitle;
        loop {
            stage = match stage {
                Stage::ScreenTitle => {
                    if self.screen(ScreenTarget::Title, &post.title).await? {
                        Stage::Done(Outcome::TitleRejected)
                    } else {
                        Stage::ExtractContent
                    }
                }
                Stage::ExtractContent => {
                    let extraction = self.extractor.extract(&post.content);
                    if extraction.ok {
                        Stage::ScreenContent(extraction.text)
                    } else {
                        warn!(post_id = %post.id, reason = %extraction.text, "Content could not be extracted");
                        Stage::Done(Outcome::ContentUnparseable)
                    }
                }
                Stage::ScreenContent(text) => {
                    if self.screen(ScreenTarget::Content, &text).await? {
                        Stage::Done(Outcome::ContentRejected)
                    } else {
                        Stage::Done(Outcome::Approved)
                    }
                }
                Stage::Done(outcome) => {
                    debug!(post_id = %post.id, outcome = outcome.label(), "Review finished");
                    return Ok(outcome);
                }
            };
        }
    }

    /// The timeout covers each backend request, so long bodies split into
    /// many windows get a proportionally longer deadline.
    async fn screen(&self, target: ScreenTarget, text: &str) -> Result<bool, ReviewFault> {
        let budget = self
            .screen_timeout
            .saturating_mul(self.screen.requests_for(text).max(1));
        match tokio::time::timeout(budget, self.screen.is_flagged(text)).await {
            Ok(Ok(flagged)) => Ok(flagged),
            Ok(Err(e)) => Err(ReviewFault::ScreenFailed {
                target,
                message: format!("{e:#}"),
            }),
            Err(_) => Err(ReviewFault::ScreenTimedOut {
                target,
                timeout: budget,
            }),
        }
    }
}

/// Best-effort text from a caught panic payload.
pub fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::HtmlExtractor;
    use crate::screen::rate_limiter::RateLimiter;
    use crate::screen::{ContentScorer, ScreenScore, StubScreen, ThresholdScreen};
    use async_trait::async_trait;
    use serde_json::json;

    fn reviewer(screen: Arc<StubScreen>) -> Reviewer {
        Reviewer::new(
            screen,
            Arc::new(HtmlExtractor::default()),
            Duration::from_secs(5),
        )
    }

    fn post(title: &str, content: &str) -> PostEvent {
        PostEvent {
            id: "post-1".to_string(),
            title: title.to_string(),
            content: content.to_string(),
        }
    }

    #[test]
    fn test_pattern_table() {
        assert_eq!(Workflow::for_pattern("post.created"), Some(Workflow::Create));
        assert_eq!(Workflow::for_pattern("post.updated"), Some(Workflow::Update));
        assert_eq!(Workflow::for_pattern("post.removed"), None);
        assert_eq!(Workflow::for_pattern("POST.CREATED"), None);
        for (pattern, workflow) in WORKFLOWS {
            assert_eq!(workflow.inbound_pattern(), pattern);
        }
    }

    #[test]
    fn test_verdict_patterns_are_distinct_topics() {
        assert_eq!(Workflow::Create.verdict_pattern(), "post.reviewed");
        assert_eq!(Workflow::Update.verdict_pattern(), "post.updated.reviewed");
    }

    #[test]
    fn test_only_approved_is_success() {
        assert!(Outcome::Approved.is_approved());
        assert!(!Outcome::TitleRejected.is_approved());
        assert!(!Outcome::ContentUnparseable.is_approved());
        assert!(!Outcome::ContentRejected.is_approved());
    }

    #[tokio::test]
    async fn test_title_rejection_short_circuits() {
        let screen = Arc::new(StubScreen::flagging(["forbidden"]));
        let outcome = reviewer(Arc::clone(&screen))
            .review(&post("Forbidden title", "<p>fine body</p>"))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::TitleRejected);
        assert_eq!(screen.calls(), vec!["Forbidden title".to_string()]);
    }

    #[tokio::test]
    async fn test_body_is_screened_as_plain_text() {
        let screen = Arc::new(StubScreen::flagging(["forbidden"]));
        let outcome = reviewer(Arc::clone(&screen))
            .review(&post("Fine", "<p>a <em>forbidden</em> word</p>"))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::ContentRejected);
        assert_eq!(screen.calls()[1], "a forbidden word");
    }

    #[tokio::test]
    async fn test_unparseable_content_skips_body_screen() {
        let screen = Arc::new(StubScreen::clean());
        let outcome = reviewer(Arc::clone(&screen))
            .review(&post("Fine", "bad\0content"))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::ContentUnparseable);
        assert_eq!(screen.call_count(), 1);
    }

    #[tokio::test]
    async fn test_invalid_payload_is_fault() {
        let screen = Arc::new(StubScreen::clean());
        let fault = reviewer(Arc::clone(&screen))
            .run(Workflow::Create, &json!({ "id": "p1" }))
            .await
            .unwrap_err();
        assert!(matches!(fault, ReviewFault::InvalidPayload(_)));
        assert_eq!(screen.call_count(), 0);
    }

    #[tokio::test]
    async fn test_screen_error_is_fault() {
        let screen = Arc::new(StubScreen::failing());
        let fault = reviewer(screen)
            .review(&post("t", "c"))
            .await
            .unwrap_err();
        assert!(matches!(
            fault,
            ReviewFault::ScreenFailed {
                target: ScreenTarget::Title,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_panic_is_contained_at_boundary() {
        let screen = Arc::new(StubScreen::panicking());
        let data = json!({ "id": "p1", "title": "t", "content": "c" });
        let fault = reviewer(screen)
            .run(Workflow::Update, &data)
            .await
            .unwrap_err();
        assert_eq!(
            fault,
            ReviewFault::Panicked("stub screen panicked".to_string())
        );
    }

    struct SlowScreen;

    #[async_trait]
    impl ContentScreen for SlowScreen {
        async fn is_flagged(&self, _text: &str) -> anyhow::Result<bool> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(false)
        }

        fn name(&self) -> &'static str {
            "slow"
        }
    }

    #[tokio::test]
    async fn test_screen_timeout_is_fault() {
        let reviewer = Reviewer::new(
            Arc::new(SlowScreen),
            Arc::new(HtmlExtractor::default()),
            Duration::from_millis(20),
        );
        let fault = reviewer.review(&post("t", "c")).await.unwrap_err();
        assert!(matches!(fault, ReviewFault::ScreenTimedOut { .. }));
    }

    #[tokio::test]
    async fn test_run_builds_verdict_for_workflow() {
        let screen = Arc::new(StubScreen::clean());
        let data = json!({ "id": "opaque-ID-42", "title": "Hi", "content": "<p>there</p>" });
        let review = reviewer(screen).run(Workflow::Update, &data).await.unwrap();
        assert_eq!(review.outcome, Outcome::Approved);
        assert_eq!(review.verdict.pattern, "post.updated.reviewed");
        assert_eq!(review.verdict.data.post_id, "opaque-ID-42");
        assert_eq!(review.verdict.data.message, "Ready to publish");
        assert!(review.verdict.data.success);
    }

    /// Scores every window clean, one request per second like a hosted API.
    struct PacedScorer {
        limiter: RateLimiter,
    }

    #[async_trait]
    impl ContentScorer for PacedScorer {
        async fn score_text(&self, _text: &str) -> anyhow::Result<ScreenScore> {
            self.limiter.acquire().await;
            Ok(ScreenScore::default())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_clean_body_outlasts_single_request_timeout() {
        let scorer = PacedScorer {
            limiter: RateLimiter::per_second(1.0),
        };
        let screen = ThresholdScreen::new(Box::new(scorer), 0.5, "paced");
        let reviewer = Reviewer::new(
            Arc::new(screen),
            Arc::new(HtmlExtractor::default()),
            Duration::from_secs(30),
        );
        let content = format!("<p>{}</p>", "lovely ".repeat(7000));
        let data = json!({ "id": "long-1", "title": "A long read", "content": content });

        let started = tokio::time::Instant::now();
        let review = reviewer.run(Workflow::Create, &data).await.unwrap();
        assert_eq!(review.outcome, Outcome::Approved);
        assert!(started.elapsed() > Duration::from_secs(30));
    }

    /// Never answers for windows containing "stuck", clean otherwise.
    struct StuckScorer;

    #[async_trait]
    impl ContentScorer for StuckScorer {
        async fn score_text(&self, text: &str) -> anyhow::Result<ScreenScore> {
            if text.contains("stuck") {
                std::future::pending::<()>().await;
            }
            Ok(ScreenScore::default())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_scales_with_window_count() {
        let reviewer = Reviewer::new(
            Arc::new(ThresholdScreen::new(Box::new(StuckScorer), 0.5, "stuck")),
            Arc::new(HtmlExtractor::default()),
            Duration::from_secs(2),
        );
        let content = format!("<p>{}</p>", "stuck ".repeat(450));
        let fault = reviewer.review(&post("fine", &content)).await.unwrap_err();
        assert_eq!(
            fault,
            ReviewFault::ScreenTimedOut {
                target: ScreenTarget::Content,
                timeout: Duration::from_secs(6),
            }
        );
    }
}
