// Consumer supervisor - keeps a message source running until shutdown.
//
// A source that errors (lost connection, failed declare) or whose stream ends
// without a shutdown request is restarted after an exponential backoff. The
// backoff resets once a run has stayed up longer than the maximum delay.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::router::Router;

/// Something that feeds inbound messages to a router until it stops.
///
/// `consume` should return promptly once `shutdown` is cancelled.
#[async_trait]
pub trait MessageSource: Send + Sync {
    async fn consume(&self, router: &Router, shutdown: &CancellationToken) -> Result<()>;

    fn describe(&self) -> String;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RestartPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
        }
    }
}

impl RestartPolicy {
    /// Delay before restart number `attempt` (0-based), doubling up to the cap.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Run `source` in a background task, restarting it until `shutdown` fires.
///
/// The handle resolves to the number of restarts performed.
pub fn spawn_consumer(
    source: Arc<dyn MessageSource>,
    router: Arc<Router>,
    policy: RestartPolicy,
    shutdown: CancellationToken,
) -> JoinHandle<u32> {
    tokio::spawn(async move { supervise(source, router, policy, shutdown).await })
}

async fn supervise(
    source: Arc<dyn MessageSource>,
    router: Arc<Router>,
    policy: RestartPolicy,
    shutdown: CancellationToken,
) -> u32 {
    let name = source.describe();
    let mut attempt = 0u32;
    let mut restarts = 0u32;

    loop {
        let started = Instant::now();
        let result = source.consume(&router, &shutdown).await;

        if shutdown.is_cancelled() {
            break;
        }

        match result {
            Ok(()) => warn!(source = %name, "Consumer stopped on its own"),
            Err(e) => error!(source = %name, error = %format!("{e:#}"), "Consumer failed"),
        }

        if started.elapsed() > policy.max_backoff {
            attempt = 0;
        }
        let delay = policy.delay(attempt);
        attempt = attempt.saturating_add(1);
        restarts += 1;
        info!(source = %name, delay_ms = delay.as_millis() as u64, restarts, "Restarting consumer");

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    info!(source = %name, restarts, "Consumer supervisor stopped");
    restarts
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::extract::HtmlExtractor;
    use crate::moderation::Reviewer;
    use crate::publish::{RecordingPublisher, ResultPublisher};
    use crate::screen::StubScreen;

    fn router(sink: Arc<RecordingPublisher>) -> Arc<Router> {
        let reviewer = Reviewer::new(
            Arc::new(StubScreen::clean()),
            Arc::new(HtmlExtractor::default()),
            Duration::from_secs(5),
        );
        Arc::new(Router::new(
            reviewer,
            ResultPublisher::new(sink, "posts_queue"),
        ))
    }

    fn fast_policy() -> RestartPolicy {
        RestartPolicy {
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
        }
    }

    /// Fails `failures` times, then delivers one message and waits for shutdown.
    struct FlakySource {
        failures: u32,
        runs: AtomicU32,
        body: Vec<u8>,
    }

    #[async_trait]
    impl MessageSource for FlakySource {
        async fn consume(&self, router: &Router, shutdown: &CancellationToken) -> Result<()> {
            let run = self.runs.fetch_add(1, Ordering::SeqCst);
            if run < self.failures {
                anyhow::bail!("connection refused");
            }
            router.route(&self.body).await;
            shutdown.cancelled().await;
            Ok(())
        }

        fn describe(&self) -> String {
            "flaky".to_string()
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RestartPolicy {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(10),
        };
        assert_eq!(policy.delay(0), Duration::from_secs(1));
        assert_eq!(policy.delay(1), Duration::from_secs(2));
        assert_eq!(policy.delay(3), Duration::from_secs(8));
        assert_eq!(policy.delay(4), Duration::from_secs(10));
        assert_eq!(policy.delay(u32::MAX), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_restarts_after_failures_then_processes() {
        let sink = Arc::new(RecordingPublisher::new());
        let source = Arc::new(FlakySource {
            failures: 3,
            runs: AtomicU32::new(0),
            body: br#"{"pattern":"post.created","data":{"id":"p1","title":"t","content":"c"}}"#
                .to_vec(),
        });
        let shutdown = CancellationToken::new();
        let handle = spawn_consumer(
            source.clone(),
            router(sink.clone()),
            fast_policy(),
            shutdown.clone(),
        );

        for _ in 0..200 {
            if sink.count() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        shutdown.cancel();
        let restarts = handle.await.unwrap();

        assert_eq!(restarts, 3);
        assert_eq!(source.runs.load(Ordering::SeqCst), 4);
        assert_eq!(sink.count(), 1);
    }

    struct EndingSource {
        runs: AtomicU32,
    }

    #[async_trait]
    impl MessageSource for EndingSource {
        async fn consume(&self, _router: &Router, _shutdown: &CancellationToken) -> Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn describe(&self) -> String {
            "ending".to_string()
        }
    }

    #[tokio::test]
    async fn test_clean_stream_end_is_restarted() {
        let source = Arc::new(EndingSource {
            runs: AtomicU32::new(0),
        });
        let shutdown = CancellationToken::new();
        let handle = spawn_consumer(
            source.clone(),
            router(Arc::new(RecordingPublisher::new())),
            fast_policy(),
            shutdown.clone(),
        );

        for _ in 0..200 {
            if source.runs.load(Ordering::SeqCst) >= 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        shutdown.cancel();
        handle.await.unwrap();

        assert!(source.runs.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_stops_after_first_run() {
        let source = Arc::new(EndingSource {
            runs: AtomicU32::new(0),
        });
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        let restarts = spawn_consumer(
            source.clone(),
            router(Arc::new(RecordingPublisher::new())),
            fast_policy(),
            shutdown,
        )
        .await
        .unwrap();

        assert_eq!(restarts, 0);
        assert_eq!(source.runs.load(Ordering::SeqCst), 1);
    }
}
