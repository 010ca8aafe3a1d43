use std::{fmt, sync::Arc, time::Duration};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::{
    capture::{CaptureError, ScreenCapturer},
    classifier::{Classification, ClassifyError, TaskClassifier, Verdict},
    overlay::{LockOutcome, Lockout, OverlayError},
    utils::clock::Clock,
};

/// Why a single check didn't produce a verdict. None of these stop the loop.
#[derive(Debug)]
pub enum TickFailure {
    Capture(CaptureError),
    Classify(ClassifyError),
}

impl fmt::Display for TickFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TickFailure::Capture(e) => e.fmt(f),
            TickFailure::Classify(e) => e.fmt(f),
        }
    }
}

impl From<CaptureError> for TickFailure {
    fn from(value: CaptureError) -> Self {
        TickFailure::Capture(value)
    }
}

impl From<ClassifyError> for TickFailure {
    fn from(value: ClassifyError) -> Self {
        TickFailure::Classify(value)
    }
}

/// Captures, classifies and locks, one tick at a time. A tick always runs to completion, lockout
/// included, before the next one is scheduled.
pub struct PollLoop {
    task: Arc<str>,
    interval: Duration,
    capturer: Box<dyn ScreenCapturer>,
    classifier: Box<dyn TaskClassifier>,
    lockout: Box<dyn Lockout>,
    shutdown: CancellationToken,
    clock: Box<dyn Clock>,
}

impl PollLoop {
    pub fn new(
        task: Arc<str>,
        interval: Duration,
        capturer: Box<dyn ScreenCapturer>,
        classifier: Box<dyn TaskClassifier>,
        lockout: Box<dyn Lockout>,
        shutdown: CancellationToken,
        clock: Box<dyn Clock>,
    ) -> Self {
        Self {
            task,
            interval,
            capturer,
            classifier,
            lockout,
            shutdown,
            clock,
        }
    }

    async fn check(&mut self) -> Result<Classification, TickFailure> {
        let screenshot = self.capturer.capture()?;
        debug!("Took screenshot {:?}", screenshot);
        let classification = self.classifier.classify(&screenshot, &self.task).await?;
        Ok(classification)
    }

    /// Executes the poll loop until shutdown. Only a broken overlay ends it with an error.
    pub async fn run(mut self) -> Result<(), OverlayError> {
        let shutdown = self.shutdown.clone();
        let mut check_point = self.clock.instant();
        let mut tick = 0u64;
        let mut consecutive_failures = 0u32;

        loop {
            tick += 1;
            check_point += self.interval;

            let span = info_span!("Checking screen", tick, at = %self.clock.time());
            let result = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Ok(()),
                result = self.check().instrument(span) => result,
            };

            match result {
                Ok(Classification {
                    verdict: Verdict::OnTask,
                    ..
                }) => {
                    consecutive_failures = 0;
                    debug!(tick, "On task");
                }
                Ok(Classification {
                    verdict: Verdict::OffTask,
                    rationale,
                }) => {
                    consecutive_failures = 0;
                    info!(tick, ?rationale, "Off task, locking the screen");
                    let outcome = self
                        .lockout
                        .lock(&self.task)
                        .await
                        .inspect_err(|e| error!("Lock screen failed {e:?}"))?;
                    match outcome {
                        LockOutcome::Unlocked { failed_attempts } => {
                            info!(failed_attempts, "Screen unlocked");
                            // The user gets a full interval after unlocking.
                            check_point = self.clock.instant() + self.interval;
                        }
                        LockOutcome::Interrupted => return Ok(()),
                    }
                }
                Err(e) => {
                    consecutive_failures += 1;
                    warn!(tick, consecutive_failures, "Skipping check: {e}");
                }
            }

            // A tick that overran its slot starts the next one right away, without a backlog.
            check_point = check_point.max(self.clock.instant());
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Ok(()),
                _ = self.clock.sleep_until(check_point) => ()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicBool, AtomicUsize, Ordering},
            Arc, Mutex,
        },
        time::Duration,
    };

    use async_trait::async_trait;
    use chrono::Utc;
    use tokio_util::sync::CancellationToken;

    use crate::{
        capture::{CaptureError, MockScreenCapturer, ScreenCapturer, Screenshot},
        classifier::{Classification, ClassifyError, MockTaskClassifier, TaskClassifier},
        overlay::{LockOutcome, Lockout, MockLockout, OverlayError},
        utils::{clock::DefaultClock, logging::TEST_LOGGING},
    };

    use super::PollLoop;

    const INTERVAL: Duration = Duration::from_secs(60);
    const TASK: &str = "writing my thesis";

    fn screenshot() -> Screenshot {
        Screenshot {
            png: vec![0; 16],
            width: 4,
            height: 4,
            taken_at: Utc::now(),
        }
    }

    fn poll_loop(
        capturer: impl ScreenCapturer + 'static,
        classifier: impl TaskClassifier + 'static,
        lockout: impl Lockout + 'static,
        shutdown: &CancellationToken,
    ) -> PollLoop {
        PollLoop::new(
            TASK.into(),
            INTERVAL,
            Box::new(capturer),
            Box::new(classifier),
            Box::new(lockout),
            shutdown.clone(),
            Box::new(DefaultClock),
        )
    }

    async fn cancel_after(shutdown: &CancellationToken, after: Duration) {
        tokio::time::sleep(after).await;
        shutdown.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn failed_checks_do_not_stop_the_loop() {
        *TEST_LOGGING;
        let mut capturer = MockScreenCapturer::new();
        let mut captures = 0;
        capturer.expect_capture().times(5).returning(move || {
            captures += 1;
            if captures == 1 {
                Err(CaptureError::PermissionDenied("screen recording".into()))
            } else {
                Ok(screenshot())
            }
        });

        let mut classifier = MockTaskClassifier::new();
        let mut calls = 0;
        classifier.expect_classify().times(4).returning(move |_, _| {
            calls += 1;
            if calls % 2 == 0 {
                Err(ClassifyError::ModelUnavailable("connection refused".into()))
            } else {
                Err(ClassifyError::MalformedResponse("perhaps".into()))
            }
        });

        let mut lockout = MockLockout::new();
        lockout.expect_lock().never();

        let shutdown = CancellationToken::new();
        let poll = poll_loop(capturer, classifier, lockout, &shutdown);
        let (result, _) = tokio::join!(
            poll.run(),
            cancel_after(&shutdown, INTERVAL * 4 + Duration::from_secs(1))
        );
        result.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn on_task_never_locks() {
        let mut capturer = MockScreenCapturer::new();
        capturer.expect_capture().times(3).returning(|| Ok(screenshot()));
        let mut classifier = MockTaskClassifier::new();
        classifier
            .expect_classify()
            .withf(|_, task| task.to_string() == TASK)
            .times(3)
            .returning(|_, _| Ok(Classification::on_task()));
        let mut lockout = MockLockout::new();
        lockout.expect_lock().never();

        let shutdown = CancellationToken::new();
        let poll = poll_loop(capturer, classifier, lockout, &shutdown);
        let (result, _) = tokio::join!(
            poll.run(),
            cancel_after(&shutdown, INTERVAL * 2 + Duration::from_secs(1))
        );
        result.unwrap();
    }

    /// Takes 30 seconds to answer the first few times, like a model behind a slow connection.
    struct SlowClassifier {
        start: tokio::time::Instant,
        slow_calls: usize,
        calls: Arc<Mutex<Vec<Duration>>>,
    }

    #[async_trait]
    impl TaskClassifier for SlowClassifier {
        async fn classify(
            &self,
            _: &Screenshot,
            _: &str,
        ) -> Result<Classification, ClassifyError> {
            let call = {
                let mut calls = self.calls.lock().unwrap();
                calls.push(self.start.elapsed());
                calls.len()
            };
            if call <= self.slow_calls {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            Ok(Classification::on_task())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_checks_do_not_cause_a_burst_of_catch_up_checks() {
        let mut capturer = MockScreenCapturer::new();
        capturer.expect_capture().returning(|| Ok(screenshot()));
        let calls = Arc::new(Mutex::new(Vec::new()));
        let classifier = SlowClassifier {
            start: tokio::time::Instant::now(),
            slow_calls: 3,
            calls: calls.clone(),
        };
        let mut lockout = MockLockout::new();
        lockout.expect_lock().never();

        let shutdown = CancellationToken::new();
        let poll = PollLoop::new(
            TASK.into(),
            Duration::from_secs(5),
            Box::new(capturer),
            Box::new(classifier),
            Box::new(lockout),
            shutdown.clone(),
            Box::new(DefaultClock),
        );
        let (result, _) = tokio::join!(
            poll.run(),
            cancel_after(&shutdown, Duration::from_secs(101))
        );
        result.unwrap();

        let seconds: Vec<u64> = calls.lock().unwrap().iter().map(|d| d.as_secs()).collect();
        assert_eq!(seconds, vec![0, 30, 60, 90, 95, 100]);
    }

    /// Stays locked for a while, like a user taking their time to type.
    struct SlowLockout {
        locked: Arc<AtomicBool>,
        locks: Arc<AtomicUsize>,
        shutdown: CancellationToken,
    }

    #[async_trait]
    impl Lockout for SlowLockout {
        async fn lock(&mut self, task: &str) -> Result<LockOutcome, OverlayError> {
            assert_eq!(task, TASK);
            assert!(!self.locked.swap(true, Ordering::SeqCst));
            self.locks.fetch_add(1, Ordering::SeqCst);
            let outcome = tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(90)) => {
                    LockOutcome::Unlocked { failed_attempts: 1 }
                }
                _ = self.shutdown.cancelled() => LockOutcome::Interrupted,
            };
            self.locked.store(false, Ordering::SeqCst);
            Ok(outcome)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn off_task_locks_once_per_tick_and_pauses_checks() {
        let locked = Arc::new(AtomicBool::new(false));
        let locks = Arc::new(AtomicUsize::new(0));
        let captures = Arc::new(AtomicUsize::new(0));

        let mut capturer = MockScreenCapturer::new();
        {
            let locked = locked.clone();
            let captures = captures.clone();
            capturer.expect_capture().returning(move || {
                assert!(!locked.load(Ordering::SeqCst), "captured during a lockout");
                captures.fetch_add(1, Ordering::SeqCst);
                Ok(screenshot())
            });
        }
        let mut classifier = MockTaskClassifier::new();
        classifier
            .expect_classify()
            .returning(|_, _| Ok(Classification::off_task()));

        let shutdown = CancellationToken::new();
        let lockout = SlowLockout {
            locked: locked.clone(),
            locks: locks.clone(),
            shutdown: shutdown.clone(),
        };

        // Checks at 0s and 150s, each followed by a 90s lockout, then 300s.
        let poll = poll_loop(capturer, classifier, lockout, &shutdown);
        let (result, _) = tokio::join!(
            poll.run(),
            cancel_after(&shutdown, Duration::from_secs(301))
        );
        result.unwrap();

        assert_eq!(captures.load(Ordering::SeqCst), 3);
        assert_eq!(locks.load(Ordering::SeqCst), 3);
        assert!(!locked.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn interrupted_lockout_ends_the_loop() {
        let mut capturer = MockScreenCapturer::new();
        capturer.expect_capture().times(1).returning(|| Ok(screenshot()));
        let mut classifier = MockTaskClassifier::new();
        classifier
            .expect_classify()
            .times(1)
            .returning(|_, _| Ok(Classification::off_task()));
        let mut lockout = MockLockout::new();
        lockout
            .expect_lock()
            .times(1)
            .returning(|_| Ok(LockOutcome::Interrupted));

        let shutdown = CancellationToken::new();
        poll_loop(capturer, classifier, lockout, &shutdown)
            .run()
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn overlay_failures_are_fatal() {
        let mut capturer = MockScreenCapturer::new();
        capturer.expect_capture().times(1).returning(|| Ok(screenshot()));
        let mut classifier = MockTaskClassifier::new();
        classifier
            .expect_classify()
            .times(1)
            .returning(|_, _| Ok(Classification::off_task()));
        let mut lockout = MockLockout::new();
        lockout
            .expect_lock()
            .returning(|_| Err(OverlayError::Render("no display".into())));

        let shutdown = CancellationToken::new();
        let result = poll_loop(capturer, classifier, lockout, &shutdown)
            .run()
            .await;
        assert!(matches!(result, Err(OverlayError::Render(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_before_the_first_tick() {
        let mut capturer = MockScreenCapturer::new();
        capturer.expect_capture().never();
        let mut lockout = MockLockout::new();
        lockout.expect_lock().never();

        let shutdown = CancellationToken::new();
        shutdown.cancel();
        poll_loop(capturer, MockTaskClassifier::new(), lockout, &shutdown)
            .run()
            .await
            .unwrap();
    }
}
