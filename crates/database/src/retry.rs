//! Classification-driven retry with exponential backoff.
//!
//! The wrapped operation is attempted at most `max_attempts` times. Between
//! attempt `i` and `i + 1` the caller's task sleeps `base_delay * 2^i`; the
//! sleep suspends only that task. Errors the policy classifies as fatal are
//! returned untouched on first sight.

use crate::error::{DbError, Retryability};
use configuration::RetrySettings;
use std::future::Future;
use std::time::Duration;

/// How often, and on what, to retry. Immutable per call.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub classifier: fn(&DbError) -> Retryability,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(100))
    }
}

impl RetryPolicy {
    /// A policy using the built-in classification table. `max_attempts` is clamped to at least 1.
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            classifier: DbError::retryability,
        }
    }

    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self::new(settings.max_attempts, settings.base_delay())
    }

    pub fn with_classifier(mut self, classifier: fn(&DbError) -> Retryability) -> Self {
        self.classifier = classifier;
        self
    }

    /// Backoff slept after the failed attempt with index `attempt_index` (0-based).
    pub fn delay_for(&self, attempt_index: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt_index))
    }

    /// Upper bound on the total time spent sleeping: `base_delay * (2^max_attempts - 1)`.
    pub fn max_total_backoff(&self) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(self.max_attempts).saturating_sub(1))
    }
}

/// Runs `operation` under `policy`.
///
/// Returns the first success, the first fatal error as-is, or
/// [`DbError::RetryExhausted`] carrying the attempt count and the last cause.
pub async fn execute_with_retry<T, F, Fut>(operation: F, policy: RetryPolicy) -> Result<T, DbError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, DbError>>,
{
    execute_with_retry_until(operation, policy, std::future::pending::<()>()).await
}

/// Like [`execute_with_retry`], but gives up with [`DbError::Cancelled`] as soon
/// as `cancel` resolves, whether an attempt or a backoff sleep is in flight.
pub async fn execute_with_retry_until<T, F, Fut, C>(
    mut operation: F,
    policy: RetryPolicy,
    cancel: C,
) -> Result<T, DbError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, DbError>>,
    C: Future<Output = ()>,
{
    tokio::pin!(cancel);
    let max_attempts = policy.max_attempts.max(1);
    let mut attempts: u32 = 0;

    loop {
        let result = tokio::select! {
            biased;
            _ = &mut cancel => return Err(DbError::Cancelled),
            result = operation() => result,
        };
        attempts += 1;

        let err = match result {
            Ok(value) => {
                if attempts > 1 {
                    tracing::info!(attempts, "Database operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        if (policy.classifier)(&err) == Retryability::Fatal {
            return Err(err);
        }

        if attempts >= max_attempts {
            tracing::error!(attempts, error = %err, "Database operation retries exhausted");
            return Err(DbError::RetryExhausted {
                attempts,
                last: Box::new(err),
            });
        }

        let delay = policy.delay_for(attempts - 1);
        tracing::warn!(
            attempt = attempts,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            kind = %err.kind(),
            "Retryable database error, backing off"
        );

        tokio::select! {
            biased;
            _ = &mut cancel => return Err(DbError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    /// Records when each attempt started.
    #[derive(Clone, Default)]
    struct Attempts {
        count: Arc<AtomicU32>,
        started: Arc<Mutex<Vec<Instant>>>,
    }

    impl Attempts {
        fn record(&self) -> u32 {
            self.started.lock().unwrap().push(Instant::now());
            self.count.fetch_add(1, Ordering::SeqCst)
        }

        fn count(&self) -> u32 {
            self.count.load(Ordering::SeqCst)
        }

        fn gaps(&self) -> Vec<Duration> {
            let started = self.started.lock().unwrap();
            started.windows(2).map(|w| w[1] - w[0]).collect()
        }
    }

    /// Paused-clock timers fire on millisecond ticks, so allow a tick of slack.
    fn assert_close(actual: Duration, expected: Duration) {
        assert!(
            actual >= expected && actual <= expected + Duration::from_millis(5),
            "expected ~{:?}, got {:?}",
            expected,
            actual
        );
    }

    fn serialization_failure() -> DbError {
        DbError::operation(ErrorKind::SerializationFailure, "could not serialize access")
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_third_attempt_after_two_backoffs() {
        let attempts = Attempts::default();
        let policy = RetryPolicy::new(3, Duration::from_millis(100));

        let tracker = attempts.clone();
        let result = execute_with_retry(
            move || {
                let n = tracker.record();
                async move {
                    if n < 2 {
                        Err(serialization_failure())
                    } else {
                        Ok("saved")
                    }
                }
            },
            policy,
        )
        .await;

        assert_eq!(result.unwrap(), "saved");
        assert_eq!(attempts.count(), 3);
        let gaps = attempts.gaps();
        assert_eq!(gaps.len(), 2);
        assert_close(gaps[0], Duration::from_millis(100));
        assert_close(gaps[1], Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_budget_when_every_attempt_is_retryable() {
        let attempts = Attempts::default();
        let tracker = attempts.clone();
        let start = Instant::now();

        let err = execute_with_retry(
            move || {
                tracker.record();
                async { Err::<(), _>(DbError::operation(ErrorKind::Deadlock, "deadlock detected")) }
            },
            RetryPolicy::new(4, Duration::from_millis(10)),
        )
        .await
        .unwrap_err();

        assert_eq!(attempts.count(), 4);
        match err {
            DbError::RetryExhausted { attempts, last } => {
                assert_eq!(attempts, 4);
                assert_eq!(last.kind(), ErrorKind::Deadlock);
            }
            other => panic!("expected RetryExhausted, got {:?}", other),
        }
        // 10 + 20 + 40; no sleep after the final attempt.
        assert_close(start.elapsed(), Duration::from_millis(70));
        assert!(start.elapsed() <= RetryPolicy::new(4, Duration::from_millis(10)).max_total_backoff());
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_errors_propagate_immediately() {
        let attempts = Attempts::default();
        let tracker = attempts.clone();
        let start = Instant::now();

        let err = execute_with_retry(
            move || {
                tracker.record();
                async { Err::<(), _>(DbError::operation(ErrorKind::Fatal, "duplicate key value")) }
            },
            RetryPolicy::default(),
        )
        .await
        .unwrap_err();

        assert_eq!(attempts.count(), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert!(matches!(err, DbError::Operation { kind: ErrorKind::Fatal, .. }));
        assert!(err.to_string().contains("duplicate key value"));
    }

    #[tokio::test(start_paused = true)]
    async fn not_found_is_never_retried() {
        let attempts = Attempts::default();
        let tracker = attempts.clone();

        let err = execute_with_retry(
            move || {
                tracker.record();
                async { Err::<(), _>(DbError::NotFound) }
            },
            RetryPolicy::default(),
        )
        .await
        .unwrap_err();

        assert_eq!(attempts.count(), 1);
        assert!(matches!(err, DbError::NotFound));
    }

    #[tokio::test(start_paused = true)]
    async fn single_attempt_policy_wraps_retryable_failure() {
        let err = execute_with_retry(
            || async { Err::<(), _>(DbError::operation(ErrorKind::ServerDisconnect, "terminating connection")) },
            RetryPolicy::new(0, Duration::from_millis(100)),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, DbError::RetryExhausted { attempts: 1, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn custom_classifier_overrides_the_table() {
        let attempts = Attempts::default();
        let tracker = attempts.clone();
        let policy = RetryPolicy::default().with_classifier(|_| Retryability::Fatal);

        let err = execute_with_retry(
            move || {
                tracker.record();
                async { Err::<(), _>(serialization_failure()) }
            },
            policy,
        )
        .await
        .unwrap_err();

        assert_eq!(attempts.count(), 1);
        assert_eq!(err.kind(), ErrorKind::SerializationFailure);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_backoff() {
        let attempts = Attempts::default();
        let tracker = attempts.clone();
        let start = Instant::now();

        let err = execute_with_retry_until(
            move || {
                tracker.record();
                async { Err::<(), _>(DbError::operation(ErrorKind::OperationTimeout, "statement timeout")) }
            },
            RetryPolicy::new(5, Duration::from_millis(100)),
            tokio::time::sleep(Duration::from_millis(150)),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, DbError::Cancelled));
        // Attempts at 0ms and 100ms; cancelled halfway through the 200ms backoff.
        assert_eq!(attempts.count(), 2);
        assert_close(start.elapsed(), Duration::from_millis(150));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_backoffs_do_not_serialise() {
        let start = Instant::now();
        let run = || {
            let attempts = Attempts::default();
            execute_with_retry(
                move || {
                    let n = attempts.record();
                    async move {
                        if n == 0 {
                            Err(DbError::operation(ErrorKind::ConnectionTimeout, "pool timed out"))
                        } else {
                            Ok(n)
                        }
                    }
                },
                RetryPolicy::new(2, Duration::from_millis(100)),
            )
        };

        let (a, b) = tokio::join!(run(), run());
        assert_eq!(a.unwrap(), 1);
        assert_eq!(b.unwrap(), 1);
        assert_close(start.elapsed(), Duration::from_millis(100));
    }

    #[test]
    fn delay_doubles_per_attempt() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100));
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
        assert_eq!(policy.max_total_backoff(), Duration::from_millis(700));
    }

    #[test]
    fn settings_map_onto_policy() {
        let policy = RetryPolicy::from_settings(&RetrySettings {
            max_attempts: 5,
            base_delay_ms: 250,
        });
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.base_delay, Duration::from_millis(250));
    }
}
