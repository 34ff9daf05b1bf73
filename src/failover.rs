//! The failover strategy engine (C7): retries a fallible operation against the classification in
//! [`Error::is_retryable`](crate::error::Error), backing off according to a caller-supplied delay
//! curve, per spec §4.7.
//!
//! Grounded on the retry loop in the teacher driver's `client/executor.rs`
//! (`execute_operation_with_retry`), but spec §4.7 closes the backoff curve down to a concrete
//! `(initial_delay, retries, delay_factor)` triple rather than the teacher's single-retry CMAP
//! rule, so the loop here is rewritten around that triple instead of adapted line-by-line.

use std::{future::Future, time::Duration};

use tokio::time::Instant;

use crate::error::{Error, ErrorKind, Result};

/// A backoff curve plus a retry budget, per spec §4.7.
///
/// `delay_factor` maps a zero-based attempt number (the *n*th retry, not counting the first try)
/// to a multiplier applied to `initial_delay`. A constant-backoff strategy uses `|_| 1.0`; linear
/// backoff uses `|n| (n + 1) as f64`; exponential backoff uses `|n| 2f64.powi(n as i32)`.
#[derive(Clone, Copy)]
pub struct FailoverStrategy {
    pub initial_delay: Duration,
    pub retries: usize,
    pub delay_factor: fn(usize) -> f64,
}

impl FailoverStrategy {
    /// A strategy that never retries; the first failure is returned as-is.
    pub const fn none() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            retries: 0,
            delay_factor: |_| 1.0,
        }
    }

    /// The backoff delay before the given 1-based retry attempt (the spec's own indexing: the
    /// first retry is attempt 1, not 0).
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let multiplier = (self.delay_factor)(attempt);
        Duration::from_secs_f64(self.initial_delay.as_secs_f64() * multiplier.max(0.0))
    }

    /// The wall-clock instant by which every scheduled retry must have completed, counting from
    /// `start`: the sum of every attempt's backoff delay. An operation still outstanding past this
    /// point has exhausted its budget regardless of how many retries remain, per spec §4.7's
    /// `Timeout` classification.
    pub fn deadline(&self, start: Instant) -> Instant {
        let total: Duration = (1..=self.retries).map(|n| self.delay_for_attempt(n)).sum();
        start + total
    }

    /// Runs `operation` until it succeeds, its error is classified non-retryable, the retry
    /// budget is exhausted, or the deadline computed from `start` elapses.
    ///
    /// `operation` receives the zero-based attempt number (0 for the first try) and must return a
    /// fresh future each call, since most operations aren't literally re-runnable without
    /// rebuilding their command (e.g. a retried write needs a fresh `txnNumber`). Internally the
    /// *n*th retry's backoff is computed as `delay_factor(n)` with `n` 1-based, per spec §4.7's
    /// `sleep(strategy.initial_delay * strategy.delay_factor(attempt))` where `attempt` has
    /// already been incremented.
    pub async fn retry<F, Fut, T>(&self, start: Instant, mut operation: F) -> Result<T>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let deadline = self.deadline(start);
        let mut attempt = 0;
        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if attempt >= self.retries || !err.is_retryable() {
                        crate::trace::debug!(attempt, retryable = err.is_retryable(), "giving up retrying");
                        return Err(err);
                    }
                    if Instant::now() >= deadline {
                        crate::trace::warn!(attempt, "retry deadline elapsed");
                        return Err(Error::from(ErrorKind::Timeout).with_source(err));
                    }
                    let delay = self.delay_for_attempt(attempt + 1);
                    crate::trace::debug!(attempt, delay_ms = %delay.as_millis(), "retrying after backoff");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::error::CommandError;

    fn retryable_error() -> Error {
        ErrorKind::Command(CommandError {
            code: 91, // ShutdownInProgress, in the published retryable set.
            code_name: "ShutdownInProgress".into(),
            message: "shutting down".into(),
        })
        .into()
    }

    fn non_retryable_error() -> Error {
        Error::invalid_argument("bad filter")
    }

    #[tokio::test]
    async fn succeeds_without_retrying_on_first_success() {
        let strategy = FailoverStrategy {
            initial_delay: Duration::from_millis(1),
            retries: 3,
            delay_factor: |n| (n + 1) as f64,
        };
        let calls = AtomicUsize::new(0);
        let result = strategy
            .retry(Instant::now(), |_attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, Error>(42) }
            })
            .await
            .unwrap();
        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_exactly_the_configured_budget_on_retryable_errors() {
        let strategy = FailoverStrategy {
            initial_delay: Duration::from_millis(1),
            retries: 2,
            delay_factor: |_| 1.0,
        };
        let calls = AtomicUsize::new(0);
        let err = strategy
            .retry(Instant::now(), |_attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<i32, _>(retryable_error()) }
            })
            .await
            .unwrap_err();
        // One initial attempt plus two retries.
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(err.code(), Some(91));
    }

    #[tokio::test]
    async fn does_not_retry_non_retryable_errors() {
        let strategy = FailoverStrategy {
            initial_delay: Duration::from_millis(1),
            retries: 5,
            delay_factor: |_| 1.0,
        };
        let calls = AtomicUsize::new(0);
        let _ = strategy
            .retry(Instant::now(), |_attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<i32, _>(non_retryable_error()) }
            })
            .await
            .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn none_strategy_has_zero_retry_budget() {
        assert_eq!(FailoverStrategy::none().retries, 0);
    }

    // Spec §8 scenario 1 (failover accumulation): with `factor = n -> 2n`, a run of 20 retries
    // must call the factor with exactly n = 1..20, yielding [2, 4, .., 40].
    static RECORDED: std::sync::Mutex<Vec<usize>> = std::sync::Mutex::new(Vec::new());

    fn doubling_factor(n: usize) -> f64 {
        RECORDED.lock().unwrap().push(n);
        (2 * n) as f64
    }

    #[tokio::test]
    async fn failover_accumulation_matches_scenario_one() {
        RECORDED.lock().unwrap().clear();
        let strategy = FailoverStrategy {
            initial_delay: Duration::from_millis(50),
            retries: 20,
            delay_factor: doubling_factor,
        };
        let _ = strategy
            .retry(Instant::now(), |_attempt| async { Err::<(), _>(retryable_error()) })
            .await
            .unwrap_err();
        let recorded = RECORDED.lock().unwrap().clone();
        assert_eq!(recorded, (1..=20).collect::<Vec<_>>());
        let doubled: Vec<usize> = recorded.iter().map(|n| 2 * n).collect();
        assert_eq!(doubled, vec![2, 4, 6, 8, 10, 12, 14, 16, 18, 20, 22, 24, 26, 28, 30, 32, 34, 36, 38, 40]);
    }
}
