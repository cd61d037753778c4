//! Retry logic.
//!
//! # Responsibilities
//! - Re-run an operation after transient failures
//! - Wait a policy-dependent backoff between attempts
//! - Stop immediately on non-transient failures
//!
//! # Design Decisions
//! - `retry_count = N` allows N retries after the first attempt
//! - The error of the last attempt is the one returned
//! - Backoff waits are cancellable; the operation itself is not

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::observability::metrics;
use crate::resilience::backoff::RetryPolicy;
use crate::resilience::error::{classify, ErrorClass, ExecutionError, Transient};

/// Retry configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RetryOptions {
    pub policy: RetryPolicy,
    /// Retries allowed after the initial attempt.
    pub retry_count: u32,
    /// Base delay between attempts.
    pub interval: Duration,
    /// Upper bound on a single delay.
    #[serde(default)]
    pub max_interval: Option<Duration>,
}

impl RetryOptions {
    pub fn new(policy: RetryPolicy, retry_count: u32, interval: Duration) -> Self {
        Self {
            policy,
            retry_count,
            interval,
            max_interval: None,
        }
    }

    pub fn linear(retry_count: u32, interval: Duration) -> Self {
        Self::new(RetryPolicy::Linear, retry_count, interval)
    }

    pub fn exponential(retry_count: u32, interval: Duration) -> Self {
        Self::new(RetryPolicy::Exponential, retry_count, interval)
    }

    pub fn with_max_interval(mut self, max_interval: Duration) -> Self {
        self.max_interval = Some(max_interval);
        self
    }

    /// Delay before retry `attempt` (1-indexed).
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.policy.backoff(attempt, self.interval, self.max_interval)
    }

    /// Maximum number of operation invocations.
    pub fn max_attempts(&self) -> u32 {
        self.retry_count.saturating_add(1)
    }
}

/// Runs an operation until it succeeds, fails permanently, or runs out of retries.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    options: RetryOptions,
    cancel: Option<CancellationToken>,
}

impl RetryExecutor {
    pub fn new(options: RetryOptions) -> Self {
        Self {
            options,
            cancel: None,
        }
    }

    /// Abort pending backoff waits when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn options(&self) -> &RetryOptions {
        &self.options
    }

    pub async fn execute<F, Fut, T, E>(&self, mut op: F) -> Result<T, ExecutionError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Transient,
    {
        let mut attempts: u32 = 0;

        loop {
            if self.is_cancelled() {
                return Err(ExecutionError::Cancelled { attempts });
            }

            let err = match op().await {
                Ok(value) => {
                    metrics::record_attempt(true);
                    return Ok(value);
                }
                Err(err) => {
                    metrics::record_attempt(false);
                    err
                }
            };
            attempts += 1;

            let kind = match classify(&err) {
                ErrorClass::Transient(kind) => kind,
                ErrorClass::NonTransient => {
                    tracing::debug!(attempt = attempts, "Non-transient failure, not retrying");
                    return Err(ExecutionError::Operation(err));
                }
            };

            if attempts > self.options.retry_count {
                tracing::debug!(
                    attempts,
                    retry_count = self.options.retry_count,
                    kind = %kind,
                    "Retries exhausted"
                );
                return Err(ExecutionError::Operation(err));
            }

            let delay = self.options.backoff(attempts);
            tracing::debug!(
                attempt = attempts,
                policy = %self.options.policy,
                kind = %kind,
                delay = ?delay,
                "Retrying after transient failure"
            );
            metrics::record_retry(self.options.policy.as_str());

            if !self.wait(delay).await {
                tracing::debug!(attempts, "Backoff cancelled");
                return Err(ExecutionError::Cancelled { attempts });
            }
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled)
    }

    /// Sleep for `delay`. Returns false if cancelled first.
    async fn wait(&self, delay: Duration) -> bool {
        match &self.cancel {
            Some(token) => {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => true,
                    _ = token.cancelled() => false,
                }
            }
            None => {
                tokio::time::sleep(delay).await;
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn transient() -> io::Error {
        io::Error::new(io::ErrorKind::TimedOut, "timed out")
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_after_transient_failures() {
        let calls = &AtomicU32::new(0);
        let executor = RetryExecutor::new(RetryOptions::linear(3, Duration::from_millis(100)));
        let start = Instant::now();

        let result = executor
            .execute(move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(transient())
                } else {
                    Ok("rate")
                }
            })
            .await;

        assert_eq!(result.unwrap(), "rate");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(200) && elapsed < Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retry_count_runs_once() {
        let calls = &AtomicU32::new(0);
        let executor = RetryExecutor::new(RetryOptions::linear(0, Duration::from_secs(1)));

        let result: Result<(), _> = executor
            .execute(move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(transient())
            })
            .await;

        assert!(result.unwrap_err().operation().is_some());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exponential_delays() {
        let calls = &AtomicU32::new(0);
        let executor = RetryExecutor::new(RetryOptions::exponential(3, Duration::from_secs(1)));
        let start = Instant::now();

        let _: Result<(), _> = executor
            .execute(move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(transient())
            })
            .await;

        // 1s + 2s + 4s
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(7) && elapsed < Duration::from_millis(7050));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_cancelled_token() {
        let token = CancellationToken::new();
        token.cancel();
        let executor =
            RetryExecutor::new(RetryOptions::linear(3, Duration::from_secs(1))).with_cancellation(token);

        let result: Result<(), ExecutionError<io::Error>> = executor.execute(move || async move { Ok(()) }).await;
        assert!(matches!(result, Err(ExecutionError::Cancelled { attempts: 0 })));
    }
}
