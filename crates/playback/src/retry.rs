// Retrying request client: deadline per attempt, exponential backoff, cancellation.
//
// Stateless: every `execute` call owns its own attempt counter.

use std::future::Future;
use std::time::Duration;

use rand::RngExt;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Per-attempt ceiling used unless a policy overrides it.
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts (not counting the initial attempt).
    pub max_retries: u32,
    /// Base delay between retries. Actual delay = base * 2^attempt.
    pub base_delay: Duration,
    /// Hard cap on the computed delay.
    pub max_delay: Duration,
    /// Deadline for a single attempt.
    pub attempt_timeout: Duration,
    /// Adds random jitter of [0, base_delay/2), still bounded by `max_delay`.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            jitter: false,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Compute the delay after a failed attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        // Attempts >= 32 saturate instead of overflowing the shift.
        let multiplier = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        let capped = self
            .base_delay
            .checked_mul(multiplier)
            .unwrap_or(self.max_delay)
            .min(self.max_delay);

        if !self.jitter {
            return capped;
        }

        let jitter_range_ms = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX) / 2;
        let remaining_ms =
            u64::try_from(self.max_delay.saturating_sub(capped).as_millis()).unwrap_or(0);
        let jitter_limit_ms = jitter_range_ms.min(remaining_ms);
        if jitter_limit_ms == 0 {
            return capped;
        }

        let jitter_ms = rand::rng().random_range(0..jitter_limit_ms);
        (capped + Duration::from_millis(jitter_ms)).min(self.max_delay)
    }

    /// Sum of all backoff sleeps when every attempt fails (jitter excluded).
    pub fn total_backoff(&self) -> Duration {
        (0..self.max_retries)
            .map(|attempt| {
                let multiplier = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
                self.base_delay
                    .checked_mul(multiplier)
                    .unwrap_or(self.max_delay)
                    .min(self.max_delay)
            })
            .sum()
    }
}

/// Why a single attempt did not produce a value.
#[derive(Debug, Error)]
pub enum AttemptError<E> {
    #[error("attempt timed out after {}ms", .0.as_millis())]
    TimedOut(Duration),

    #[error("{0}")]
    Failed(#[source] E),
}

#[derive(Debug, Error)]
pub enum RetryError<E> {
    #[error("operation cancelled")]
    Cancelled,

    #[error("exhausted {attempts} attempts, last error: {last}")]
    ExhaustedRetries {
        attempts: u32,
        #[source]
        last: AttemptError<E>,
    },
}

impl<E> RetryError<E> {
    /// Attempts made before giving up (0 when cancelled).
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Cancelled => 0,
            Self::ExhaustedRetries { attempts, .. } => *attempts,
        }
    }
}

/// Execute an async operation with a per-attempt deadline and backoff.
///
/// `operation` receives the 0-indexed attempt number. An attempt that misses
/// `policy.attempt_timeout` counts as failed and its future is dropped, so a
/// late result can never be observed. Cancellation is honored before every
/// attempt, while an attempt is running, and during backoff sleeps.
pub async fn execute<F, Fut, T, E>(
    policy: &RetryPolicy,
    token: &CancellationToken,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0u32;
    loop {
        if token.is_cancelled() {
            return Err(RetryError::Cancelled);
        }

        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(RetryError::Cancelled),
            outcome = tokio::time::timeout(policy.attempt_timeout, operation(attempt)) => outcome,
        };

        let err = match outcome {
            Ok(Ok(value)) => {
                if attempt > 0 {
                    debug!(attempt = attempt + 1, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Ok(Err(e)) => AttemptError::Failed(e),
            Err(_) => AttemptError::TimedOut(policy.attempt_timeout),
        };

        if attempt >= policy.max_retries {
            return Err(RetryError::ExhaustedRetries {
                attempts: attempt + 1,
                last: err,
            });
        }

        let delay = policy.delay_for_attempt(attempt);
        warn!(
            attempt = attempt + 1,
            max_attempts = policy.max_retries + 1,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Retrying after failed attempt"
        );
        tokio::select! {
            _ = token.cancelled() => return Err(RetryError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            attempt_timeout: Duration::from_secs(10),
            jitter: false,
        }
    }

    #[test]
    fn delay_without_jitter_is_deterministic() {
        let policy = policy(3);
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(800));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(40), Duration::from_secs(1));
    }

    #[test]
    fn jitter_never_exceeds_max_delay() {
        let policy = RetryPolicy {
            jitter: true,
            ..policy(3)
        };
        for attempt in 0..12 {
            for _ in 0..16 {
                let delay = policy.delay_for_attempt(attempt);
                assert!(delay <= policy.max_delay);
                assert!(delay >= policy.delay_for_attempt_without_jitter(attempt));
            }
        }
    }

    impl RetryPolicy {
        fn delay_for_attempt_without_jitter(&self, attempt: u32) -> Duration {
            RetryPolicy {
                jitter: false,
                ..self.clone()
            }
            .delay_for_attempt(attempt)
        }
    }

    #[test]
    fn total_backoff_sums_capped_delays() {
        assert_eq!(policy(0).total_backoff(), Duration::ZERO);
        assert_eq!(policy(2).total_backoff(), Duration::from_millis(300));
        assert_eq!(policy(5).total_backoff(), Duration::from_millis(2500));
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_last_attempt_after_backoff() {
        let policy = policy(3);
        let token = CancellationToken::new();
        let attempts = AtomicU32::new(0);
        let started = Instant::now();

        let result: Result<&str, RetryError<String>> = execute(&policy, &token, |attempt| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 3 {
                    Err(format!("failure {attempt}"))
                } else {
                    Ok("done")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
        assert!(started.elapsed() >= policy.total_backoff());
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_after_max_retries_plus_one() {
        let policy = policy(2);
        let token = CancellationToken::new();
        let attempts = AtomicU32::new(0);

        let result: Result<(), RetryError<String>> = execute(&policy, &token, |_| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err("always".to_string()) }
        })
        .await;

        match result {
            Err(RetryError::ExhaustedRetries { attempts: made, last }) => {
                assert_eq!(made, 3);
                assert!(matches!(last, AttemptError::Failed(ref e) if e == "always"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_attempt_times_out_and_its_result_is_discarded() {
        let policy = RetryPolicy {
            attempt_timeout: Duration::from_secs(10),
            ..policy(1)
        };
        let token = CancellationToken::new();

        let result: Result<u32, RetryError<String>> = execute(&policy, &token, |attempt| async move {
            if attempt == 0 {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(1)
            } else {
                Ok(2)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_on_final_attempt_is_reported() {
        let policy = RetryPolicy {
            attempt_timeout: Duration::from_millis(50),
            ..policy(0)
        };
        let token = CancellationToken::new();

        let result: Result<(), RetryError<String>> = execute(&policy, &token, |_| async {
            std::future::pending::<()>().await;
            Ok(())
        })
        .await;

        assert!(matches!(
            result,
            Err(RetryError::ExhaustedRetries {
                attempts: 1,
                last: AttemptError::TimedOut(_)
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_backoff() {
        let policy = RetryPolicy {
            base_delay: Duration::from_secs(100),
            max_delay: Duration::from_secs(100),
            ..policy(5)
        };
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });

        let result: Result<(), RetryError<String>> =
            execute(&policy, &token, |_| async { Err("nope".to_string()) }).await;

        assert!(matches!(result, Err(RetryError::Cancelled)));
        assert_eq!(result.unwrap_err().attempts(), 0);
    }

    #[tokio::test]
    async fn cancelled_token_skips_the_operation() {
        let token = CancellationToken::new();
        token.cancel();
        let attempts = AtomicU32::new(0);

        let result: Result<(), RetryError<String>> = execute(&policy(3), &token, |_| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        })
        .await;

        assert!(matches!(result, Err(RetryError::Cancelled)));
        assert_eq!(attempts.load(Ordering::SeqCst), 0);
    }
}
