//! Bounded retry primitive.
//!
//! Callers decide what a failed attempt means and how long to back off; this
//! module only counts attempts and sleeps between them. No sleep happens after
//! the final attempt.

use crate::Result;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// All attempts failed
#[derive(Debug)]
pub struct Exhausted<E> {
    pub attempts: u32,
    pub elapsed: Duration,
    pub last: E,
}

/// Retry an async operation up to `max_attempts` times.
///
/// - `operation(attempt)` is called with a 1-based attempt number.
/// - `backoff(attempt, &error)` returns the delay before the next attempt.
pub async fn retry_with_backoff<T, E, Op, Fut, Backoff>(
    max_attempts: u32,
    mut operation: Op,
    mut backoff: Backoff,
) -> std::result::Result<T, Exhausted<E>>
where
    Op: FnMut(u32) -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    Backoff: FnMut(u32, &E) -> Duration,
{
    let max_attempts = max_attempts.max(1);
    let started = Instant::now();

    for attempt in 1..=max_attempts {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < max_attempts => {
                let delay = backoff(attempt, &err);
                tokio::time::sleep(delay).await;
            }
            Err(err) => {
                return Err(Exhausted {
                    attempts: attempt,
                    elapsed: started.elapsed(),
                    last: err,
                });
            }
        }
    }

    unreachable!("retry loop always returns");
}

/// Fixed-delay retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// Run `operation` under this policy, returning the last error once exhausted
    pub async fn run<T, Op, Fut>(&self, what: &str, operation: Op) -> Result<T>
    where
        Op: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let delay = self.delay;

        retry_with_backoff(max_attempts, operation, |attempt, err| {
            tracing::warn!("{}: attempt {}/{} failed: {}", what, attempt, max_attempts, err);
            delay
        })
        .await
        .map_err(|exhausted| {
            tracing::debug!(
                "{}: giving up after {} attempts ({:?})",
                what,
                exhausted.attempts,
                exhausted.elapsed
            );
            exhausted.last
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let seen = calls.clone();

        let result: std::result::Result<u32, Exhausted<&str>> = retry_with_backoff(
            5,
            |attempt| {
                let seen = seen.clone();
                async move {
                    seen.fetch_add(1, Ordering::SeqCst);
                    if attempt < 3 { Err("not yet") } else { Ok(attempt) }
                }
            },
            |_, _| Duration::from_secs(1),
        )
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_sleep_after_last_attempt() {
        let started = Instant::now();

        let result: std::result::Result<(), Exhausted<&str>> = retry_with_backoff(
            3,
            |_| async { Err("nope") },
            |_, _| Duration::from_secs(2),
        )
        .await;

        let exhausted = result.unwrap_err();
        assert_eq!(exhausted.attempts, 3);
        assert_eq!(exhausted.last, "nope");
        // Two sleeps between three attempts
        assert_eq!(started.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_sees_error() {
        let result: std::result::Result<(), Exhausted<u64>> = retry_with_backoff(
            3,
            |attempt| async move { Err(attempt as u64) },
            |_, err| Duration::from_millis(*err * 100),
        )
        .await;

        let exhausted = result.unwrap_err();
        assert_eq!(exhausted.elapsed, Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_policy_returns_last_error() {
        let policy = RetryPolicy::fixed(3, Duration::from_secs(3));

        let result: Result<()> = policy
            .run("mailbox button", |attempt| async move {
                Err(Error::Driver(format!("attempt {}", attempt)))
            })
            .await;

        match result {
            Err(Error::Driver(msg)) => assert_eq!(msg, "attempt 3"),
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
