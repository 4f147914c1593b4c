// Retry policy for network calls.
// Runs inside one in-flight request, so coalesced callers share the same attempts.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::error::Result;

/// How failed network calls are retried.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total calls allowed, counting the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Upper bound on any single backoff.
    pub max_delay: Duration,
    /// Growth factor applied per failed attempt.
    pub exponential_base: f64,
    /// Scale each delay by a random factor in [0.5, 1.5).
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            exponential_base: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before the retry that follows attempt `attempt` (0-indexed).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let multiplier = self.exponential_base.powi(attempt as i32);
        let capped_secs = (self.base_delay.as_secs_f64() * multiplier).min(self.max_delay.as_secs_f64());

        let final_secs = if self.jitter {
            // Factor in [0.5, 1.5) keeps the mean delay without allowing near-zero waits
            let factor = rand::rng().random_range(0.5..1.5);
            (capped_secs * factor).min(self.max_delay.as_secs_f64())
        } else {
            capped_secs
        };

        Duration::from_secs_f64(final_secs)
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error,
    /// or runs out of attempts.
    pub async fn run<F, Fut, T>(&self, label: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(label, attempts = attempt + 1, "request succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if !e.is_retryable() => {
                    debug!(label, error = %e, "error is not retryable");
                    return Err(e);
                }
                Err(e) if attempt + 1 >= max_attempts => {
                    warn!(label, attempts = max_attempts, error = %e, "all retry attempts exhausted");
                    return Err(e);
                }
                Err(e) => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        label,
                        attempt = attempt + 1,
                        max_attempts,
                        error = %e,
                        ?delay,
                        "request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::error::ApiError;

    #[test]
    fn test_delay_without_jitter() {
        let policy = RetryPolicy::default()
            .with_base_delay(Duration::from_secs(1))
            .with_jitter(false);

        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
    }

    #[test]
    fn test_delay_capped() {
        let policy = RetryPolicy::default()
            .with_base_delay(Duration::from_secs(10))
            .with_max_delay(Duration::from_secs(15))
            .with_jitter(false);

        assert_eq!(policy.delay_for(3), Duration::from_secs(15));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let policy = RetryPolicy::default().with_base_delay(Duration::from_secs(2));
        for _ in 0..50 {
            let delay = policy.delay_for(0);
            assert!(delay >= Duration::from_secs(1));
            assert!(delay < Duration::from_secs(3));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::default().with_max_attempts(3);

        let counter = calls.clone();
        let result = policy
            .run("pools", || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(ApiError::Transport("connection reset".to_string()))
                    } else {
                        Ok(7)
                    }
                }
            })
            .await;

        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::default().with_max_attempts(2);

        let counter = calls.clone();
        let result: Result<()> = policy
            .run("pools", || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(ApiError::Http {
                        status: 502,
                        message: "bad gateway".to_string(),
                    })
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_fast() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::default().with_max_attempts(5);

        let counter = calls.clone();
        let result: Result<()> = policy
            .run("pools", || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(ApiError::Unauthorized)
                }
            })
            .await;

        assert_eq!(result, Err(ApiError::Unauthorized));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
