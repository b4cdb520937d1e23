//! Retry policy with exponential backoff.
//!
//! The policy itself is a pure function of `(error, attempt)`. The only state,
//! the attempt counter, lives in [`retry_with_policy`].
//!
//! - 4xx errors are not retried, except 408 and 429 on reads
//! - network errors, timeouts and 5xx are retried up to the attempt limit
//! - mutations have a lower limit and never retry a 4xx

use crate::config::NetworkConfig;
use crate::error::{ResyncError, Result};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Outcome of consulting the policy after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    pub retry: bool,
    pub delay: Duration,
}

impl RetryDecision {
    fn stop() -> Self {
        Self {
            retry: false,
            delay: Duration::ZERO,
        }
    }
}

/// Retry rules for one class of operation.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries allowed for network, timeout and 5xx failures.
    pub max_retries: u32,
    /// Retries allowed for 408 and 429. Zero disables them.
    pub max_throttled_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Scale each delay by a random factor in `0.5..1.5`.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::query()
    }
}

impl RetryPolicy {
    /// Policy for reads.
    pub fn query() -> Self {
        Self {
            max_retries: NetworkConfig::MAX_RETRIES,
            max_throttled_retries: 2,
            base_delay: NetworkConfig::RETRY_BASE_DELAY,
            max_delay: NetworkConfig::RETRY_MAX_DELAY,
            jitter: false,
        }
    }

    /// Policy for writes.
    pub fn mutation() -> Self {
        Self {
            max_retries: 2,
            max_throttled_retries: 0,
            ..Self::query()
        }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            max_throttled_retries: 0,
            ..Self::query()
        }
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
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

    /// Decide whether attempt number `attempt` (0-indexed, counting failures so
    /// far) should be followed by another one, and after how long.
    pub fn decide(&self, error: &ResyncError, attempt: u32) -> RetryDecision {
        let limit = match error {
            ResyncError::Client { status: 408 | 429, .. } => self.max_throttled_retries,
            e if e.is_retryable() => self.max_retries,
            _ => return RetryDecision::stop(),
        };

        if attempt >= limit {
            return RetryDecision::stop();
        }

        RetryDecision {
            retry: true,
            delay: self.delay_for(attempt),
        }
    }

    pub fn should_retry(&self, error: &ResyncError, attempt: u32) -> bool {
        self.decide(error, attempt).retry
    }

    /// `min(base * 2^attempt, cap)`, optionally jittered.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let multiplier = 2f64.powi(attempt.min(31) as i32);
        let delay_secs = self.base_delay.as_secs_f64() * multiplier;
        let capped_secs = delay_secs.min(self.max_delay.as_secs_f64());

        let final_secs = if self.jitter {
            let mut rng = rand::rng();
            let jitter_factor = rng.random_range(0.5..1.5);
            (capped_secs * jitter_factor).min(self.max_delay.as_secs_f64())
        } else {
            capped_secs
        };

        Duration::from_secs_f64(final_secs)
    }
}

/// Statistics about a retried operation.
#[derive(Debug, Clone, Default)]
pub struct RetryStats {
    /// Number of attempts made.
    pub attempts: u32,
    /// Delays slept between attempts, in order.
    pub delays: Vec<Duration>,
    pub success: bool,
    pub last_error: Option<String>,
}

impl RetryStats {
    pub fn total_delay(&self) -> Duration {
        self.delays.iter().sum()
    }
}

/// Run an async operation until it succeeds or the policy gives up.
pub async fn retry_with_policy<F, Fut, T>(
    policy: &RetryPolicy,
    mut operation: F,
) -> (Result<T>, RetryStats)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut stats = RetryStats::default();
    let mut attempt = 0;

    loop {
        stats.attempts = attempt + 1;

        match operation().await {
            Ok(value) => {
                stats.success = true;
                if attempt > 0 {
                    debug!("Operation succeeded after {} attempts", attempt + 1);
                }
                return (Ok(value), stats);
            }
            Err(e) => {
                stats.last_error = Some(e.to_string());

                let decision = policy.decide(&e, attempt);
                if !decision.retry {
                    if attempt > 0 {
                        warn!("Giving up after {} attempts: {}", attempt + 1, e);
                    } else {
                        debug!("Error is not retried: {}", e);
                    }
                    return (Err(e), stats);
                }

                warn!(
                    "Attempt {} failed: {}. Retrying in {:?}",
                    attempt + 1,
                    e,
                    decision.delay
                );
                stats.delays.push(decision.delay);
                tokio::time::sleep(decision.delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn status(code: u16) -> ResyncError {
        ResyncError::from_status(code, "status")
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::query();
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(5), Duration::from_secs(30));
        assert_eq!(policy.delay_for(40), Duration::from_secs(30));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let policy = RetryPolicy::query()
            .with_base_delay(Duration::from_secs(2))
            .with_jitter(true);
        for _ in 0..20 {
            let delay = policy.delay_for(0);
            assert!(delay >= Duration::from_secs(1) && delay <= Duration::from_secs(3));
        }
    }

    #[test]
    fn test_query_classification() {
        let policy = RetryPolicy::query();

        assert!(!policy.should_retry(&status(404), 0));
        assert!(!policy.should_retry(&status(401), 0));
        assert!(!policy.should_retry(&ResyncError::Normalization("x".into()), 0));

        assert!(policy.should_retry(&status(429), 0));
        assert!(policy.should_retry(&status(408), 1));
        assert!(!policy.should_retry(&status(429), 2));

        assert!(policy.should_retry(&status(503), 2));
        assert!(!policy.should_retry(&status(503), 3));
        assert!(policy.should_retry(&ResyncError::Timeout(Duration::from_secs(10)), 0));
    }

    #[test]
    fn test_mutation_classification() {
        let policy = RetryPolicy::mutation();
        assert!(!policy.should_retry(&status(429), 0));
        assert!(!policy.should_retry(&status(422), 0));
        assert!(policy.should_retry(&status(500), 1));
        assert!(!policy.should_retry(&status(500), 2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_429_retries_twice_with_increasing_delay() {
        let policy = RetryPolicy::query();
        let calls = Arc::new(AtomicU32::new(0));

        let (result, stats) = retry_with_policy(&policy, || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(status(429))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(stats.delays, vec![Duration::from_secs(1), Duration::from_secs(2)]);
        assert!(!stats.success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_404_is_not_retried() {
        let policy = RetryPolicy::query();
        let calls = Arc::new(AtomicU32::new(0));

        let (result, stats) = retry_with_policy(&policy, || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(status(404))
            }
        })
        .await;

        assert_eq!(result.unwrap_err().status(), Some(404));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(stats.delays.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_server_error() {
        let policy = RetryPolicy::query();
        let calls = Arc::new(AtomicU32::new(0));

        let (result, stats) = retry_with_policy(&policy, || {
            let calls = calls.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(status(502))
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(stats.attempts, 2);
        assert!(stats.success);
    }
}
