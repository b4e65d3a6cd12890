//! Bounded retry with exponential backoff.
//!
//! Calls that own a transient failure (gate lookups, event publishing) retry
//! a bounded number of times before surfacing the error.
//!
//! The delay before retry `n` (0-indexed) is `first × factor^n`, clamped to
//! `max`, then jittered. The base is derived from the attempt number only, so
//! jitter never feeds back into later delays.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use campaign_admission::{JitterPolicy, RetryPolicy};
//!
//! let policy = RetryPolicy {
//!     max_attempts: 4,
//!     first: Duration::from_millis(10),
//!     max: Duration::from_millis(50),
//!     factor: 2.0,
//!     jitter: JitterPolicy::None,
//! };
//!
//! assert_eq!(policy.delay(0), Duration::from_millis(10));
//! assert_eq!(policy.delay(1), Duration::from_millis(20));
//! assert_eq!(policy.delay(3), Duration::from_millis(50));
//! ```

use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Randomization applied to retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JitterPolicy {
    /// Use the exact backoff delay
    #[default]
    None,
    /// Random delay in `[0, delay]`
    Full,
    /// `delay/2 + random[0, delay/2]`
    Equal,
}

impl JitterPolicy {
    /// Apply jitter to a delay.
    pub fn apply(&self, delay: Duration) -> Duration {
        let ms = delay.as_millis() as u64;
        if ms == 0 {
            return Duration::ZERO;
        }
        match self {
            JitterPolicy::None => delay,
            JitterPolicy::Full => Duration::from_millis(rand::rng().random_range(0..=ms)),
            JitterPolicy::Equal => {
                let half = ms / 2;
                Duration::from_millis(half + rand::rng().random_range(0..=ms - half))
            }
        }
    }
}

/// Error returned when a retry policy is misconfigured.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RetryPolicyError {
    /// At least one attempt is required
    #[error("max_attempts must be greater than 0")]
    ZeroAttempts,
    /// The growth factor must be finite and at least 1.0
    #[error("backoff factor must be finite and >= 1.0, got {0}")]
    InvalidFactor(f64),
}

/// Bounded exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay before the first retry
    pub first: Duration,
    /// Maximum delay cap
    pub max: Duration,
    /// Multiplicative growth factor
    pub factor: f64,
    /// Jitter applied to each delay
    pub jitter: JitterPolicy,
}

impl Default for RetryPolicy {
    /// Three attempts, 10ms doubling up to 200ms, equal jitter.
    fn default() -> Self {
        Self {
            max_attempts: 3,
            first: Duration::from_millis(10),
            max: Duration::from_millis(200),
            factor: 2.0,
            jitter: JitterPolicy::Equal,
        }
    }
}

impl RetryPolicy {
    /// A policy that tries exactly once.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Check the policy for values that would never make progress.
    ///
    /// # Errors
    /// Returns `RetryPolicyError` for zero attempts or a factor below 1.0.
    pub fn validate(&self) -> Result<(), RetryPolicyError> {
        if self.max_attempts == 0 {
            return Err(RetryPolicyError::ZeroAttempts);
        }
        if !self.factor.is_finite() || self.factor < 1.0 {
            return Err(RetryPolicyError::InvalidFactor(self.factor));
        }
        Ok(())
    }

    /// Delay to wait after failed attempt `attempt` (0-indexed).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.min(i32::MAX as u32) as i32;
        let secs = self.first.as_secs_f64() * self.factor.powi(exp);
        let base = if !secs.is_finite() || secs < 0.0 || secs > self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        };
        self.jitter.apply(base)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempts are exhausted. Returns the last error on exhaustion.
    pub async fn run<T, E, F, Fut>(
        &self,
        operation: &'static str,
        retryable: impl Fn(&E) -> bool,
        mut op: F,
    ) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt + 1 < attempts && retryable(&e) => {
                    let delay = self.delay(attempt);
                    tracing::warn!(
                        operation,
                        attempt = attempt + 1,
                        max_attempts = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying after transient failure"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fixed(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            first: Duration::from_millis(1),
            max: Duration::from_millis(4),
            factor: 2.0,
            jitter: JitterPolicy::None,
        }
    }

    #[test]
    fn test_delay_growth_and_cap() {
        let policy = fixed(5);
        assert_eq!(policy.delay(0), Duration::from_millis(1));
        assert_eq!(policy.delay(1), Duration::from_millis(2));
        assert_eq!(policy.delay(2), Duration::from_millis(4));
        assert_eq!(policy.delay(10), Duration::from_millis(4));
        assert_eq!(policy.delay(u32::MAX), Duration::from_millis(4));
    }

    #[test]
    fn test_jitter_bounds() {
        let delay = Duration::from_millis(100);
        for _ in 0..100 {
            assert!(JitterPolicy::Full.apply(delay) <= delay);
            let equal = JitterPolicy::Equal.apply(delay);
            assert!(equal >= Duration::from_millis(50) && equal <= delay);
        }
        assert_eq!(JitterPolicy::Equal.apply(Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn test_validate() {
        assert!(RetryPolicy::default().validate().is_ok());
        assert_eq!(fixed(0).validate(), Err(RetryPolicyError::ZeroAttempts));

        let bad = RetryPolicy {
            factor: 0.5,
            ..RetryPolicy::default()
        };
        assert_eq!(bad.validate(), Err(RetryPolicyError::InvalidFactor(0.5)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_retries_until_success() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> = fixed(3)
            .run("test", |_| true, |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 2 {
                        Err("flaky".to_string())
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;

        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_exhaustion() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = fixed(2)
            .run("test", |_| true, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("down".to_string()) }
            })
            .await;

        assert_eq!(result, Err("down".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_run_skips_non_retryable() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = fixed(5)
            .run("test", |_| false, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("fatal".to_string()) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
