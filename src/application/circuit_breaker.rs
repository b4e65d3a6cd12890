//! Circuit breaker guarding the admission store.
//!
//! After repeated store failures the breaker opens and the gate refuses to
//! call the store for a recovery window, answering `StoreUnavailable`
//! immediately. It fails closed: an open circuit never admits anyone.
//! After the window a single trial call is let through; its result decides
//! whether the circuit closes again or reopens. A trial call that never reports
//! back (its caller was cancelled) is abandoned once another recovery window
//! has passed, and a new trial call is let through.
//!
//! State lives in atomics, so the hot path never takes a lock.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::time::{Duration, Instant};

/// Externally visible circuit state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CircuitState {
    /// Calls flow normally
    Closed = 0,
    /// Calls are refused until the recovery window elapses
    Open = 1,
    /// One trial call is in flight
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            0 => CircuitState::Closed,
            1 => CircuitState::Open,
            _ => CircuitState::HalfOpen,
        }
    }
}

/// Configuration for circuit breaker behavior.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens
    pub failure_threshold: u32,
    /// How long the circuit stays open before a trial call is allowed
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(5),
        }
    }
}

/// Fail-closed circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    state: AtomicU8,
    consecutive_failures: AtomicU32,
    /// Nanoseconds since `epoch` when the circuit opened or the last trial
    /// was let through
    marked_at_nanos: AtomicU64,
    config: CircuitBreakerConfig,
    epoch: Instant,
}

impl CircuitBreaker {
    /// Create a breaker with default configuration.
    pub fn new() -> Self {
        Self::with_config(CircuitBreakerConfig::default())
    }

    /// Create a breaker with custom configuration.
    pub fn with_config(config: CircuitBreakerConfig) -> Self {
        Self {
            state: AtomicU8::new(CircuitState::Closed as u8),
            consecutive_failures: AtomicU32::new(0),
            marked_at_nanos: AtomicU64::new(0),
            config,
            epoch: Instant::now(),
        }
    }

    /// Current state.
    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    /// Ask permission to call the store.
    ///
    /// Returns `false` while open, and while a half-open trial call is in flight
    /// and younger than the recovery window.
    pub fn try_acquire(&self) -> bool {
        if self.state() == CircuitState::Closed {
            return true;
        }

        let marked = self.marked_at_nanos.load(Ordering::Acquire);
        let now = self.now_nanos();
        if now.saturating_sub(marked) < self.recovery_nanos() {
            return false;
        }

        // Only the caller that moves the mark gets the trial
        if self
            .marked_at_nanos
            .compare_exchange(marked, now, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        let previous = self.state.swap(CircuitState::HalfOpen as u8, Ordering::AcqRel);
        if previous == CircuitState::HalfOpen as u8 {
            tracing::debug!("Abandoned circuit trial call, letting another through");
        }
        true
    }

    /// Record a successful store call.
    pub fn record_success(&self) {
        match self.state() {
            CircuitState::Closed => {
                if self.consecutive_failures.load(Ordering::Relaxed) != 0 {
                    self.consecutive_failures.store(0, Ordering::Release);
                }
            }
            CircuitState::HalfOpen => {
                self.consecutive_failures.store(0, Ordering::Release);
                if self
                    .state
                    .compare_exchange(
                        CircuitState::HalfOpen as u8,
                        CircuitState::Closed as u8,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
                {
                    tracing::info!("Admission store circuit closed");
                }
            }
            // A late reply from before the circuit opened
            CircuitState::Open => {}
        }
    }

    /// Record a failed store call.
    pub fn record_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;

        let trips = match self.state() {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => failures >= self.config.failure_threshold,
            CircuitState::Open => false,
        };
        if !trips {
            return;
        }

        self.marked_at_nanos.store(self.now_nanos(), Ordering::Release);
        let previous = self.state.swap(CircuitState::Open as u8, Ordering::AcqRel);
        if previous != CircuitState::Open as u8 {
            tracing::warn!(
                threshold = self.config.failure_threshold,
                recovery_ms = self.config.recovery_timeout.as_millis() as u64,
                "Admission store circuit opened"
            );
        }
    }

    /// Consecutive failures observed since the last success.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    /// Force the circuit closed.
    pub fn reset(&self) {
        self.state.store(CircuitState::Closed as u8, Ordering::Release);
        self.consecutive_failures.store(0, Ordering::Release);
    }

    fn now_nanos(&self) -> u64 {
        self.epoch
            .elapsed()
            .as_nanos()
            .try_into()
            .unwrap_or(u64::MAX)
    }

    fn recovery_nanos(&self) -> u64 {
        self.config
            .recovery_timeout
            .as_nanos()
            .try_into()
            .unwrap_or(u64::MAX)
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}
