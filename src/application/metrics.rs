//! Observability counters for admission decisions.
//!
//! All counters use relaxed atomics; they are for monitoring, not for any
//! admission decision.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Shared admission counters.
///
/// Cloning shares the same underlying counters.
#[derive(Debug, Clone, Default)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug, Default)]
struct MetricsInner {
    admitted: AtomicU64,
    rejected: AtomicU64,
    duplicates: AtomicU64,
    store_failures: AtomicU64,
    delivery_failures: AtomicU64,
    deferred_closes: AtomicU64,
}

impl Metrics {
    /// Create a new metrics tracker.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_admitted(&self) {
        self.inner.admitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected(&self) {
        self.inner.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_duplicate(&self) {
        self.inner.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_store_failure(&self) {
        self.inner.store_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_delivery_failure(&self) {
        self.inner.delivery_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_deferred_close(&self) {
        self.inner.deferred_closes.fetch_add(1, Ordering::Relaxed);
    }

    /// First-time admissions granted.
    pub fn admitted(&self) -> u64 {
        self.inner.admitted.load(Ordering::Relaxed)
    }

    /// First-time rejections.
    pub fn rejected(&self) -> u64 {
        self.inner.rejected.load(Ordering::Relaxed)
    }

    /// Re-applications by users already in the admission set.
    pub fn duplicates(&self) -> u64 {
        self.inner.duplicates.load(Ordering::Relaxed)
    }

    /// Gate calls that ended in `StoreUnavailable`.
    pub fn store_failures(&self) -> u64 {
        self.inner.store_failures.load(Ordering::Relaxed)
    }

    /// Granted admissions whose event was not accepted.
    pub fn delivery_failures(&self) -> u64 {
        self.inner.delivery_failures.load(Ordering::Relaxed)
    }

    /// Close transitions whose write failed.
    pub fn deferred_closes(&self) -> u64 {
        self.inner.deferred_closes.load(Ordering::Relaxed)
    }

    /// Get a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            admitted: self.admitted(),
            rejected: self.rejected(),
            duplicates: self.duplicates(),
            store_failures: self.store_failures(),
            delivery_failures: self.delivery_failures(),
            deferred_closes: self.deferred_closes(),
        }
    }
}

/// A point-in-time snapshot of metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub admitted: u64,
    pub rejected: u64,
    pub duplicates: u64,
    pub store_failures: u64,
    pub delivery_failures: u64,
    pub deferred_closes: u64,
}

impl MetricsSnapshot {
    /// First-time decisions (admitted + rejected).
    pub fn decisions(&self) -> u64 {
        self.admitted.saturating_add(self.rejected)
    }

    /// Share of first-time decisions that were admissions (0.0 to 1.0).
    ///
    /// Returns 0.0 if no decisions have been made.
    pub fn admission_rate(&self) -> f64 {
        let total = self.decisions();
        if total == 0 {
            0.0
        } else {
            self.admitted as f64 / total as f64
        }
    }
}
