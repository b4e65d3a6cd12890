//! Recording event publisher for testing.

use crate::application::error::PublishError;
use crate::application::ports::EventPublisher;
use crate::domain::application::ApplyEvent;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

/// Publisher that keeps every accepted event in memory.
///
/// Clones share the same log. `fail_next(n)` makes the next `n` publishes
/// fail with `PublishError::Rejected`.
#[derive(Debug, Clone, Default)]
pub struct RecordingPublisher {
    events: Arc<Mutex<Vec<ApplyEvent>>>,
    failures: Arc<AtomicU32>,
}

impl RecordingPublisher {
    /// Create an empty publisher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` publishes.
    pub fn fail_next(&self, count: u32) {
        self.failures.store(count, Ordering::SeqCst);
    }

    /// All accepted events in acceptance order.
    pub fn events(&self) -> Vec<ApplyEvent> {
        self.events
            .lock()
            .expect("RecordingPublisher mutex poisoned - a test thread panicked while holding the lock")
            .clone()
    }

    /// Accepted events with `selected = true`.
    pub fn selected(&self) -> Vec<ApplyEvent> {
        self.events().into_iter().filter(|e| e.selected).collect()
    }

    /// Number of accepted events.
    pub fn count(&self) -> usize {
        self.events().len()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, event: ApplyEvent) -> Result<(), PublishError> {
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(PublishError::Rejected("broker not available".into()));
        }
        self.events
            .lock()
            .expect("RecordingPublisher mutex poisoned - a test thread panicked while holding the lock")
            .push(event);
        Ok(())
    }
}
