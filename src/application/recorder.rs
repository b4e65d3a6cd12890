//! Background consumer that turns events into durable rows.
//!
//! The recorder reads the in-process channel and upserts one
//! `CampaignApplication` per `(campaign_id, user_id)`. Redelivered events
//! update the existing row, so at-least-once delivery never duplicates rows.
//!
//! Shutdown is graceful: the channel stops accepting new messages, and
//! everything already queued is recorded before the task exits.

use crate::application::error::RepositoryError;
use crate::application::ports::{CampaignRepository, Clock};
use crate::application::retry::RetryPolicy;
use crate::infrastructure::channel::{ChannelConsumer, Envelope};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Error returned when stopping the recorder fails.
#[derive(Debug, thiserror::Error)]
pub enum ShutdownError {
    /// The recorder task panicked
    #[error("recorder task panicked")]
    TaskPanicked,
    /// The recorder task was cancelled
    #[error("recorder task was cancelled")]
    TaskCancelled,
}

/// Counts kept by a running recorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecorderStats {
    /// Rows created
    pub inserted: u64,
    /// Rows that already existed and were updated
    pub updated: u64,
    /// Messages that were not valid events
    pub malformed: u64,
    /// Messages on other topics
    pub skipped: u64,
    /// Events that could not be written
    pub failed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    inserted: AtomicU64,
    updated: AtomicU64,
    malformed: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> RecorderStats {
        RecorderStats {
            inserted: self.inserted.load(Ordering::Relaxed),
            updated: self.updated.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Idempotent event sink writing to durable storage.
#[derive(Debug, Clone)]
pub struct ApplicationRecorder {
    repository: Arc<dyn CampaignRepository>,
    clock: Arc<dyn Clock>,
    topic: String,
    retry: RetryPolicy,
}

impl ApplicationRecorder {
    /// Create a recorder for messages on `topic`.
    pub fn new(
        repository: Arc<dyn CampaignRepository>,
        clock: Arc<dyn Clock>,
        topic: impl Into<String>,
    ) -> Self {
        Self {
            repository,
            clock,
            topic: topic.into(),
            retry: RetryPolicy::default(),
        }
    }

    /// Retry policy for failed writes.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Spawn the consumer loop on the current runtime.
    pub fn start(self, mut consumer: ChannelConsumer) -> RecorderHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let counters = Arc::new(Counters::default());
        let task_counters = Arc::clone(&counters);

        let task = tokio::spawn(async move {
            tracing::info!(topic = %self.topic, "Application recorder started");
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    message = consumer.recv() => match message {
                        Some(envelope) => self.handle(&envelope, &task_counters).await,
                        None => break,
                    },
                }
            }

            consumer.close();
            while let Some(envelope) = consumer.recv().await {
                self.handle(&envelope, &task_counters).await;
            }
            tracing::info!(
                topic = %self.topic,
                recorded = task_counters.inserted.load(Ordering::Relaxed),
                "Application recorder stopped"
            );
        });

        RecorderHandle {
            shutdown: Some(shutdown_tx),
            task,
            counters,
        }
    }

    async fn handle(&self, envelope: &Envelope, counters: &Counters) {
        if envelope.topic != self.topic {
            tracing::debug!(topic = %envelope.topic, "Skipping message on foreign topic");
            counters.skipped.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let event = match envelope.decode() {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(error = %e, payload = %envelope.payload, "Dropping malformed event");
                counters.malformed.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        let applied_at = self.clock.now();
        let written = self
            .retry
            .run(
                "campaign_repository.save_application",
                |_: &RepositoryError| true,
                |_| self.repository.save_application(event.into_application(applied_at)),
            )
            .await;

        match written {
            Ok(true) => {
                counters.inserted.fetch_add(1, Ordering::Relaxed);
            }
            Ok(false) => {
                tracing::debug!(
                    campaign_id = %event.campaign_id,
                    user_id = %event.user_id,
                    "Redelivered event merged into existing row"
                );
                counters.updated.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::warn!(
                    campaign_id = %event.campaign_id,
                    user_id = %event.user_id,
                    selected = event.selected,
                    error = %e,
                    "Failed to record application"
                );
                counters.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Handle to a running [`ApplicationRecorder`].
#[derive(Debug)]
pub struct RecorderHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
    counters: Arc<Counters>,
}

impl RecorderHandle {
    /// Current counts.
    pub fn stats(&self) -> RecorderStats {
        self.counters.snapshot()
    }

    /// Stop accepting messages, record everything queued and wait for the
    /// task to exit.
    ///
    /// # Errors
    /// Returns `ShutdownError` if the task panicked or was cancelled.
    pub async fn shutdown(mut self) -> Result<RecorderStats, ShutdownError> {
        if let Some(shutdown) = self.shutdown.take() {
            // The task may already have exited on a closed channel
            let _ = shutdown.send(());
        }
        match (&mut self.task).await {
            Ok(()) => Ok(self.counters.snapshot()),
            Err(e) if e.is_panic() => Err(ShutdownError::TaskPanicked),
            Err(_) => Err(ShutdownError::TaskCancelled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::EventPublisher;
    use crate::domain::application::ApplyEvent;
    use crate::domain::campaign::{CampaignId, UserId};
    use crate::infrastructure::channel::{channel, ChannelConfig};
    use crate::infrastructure::clock::SystemClock;
    use crate::infrastructure::repository::InMemoryRepository;

    fn recorder(repo: &InMemoryRepository) -> ApplicationRecorder {
        ApplicationRecorder::new(
            Arc::new(repo.clone()),
            Arc::new(SystemClock::new()),
            crate::domain::application::APPLY_TOPIC,
        )
        .with_retry(RetryPolicy::no_retry())
    }

    #[tokio::test]
    async fn test_shutdown_drains_queue() {
        let repo = InMemoryRepository::new();
        let (publisher, consumer) = channel(ChannelConfig::default()).unwrap();

        for user in 1..=3 {
            publisher
                .publish(ApplyEvent::selected(CampaignId(1), UserId(user)))
                .await
                .unwrap();
        }
        publisher
            .publish(ApplyEvent::rejected(CampaignId(1), UserId(4)))
            .await
            .unwrap();

        let handle = recorder(&repo).start(consumer);
        let stats = handle.shutdown().await.unwrap();

        assert_eq!(stats.inserted, 4);
        assert_eq!(repo.count_applications(CampaignId(1)).await.unwrap(), 4);
        assert_eq!(repo.count_selected(CampaignId(1)).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_redelivery_is_idempotent() {
        let repo = InMemoryRepository::new();
        let (publisher, consumer) = channel(ChannelConfig::default()).unwrap();
        let event = ApplyEvent::selected(CampaignId(1), UserId(1));

        publisher.publish(event).await.unwrap();
        publisher.publish(event).await.unwrap();

        let stats = recorder(&repo).start(consumer).shutdown().await.unwrap();
        assert_eq!(stats.inserted, 1);
        assert_eq!(stats.updated, 1);
        assert_eq!(repo.count_applications(CampaignId(1)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_foreign_topic_is_skipped() {
        let repo = InMemoryRepository::new();
        let (publisher, consumer) = channel(ChannelConfig {
            topic: "audit".into(),
            ..ChannelConfig::default()
        })
        .unwrap();

        publisher
            .publish(ApplyEvent::selected(CampaignId(1), UserId(1)))
            .await
            .unwrap();

        let stats = recorder(&repo).start(consumer).shutdown().await.unwrap();
        assert_eq!(stats.skipped, 1);
        assert_eq!(repo.count_applications(CampaignId(1)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_write_failure_is_counted() {
        let repo = InMemoryRepository::new();
        repo.set_fail_writes(true);
        let (publisher, consumer) = channel(ChannelConfig::default()).unwrap();

        publisher
            .publish(ApplyEvent::selected(CampaignId(1), UserId(1)))
            .await
            .unwrap();

        let stats = recorder(&repo).start(consumer).shutdown().await.unwrap();
        assert_eq!(stats.failed, 1);
    }

    #[tokio::test]
    async fn test_stops_when_publishers_drop() {
        let repo = InMemoryRepository::new();
        let (publisher, consumer) = channel(ChannelConfig::default()).unwrap();
        publisher
            .publish(ApplyEvent::selected(CampaignId(1), UserId(1)))
            .await
            .unwrap();
        drop(publisher);

        let handle = recorder(&repo).start(consumer);
        let stats = handle.shutdown().await.unwrap();
        assert_eq!(stats.inserted, 1);
    }
}
