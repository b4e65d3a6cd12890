//! # campaign-admission
//!
//! Capacity-limited admission control for sign-up campaigns.
//!
//! A campaign offers `capacity` slots until its end date. Many users apply at
//! once; exactly `capacity` of them must win, the rest must be told the
//! campaign is full, and the campaign must close exactly once when its last
//! slot is taken.
//!
//! The decision is made by an atomic counting primitive keyed by campaign
//! (the *admission gate*), not by locking the campaign row. Durable writes
//! happen afterwards: every decision is handed to an async pipeline as an
//! [`ApplyEvent`] and recorded idempotently by the [`ApplicationRecorder`].
//!
//! ## Quick Start
//!
//! ```rust
//! use campaign_admission::{
//!     channel, AdmissionService, ApplicationRecorder, Campaign, CampaignId,
//!     CampaignRepository, ChannelConfig, InMemoryRepository, SystemClock, UserId,
//!     APPLY_TOPIC,
//! };
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let repository = InMemoryRepository::new();
//! let campaign = Campaign::open(1, 3, chrono::Utc::now() + chrono::Duration::days(7))?;
//! repository.save_campaign(&campaign).await?;
//!
//! let (publisher, consumer) = channel(ChannelConfig::default())?;
//! let recorder = ApplicationRecorder::new(
//!     Arc::new(repository.clone()),
//!     Arc::new(SystemClock::new()),
//!     APPLY_TOPIC,
//! )
//! .start(consumer);
//!
//! let service = AdmissionService::builder()
//!     .with_publisher(Arc::new(publisher))
//!     .with_repository(Arc::new(repository.clone()))
//!     .build()?;
//!
//! let outcome = service.apply(CampaignId(1), UserId(42)).await?;
//! assert!(outcome.is_admitted());
//! assert_eq!(outcome.message(), "selected");
//!
//! recorder.shutdown().await?;
//! assert_eq!(repository.count_selected(CampaignId(1)).await?, 1);
//! # Ok(())
//! # }
//! ```
//!
//! ## Guarantees
//!
//! - With capacity `C` and `N > C` distinct concurrent applicants, exactly
//!   `C` are admitted and they hold the positions `1..=C`.
//! - Applying again returns the original decision. No second event is
//!   emitted and the campaign is not touched.
//! - The campaign moves `OPEN → CLOSED` once, driven by the call that took
//!   position `C`.
//! - Past the end date everyone is rejected; this is never an error.
//! - If the gate cannot decide, the caller gets
//!   [`AdmissionError::StoreUnavailable`]. It never receives a guessed
//!   admit or reject.
//!
//! ## Failure handling
//!
//! A granted slot is never taken back. If the close cannot be persisted the
//! admission reports [`CloseReport::Deferred`]. If the event is not accepted
//! the caller gets [`AdmissionError::DeliveryFailure`]. Either way the
//! leftover work is kept in the [`ReconciliationLedger`] and finished by
//! [`AdmissionService::reconcile`].
//!
//! Every call carries an [`ApplyToken`] that the store keeps next to the
//! user. A call that ends without a decision leaves its token in the ledger.
//! The user's next call reuses it, and `reconcile` looks it up, so a slot
//! granted behind a lost reply is still committed exactly once.
//!
//! ## Baseline
//!
//! [`BaselineApplier`] implements the same contract as one transaction per
//! call against durable storage. Calls on a campaign serialize on the row
//! lock; it exists to measure what the gate saves.
//!
//! ## Feature flags
//!
//! - `redis-store`: [`RedisAdmissionStore`], a shared admission store
//!   evaluated as one Lua script per call
//! - `test-helpers`: mocks for integration tests (`MockClock`,
//!   `FlakyAdmissionStore`, `RecordingPublisher`, `LogCapture`)

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::{
    baseline::BaselineApplier,
    circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState},
    error::{AdmissionError, PublishError, RepositoryError, StoreError},
    gate::AdmissionGate,
    ledger::{ReconcileReport, ReconciliationLedger},
    lifecycle::CampaignLifecycle,
    metrics::{Metrics, MetricsSnapshot},
    ports::{
        AdmissionStore, CampaignRepository, CampaignTransaction, Clock, EventPublisher,
    },
    recorder::{ApplicationRecorder, RecorderHandle, RecorderStats, ShutdownError},
    retry::{JitterPolicy, RetryPolicy, RetryPolicyError},
    service::{AdmissionConfig, AdmissionService, AdmissionServiceBuilder, BuildError},
};

pub use domain::{
    application::{ApplyEvent, CampaignApplication, APPLY_TOPIC},
    campaign::{Campaign, CampaignError, CampaignId, CampaignStatus, UserId},
    decision::{
        Admission, AdmissionEntry, ApplyOutcome, ApplyResponse, ApplyToken, CloseReport,
        Rejection, TryApplyResult, CAPACITY_REACHED_MESSAGE, SELECTED_MESSAGE,
    },
};

pub use infrastructure::{
    channel::{
        channel, ChannelConfig, ChannelConfigError, ChannelConsumer, ChannelPublisher, Envelope,
    },
    clock::SystemClock,
    repository::{InMemoryRepository, RepositoryConfig},
    storage::{AdmissionSet, ShardedAdmissionStore},
};

#[cfg(feature = "redis-store")]
pub use infrastructure::redis_storage::{RedisAdmissionStore, RedisStoreConfig};
