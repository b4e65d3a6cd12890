//! Admission orchestrator.
//!
//! `AdmissionService::apply` composes the gate, the campaign lifecycle and
//! the event publisher:
//!
//! 1. load the campaign, which must exist and be `Open`
//! 2. ask the gate for a decision with `ttl = end_date - now`
//! 3. over limit: return `Rejected`, auditing first-time rejections
//! 4. a known user: return the original decision, nothing else happens
//! 5. a new admission: close the campaign if this took the last slot, then
//!    hand the event to the publisher
//!
//! Once the gate has granted a slot, step 5 runs on its own task. Dropping
//! the `apply` future after that point does not lose the close or the event.
//!
//! Every call carries an [`ApplyToken`]. If the gate call ends without a
//! decision (store failure or cancellation) the token stays in the ledger;
//! the user's next call reuses it, and [`AdmissionService::reconcile`] checks
//! whether it took a slot.

use crate::application::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::application::error::{AdmissionError, PublishError, RepositoryError};
use crate::application::gate::AdmissionGate;
use crate::application::ledger::{ReconcileReport, ReconciliationLedger};
use crate::application::lifecycle::CampaignLifecycle;
use crate::application::metrics::Metrics;
use crate::application::ports::{AdmissionStore, CampaignRepository, Clock, EventPublisher};
use crate::application::retry::{RetryPolicy, RetryPolicyError};
use crate::domain::{
    application::ApplyEvent,
    campaign::{Campaign, CampaignId, UserId},
    decision::{Admission, ApplyOutcome, ApplyToken, CloseReport, Rejection},
};
use crate::infrastructure::clock::SystemClock;
use crate::infrastructure::storage::ShardedAdmissionStore;
use std::sync::Arc;
use std::time::Duration;

/// Tunables for [`AdmissionService`].
#[derive(Debug, Clone)]
pub struct AdmissionConfig {
    /// Upper bound on one call to the admission store
    pub store_timeout: Duration,
    /// Retries for transient admission store failures
    pub store_retry: RetryPolicy,
    /// Retries for transient publish failures
    pub publish_retry: RetryPolicy,
    /// Emit `selected = false` events for first-time rejections
    pub record_rejections: bool,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            store_timeout: Duration::from_millis(500),
            store_retry: RetryPolicy::default(),
            publish_retry: RetryPolicy::default(),
            record_rejections: true,
        }
    }
}

/// Error returned when service configuration validation fails.
#[derive(Debug, Clone, PartialEq)]
pub enum BuildError {
    /// No publisher was configured
    MissingPublisher,
    /// No repository was configured
    MissingRepository,
    /// Store timeout must be greater than zero
    ZeroStoreTimeout,
    /// Circuit breaker must tolerate at least one failure
    ZeroFailureThreshold,
    /// A retry policy is invalid
    Retry {
        policy: &'static str,
        source: RetryPolicyError,
    },
}

impl std::fmt::Display for BuildError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildError::MissingPublisher => write!(f, "an event publisher is required"),
            BuildError::MissingRepository => write!(f, "a campaign repository is required"),
            BuildError::ZeroStoreTimeout => write!(f, "store_timeout must be greater than 0"),
            BuildError::ZeroFailureThreshold => {
                write!(f, "failure_threshold must be greater than 0")
            }
            BuildError::Retry { policy, source } => {
                write!(f, "invalid {} policy: {}", policy, source)
            }
        }
    }
}

impl std::error::Error for BuildError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BuildError::Retry { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Builder for constructing an [`AdmissionService`].
#[derive(Debug, Default)]
pub struct AdmissionServiceBuilder {
    clock: Option<Arc<dyn Clock>>,
    store: Option<Arc<dyn AdmissionStore>>,
    publisher: Option<Arc<dyn EventPublisher>>,
    repository: Option<Arc<dyn CampaignRepository>>,
    config: AdmissionConfig,
    breaker: CircuitBreakerConfig,
}

impl AdmissionServiceBuilder {
    /// Set the clock used to compute the time left in a campaign.
    ///
    /// Defaults to the system clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Set the atomic counting primitive.
    ///
    /// Defaults to an in-process [`ShardedAdmissionStore`] using the
    /// configured clock.
    pub fn with_store(mut self, store: Arc<dyn AdmissionStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the publisher feeding the durable-write pipeline (required).
    pub fn with_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Set the durable campaign storage (required).
    pub fn with_repository(mut self, repository: Arc<dyn CampaignRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    /// Replace the service tunables.
    pub fn with_config(mut self, config: AdmissionConfig) -> Self {
        self.config = config;
        self
    }

    /// Configure the admission store circuit breaker.
    pub fn with_breaker_config(mut self, config: CircuitBreakerConfig) -> Self {
        self.breaker = config;
        self
    }

    /// Build the service.
    ///
    /// # Errors
    /// Returns `BuildError` if a required component is missing or the
    /// configuration is invalid.
    pub fn build(self) -> Result<AdmissionService, BuildError> {
        let publisher = self.publisher.ok_or(BuildError::MissingPublisher)?;
        let repository = self.repository.ok_or(BuildError::MissingRepository)?;

        if self.config.store_timeout.is_zero() {
            return Err(BuildError::ZeroStoreTimeout);
        }
        if self.breaker.failure_threshold == 0 {
            return Err(BuildError::ZeroFailureThreshold);
        }
        self.config
            .store_retry
            .validate()
            .map_err(|source| BuildError::Retry {
                policy: "store_retry",
                source,
            })?;
        self.config
            .publish_retry
            .validate()
            .map_err(|source| BuildError::Retry {
                policy: "publish_retry",
                source,
            })?;

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock::new()));
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(ShardedAdmissionStore::new(Arc::clone(&clock))));

        let metrics = Metrics::new();
        let ledger = ReconciliationLedger::new();
        let gate = AdmissionGate::new(
            store,
            Arc::new(CircuitBreaker::with_config(self.breaker)),
            self.config.store_timeout,
            self.config.store_retry,
        );
        let lifecycle =
            CampaignLifecycle::new(Arc::clone(&repository), ledger.clone(), metrics.clone());

        Ok(AdmissionService {
            inner: Arc::new(Inner {
                clock,
                repository,
                publisher,
                gate,
                lifecycle,
                ledger,
                metrics,
                config: self.config,
            }),
        })
    }
}

/// Capacity-limited admission service.
///
/// Cheap to clone; clones share the gate, ledger and metrics.
#[derive(Debug, Clone)]
pub struct AdmissionService {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    clock: Arc<dyn Clock>,
    repository: Arc<dyn CampaignRepository>,
    publisher: Arc<dyn EventPublisher>,
    gate: AdmissionGate,
    lifecycle: CampaignLifecycle,
    ledger: ReconciliationLedger,
    metrics: Metrics,
    config: AdmissionConfig,
}

impl AdmissionService {
    /// Create a builder.
    pub fn builder() -> AdmissionServiceBuilder {
        AdmissionServiceBuilder::default()
    }

    /// Apply `user_id` to `campaign_id`.
    ///
    /// A full or finished campaign yields `Ok(ApplyOutcome::Rejected)`.
    /// Calling again for a user the gate already knows returns the same
    /// decision without emitting an event or touching the campaign. That
    /// holds while the campaign is open: once closed, every call fails with
    /// `InvalidState`, including calls from admitted users.
    ///
    /// If the user's previous call ended without a decision, this call
    /// finishes whatever that call started.
    ///
    /// # Errors
    /// - `NotFound` / `InvalidState` if the campaign is missing or not open
    /// - `CampaignLookup` if the campaign cannot be read
    /// - `StoreUnavailable` if the gate cannot decide
    /// - `DeliveryFailure` if the slot was granted but the event was not
    ///   accepted; the event is kept for [`reconcile`](Self::reconcile)
    pub async fn apply(
        &self,
        campaign_id: CampaignId,
        user_id: UserId,
    ) -> Result<ApplyOutcome, AdmissionError> {
        let inner = &self.inner;
        let campaign = inner.load(campaign_id).await?;
        if !campaign.status.is_open() {
            return Err(AdmissionError::InvalidState {
                campaign_id,
                status: campaign.status,
            });
        }

        let ttl = campaign.remaining(inner.clock.now());
        let inherited = inner.ledger.take_unconfirmed(campaign_id, user_id);
        let token = inherited.unwrap_or_else(ApplyToken::random);
        let pending = PendingCall::new(&inner.ledger, campaign_id, user_id, token);

        let decision = inner
            .gate
            .try_admit(campaign_id, user_id, token, campaign.capacity, ttl)
            .await
            .map_err(|source| {
                inner.metrics.record_store_failure();
                AdmissionError::StoreUnavailable {
                    campaign_id,
                    source,
                }
            })?;

        if decision.is_expired() && inherited.is_some() {
            // The earlier call may still hold a slot
            drop(pending);
        } else {
            pending.settle();
        }
        if inherited.is_some() && decision.is_new_user {
            tracing::info!(
                %campaign_id,
                %user_id,
                position = decision.current_count,
                "Finishing application left undecided by an earlier call"
            );
        }

        if decision.is_over_limit {
            if decision.is_new_user {
                inner.metrics.record_rejected();
                if inner.config.record_rejections {
                    self.audit_rejection(ApplyEvent::rejected(campaign_id, user_id))
                        .await;
                }
            } else if !decision.is_expired() {
                inner.metrics.record_duplicate();
            }
            tracing::debug!(
                %campaign_id,
                %user_id,
                position = decision.current_count,
                "Application rejected"
            );
            return Ok(ApplyOutcome::Rejected(Rejection {
                campaign_id,
                user_id,
                first_attempt: decision.is_new_user,
            }));
        }

        let position = decision.current_count;
        if !decision.is_new_user {
            inner.metrics.record_duplicate();
            tracing::debug!(%campaign_id, %user_id, position, "Repeated application");
            return Ok(ApplyOutcome::Admitted(Admission {
                campaign_id,
                user_id,
                position,
                first_attempt: false,
                close: CloseReport::Unchanged,
            }));
        }

        inner.metrics.record_admitted();
        tracing::debug!(%campaign_id, %user_id, position, "Application admitted");
        let close = self.commit(&campaign, user_id, position).await?;
        Ok(ApplyOutcome::Admitted(Admission {
            campaign_id,
            user_id,
            position,
            first_attempt: true,
            close,
        }))
    }

    /// Finish a granted admission on a detached task.
    async fn commit(
        &self,
        campaign: &Campaign,
        user_id: UserId,
        position: u64,
    ) -> Result<CloseReport, AdmissionError> {
        let campaign_id = campaign.id;
        let event = ApplyEvent::selected(campaign_id, user_id);
        let closes = campaign.is_last_slot(position);

        // Held until the publisher accepts it
        self.inner.ledger.hold_event(event);

        let inner = Arc::clone(&self.inner);
        let task =
            tokio::spawn(async move { inner.finish_admission(event, position, closes).await });

        match task.await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(
                    %campaign_id,
                    %user_id,
                    position,
                    error = %e,
                    "Admission commit task failed, event kept for reconciliation"
                );
                Err(AdmissionError::DeliveryFailure {
                    campaign_id,
                    user_id,
                    position,
                    source: PublishError::Rejected(e.to_string()),
                })
            }
        }
    }

    async fn audit_rejection(&self, event: ApplyEvent) {
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move { inner.deliver(event).await });

        let error = match task.await {
            Ok(Ok(())) => return,
            Ok(Err(e)) => e.to_string(),
            Err(e) => e.to_string(),
        };
        tracing::warn!(
            campaign_id = %event.campaign_id,
            user_id = %event.user_id,
            error = %error,
            "Failed to record rejected application"
        );
    }

    /// Finish work left behind by earlier calls.
    ///
    /// Undecided gate calls are checked against the store and finished if
    /// they took a slot. Deferred closes are re-derived from the gate's
    /// admitted count and undelivered events are published again. Failures
    /// stay in the ledger for the next pass.
    pub async fn reconcile(&self) -> ReconcileReport {
        let inner = &self.inner;
        let mut report = ReconcileReport::default();

        for (campaign_id, user_id, _) in inner.ledger.unconfirmed() {
            // A concurrent apply may have claimed it already
            let Some(token) = inner.ledger.take_unconfirmed(campaign_id, user_id) else {
                continue;
            };
            let pending = PendingCall::new(&inner.ledger, campaign_id, user_id, token);
            match self.settle_unconfirmed(campaign_id, user_id, token).await {
                Ok(recovered) => {
                    pending.settle();
                    if recovered {
                        report.admissions_recovered += 1;
                    }
                }
                Err(AdmissionError::NotFound { .. }) => pending.settle(),
                Err(e) => {
                    drop(pending);
                    tracing::warn!(
                        %campaign_id,
                        %user_id,
                        error = %e,
                        "Undecided call still unsettled"
                    );
                }
            }
        }

        for campaign_id in inner.ledger.deferred_closes() {
            match self.reconcile_campaign(campaign_id).await {
                Ok(_) => report.closes_applied += 1,
                Err(e) => {
                    tracing::warn!(%campaign_id, error = %e, "Deferred close still failing");
                }
            }
        }

        for event in inner.ledger.undelivered() {
            match inner.deliver(event).await {
                Ok(()) => {
                    inner.ledger.release_event(&event);
                    report.events_delivered += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        campaign_id = %event.campaign_id,
                        user_id = %event.user_id,
                        error = %e,
                        "Held event still undelivered"
                    );
                }
            }
        }

        report.closes_pending = inner.ledger.deferred_closes().len();
        report.events_pending = inner.ledger.undelivered().len();
        report.unconfirmed_pending = inner.ledger.unconfirmed().len();
        tracing::info!(
            admissions_recovered = report.admissions_recovered,
            unconfirmed_pending = report.unconfirmed_pending,
            closes_applied = report.closes_applied,
            closes_pending = report.closes_pending,
            events_delivered = report.events_delivered,
            events_pending = report.events_pending,
            "Reconciliation pass finished"
        );
        report
    }

    /// Finish an undecided call if its token added the user.
    ///
    /// Returns `true` if the call turned out to hold a slot.
    async fn settle_unconfirmed(
        &self,
        campaign_id: CampaignId,
        user_id: UserId,
        token: ApplyToken,
    ) -> Result<bool, AdmissionError> {
        let inner = &self.inner;
        let entry = inner
            .gate
            .lookup(campaign_id, user_id)
            .await
            .map_err(|source| AdmissionError::StoreUnavailable {
                campaign_id,
                source,
            })?;
        let position = match entry {
            Some(entry) if entry.token == token => entry.position,
            // Never added, or added by another call that already answered
            _ => return Ok(false),
        };

        let campaign = inner.load(campaign_id).await?;
        if position > campaign.capacity {
            inner.metrics.record_rejected();
            if inner.config.record_rejections {
                self.audit_rejection(ApplyEvent::rejected(campaign_id, user_id))
                    .await;
            }
            return Ok(false);
        }

        inner.metrics.record_admitted();
        tracing::info!(
            %campaign_id,
            %user_id,
            position,
            "Recovered admission from an undecided call"
        );
        // A delivery failure leaves the event held for the next step
        let _ = self.commit(&campaign, user_id, position).await;
        Ok(true)
    }

    /// Re-derive one campaign's status from its true admitted count.
    ///
    /// Closes the campaign if the gate has admitted `capacity` users or the
    /// end date has passed. Returns `true` if this call closed it.
    ///
    /// # Errors
    /// Returns `AdmissionError` if the campaign or the gate cannot be read,
    /// or the close cannot be persisted.
    pub async fn reconcile_campaign(
        &self,
        campaign_id: CampaignId,
    ) -> Result<bool, AdmissionError> {
        let inner = &self.inner;
        let campaign = inner.load(campaign_id).await?;
        if campaign.remaining(inner.clock.now()) <= chrono::Duration::zero() {
            return inner.lifecycle.close(campaign_id).await;
        }

        let admitted = inner
            .gate
            .admitted_count(campaign_id, campaign.capacity)
            .await
            .map_err(|source| AdmissionError::StoreUnavailable {
                campaign_id,
                source,
            })?;
        inner.lifecycle.reconcile(campaign_id, admitted).await
    }

    /// Shared admission counters.
    pub fn metrics(&self) -> &Metrics {
        &self.inner.metrics
    }

    /// Work waiting for [`reconcile`](Self::reconcile).
    pub fn ledger(&self) -> &ReconciliationLedger {
        &self.inner.ledger
    }

    /// The admission gate.
    pub fn gate(&self) -> &AdmissionGate {
        &self.inner.gate
    }
}

/// Records an undecided call in the ledger unless settled.
///
/// Dropped on error or cancellation, it keeps the token for the next call
/// or reconciliation pass.
struct PendingCall<'a> {
    ledger: &'a ReconciliationLedger,
    campaign_id: CampaignId,
    user_id: UserId,
    token: ApplyToken,
    settled: bool,
}

impl<'a> PendingCall<'a> {
    fn new(
        ledger: &'a ReconciliationLedger,
        campaign_id: CampaignId,
        user_id: UserId,
        token: ApplyToken,
    ) -> Self {
        Self {
            ledger,
            campaign_id,
            user_id,
            token,
            settled: false,
        }
    }

    fn settle(mut self) {
        self.settled = true;
    }
}

impl Drop for PendingCall<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        tracing::debug!(
            campaign_id = %self.campaign_id,
            user_id = %self.user_id,
            token = %self.token,
            "Call ended without a decision, keeping token"
        );
        self.ledger
            .mark_unconfirmed(self.campaign_id, self.user_id, self.token);
    }
}

impl Inner {
    async fn load(&self, campaign_id: CampaignId) -> Result<Campaign, AdmissionError> {
        self.repository
            .find_campaign(campaign_id)
            .await
            .map_err(|source: RepositoryError| AdmissionError::CampaignLookup {
                campaign_id,
                source,
            })?
            .ok_or(AdmissionError::NotFound { campaign_id })
    }

    async fn finish_admission(
        &self,
        event: ApplyEvent,
        position: u64,
        closes: bool,
    ) -> Result<CloseReport, AdmissionError> {
        let close = if closes {
            match self.lifecycle.close(event.campaign_id).await {
                Ok(true) => CloseReport::Closed,
                Ok(false) => CloseReport::Unchanged,
                Err(e) => CloseReport::Deferred {
                    reason: e.to_string(),
                },
            }
        } else {
            CloseReport::Unchanged
        };

        match self.deliver(event).await {
            Ok(()) => {
                self.ledger.release_event(&event);
                Ok(close)
            }
            Err(source) => {
                self.metrics.record_delivery_failure();
                tracing::warn!(
                    campaign_id = %event.campaign_id,
                    user_id = %event.user_id,
                    position,
                    error = %source,
                    "Admission granted but event not delivered"
                );
                Err(AdmissionError::DeliveryFailure {
                    campaign_id: event.campaign_id,
                    user_id: event.user_id,
                    position,
                    source,
                })
            }
        }
    }

    async fn deliver(&self, event: ApplyEvent) -> Result<(), PublishError> {
        self.config
            .publish_retry
            .run("event_publisher.publish", PublishError::is_transient, |_| {
                self.publisher.publish(event)
            })
            .await
    }
}
