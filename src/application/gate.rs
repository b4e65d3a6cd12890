//! Fast-path admission gate.
//!
//! The gate turns one call of the shared counting primitive into an
//! accept/reject decision. All race-freedom comes from the store's per-key
//! atomicity; the gate itself holds no locks.
//!
//! Around the store call the gate adds:
//! - the `ttl <= 0` short-circuit (campaign over, everyone is rejected)
//! - a per-call timeout, reported as `StoreError::Timeout`
//! - bounded retries of transient failures, all under the caller's token
//! - a fail-closed circuit breaker

use crate::application::circuit_breaker::CircuitBreaker;
use crate::application::error::StoreError;
use crate::application::ports::AdmissionStore;
use crate::application::retry::RetryPolicy;
use crate::domain::{
    campaign::{CampaignId, UserId},
    decision::{AdmissionEntry, ApplyToken, TryApplyResult},
};
use std::sync::Arc;
use std::time::Duration;

/// Race-free accept/reject decision keyed by campaign.
#[derive(Debug, Clone)]
pub struct AdmissionGate {
    store: Arc<dyn AdmissionStore>,
    breaker: Arc<CircuitBreaker>,
    timeout: Duration,
    retry: RetryPolicy,
}

impl AdmissionGate {
    /// Create a gate over `store`.
    pub fn new(
        store: Arc<dyn AdmissionStore>,
        breaker: Arc<CircuitBreaker>,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            breaker,
            timeout,
            retry,
        }
    }

    /// Decide whether `user_id` gets a slot.
    ///
    /// A non-positive `ttl` means the campaign is over: the result is over
    /// limit and the store is not consulted.
    ///
    /// Every retry carries `token`. If an attempt added the user but its
    /// reply was lost, the next attempt still reports `is_new_user = true`.
    ///
    /// # Errors
    /// Returns `StoreError` if no attempt reached a decision. An attempt may
    /// still have added the user; a later call with the same token finds out.
    pub async fn try_admit(
        &self,
        campaign_id: CampaignId,
        user_id: UserId,
        token: ApplyToken,
        capacity: u64,
        ttl: chrono::Duration,
    ) -> Result<TryApplyResult, StoreError> {
        let ttl = match ttl.to_std() {
            Ok(ttl) if !ttl.is_zero() => ttl,
            _ => {
                tracing::debug!(%campaign_id, %user_id, "Campaign past end date, rejecting");
                return Ok(TryApplyResult::expired());
            }
        };

        self.retry
            .run("admission_store.try_admit", StoreError::is_transient, |_| {
                self.attempt(campaign_id, user_id, token, capacity, ttl)
            })
            .await
    }

    async fn attempt(
        &self,
        campaign_id: CampaignId,
        user_id: UserId,
        token: ApplyToken,
        capacity: u64,
        ttl: Duration,
    ) -> Result<TryApplyResult, StoreError> {
        if !self.breaker.try_acquire() {
            return Err(StoreError::CircuitOpen);
        }

        let call = self
            .store
            .try_admit(campaign_id, user_id, token, capacity, ttl);
        let outcome = match tokio::time::timeout(self.timeout, call).await {
            Ok(outcome) => outcome,
            Err(_) => Err(StoreError::Timeout(self.timeout)),
        };

        match &outcome {
            Ok(_) => self.breaker.record_success(),
            Err(e) => {
                tracing::warn!(%campaign_id, %user_id, error = %e, "Admission store call failed");
                self.breaker.record_failure();
            }
        }
        outcome
    }

    /// Read a user's entry without adding them.
    ///
    /// # Errors
    /// Returns `StoreError` if the store cannot be read.
    pub async fn lookup(
        &self,
        campaign_id: CampaignId,
        user_id: UserId,
    ) -> Result<Option<AdmissionEntry>, StoreError> {
        let call = self.store.lookup(campaign_id, user_id);
        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| StoreError::Timeout(self.timeout))?
    }

    /// Number of users admitted so far: the set's cardinality capped at
    /// `capacity`.
    ///
    /// # Errors
    /// Returns `StoreError` if the store cannot be read.
    pub async fn admitted_count(
        &self,
        campaign_id: CampaignId,
        capacity: u64,
    ) -> Result<u64, StoreError> {
        let call = self.store.cardinality(campaign_id);
        let cardinality = tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| StoreError::Timeout(self.timeout))??;
        Ok(cardinality.min(capacity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::circuit_breaker::{CircuitBreakerConfig, CircuitState};
    use crate::infrastructure::mocks::{FlakyAdmissionStore, MockClock};
    use crate::infrastructure::storage::ShardedAdmissionStore;
    use chrono::Utc;

    fn gate_over(store: Arc<dyn AdmissionStore>, retry: RetryPolicy) -> AdmissionGate {
        AdmissionGate::new(
            store,
            Arc::new(CircuitBreaker::new()),
            Duration::from_millis(200),
            retry,
        )
    }

    fn token() -> ApplyToken {
        ApplyToken::random()
    }

    fn memory_store() -> Arc<ShardedAdmissionStore> {
        Arc::new(ShardedAdmissionStore::new(Arc::new(MockClock::new(
            Utc::now(),
        ))))
    }

    #[tokio::test]
    async fn test_positions_and_limit() {
        let gate = gate_over(memory_store(), RetryPolicy::no_retry());
        let ttl = chrono::Duration::minutes(10);

        for user in 1..=2 {
            let r = gate
                .try_admit(CampaignId(1), UserId(user), token(), 2, ttl)
                .await
                .unwrap();
            assert!(r.is_new_user);
            assert_eq!(r.current_count, user);
            assert!(!r.is_over_limit);
        }

        let r = gate
            .try_admit(CampaignId(1), UserId(3), token(), 2, ttl)
            .await
            .unwrap();
        assert_eq!(r.current_count, 3);
        assert!(r.is_over_limit);
    }

    #[tokio::test]
    async fn test_reapplication_keeps_position() {
        let gate = gate_over(memory_store(), RetryPolicy::no_retry());
        let ttl = chrono::Duration::minutes(10);

        for user in [7, 8] {
            gate.try_admit(CampaignId(1), UserId(user), token(), 5, ttl)
                .await
                .unwrap();
        }

        let again = gate
            .try_admit(CampaignId(1), UserId(7), token(), 5, ttl)
            .await
            .unwrap();
        assert!(!again.is_new_user);
        assert_eq!(again.current_count, 1);
    }

    #[tokio::test]
    async fn test_non_positive_ttl_rejects_without_store() {
        let flaky = Arc::new(FlakyAdmissionStore::new(memory_store()));
        flaky.set_unavailable(true);
        let gate = gate_over(flaky.clone(), RetryPolicy::no_retry());

        for ttl in [chrono::Duration::zero(), chrono::Duration::seconds(-30)] {
            let r = gate
                .try_admit(CampaignId(1), UserId(1), token(), 10, ttl)
                .await
                .unwrap();
            assert!(r.is_over_limit);
        }
        assert_eq!(flaky.calls(), 0);
    }

    #[tokio::test]
    async fn test_unavailable_store_is_an_error() {
        let flaky = Arc::new(FlakyAdmissionStore::new(memory_store()));
        flaky.set_unavailable(true);
        let gate = gate_over(flaky, RetryPolicy::no_retry());

        let err = gate
            .try_admit(CampaignId(1), UserId(1), token(), 10, chrono::Duration::minutes(1))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_reply_is_recovered_by_retry() {
        let flaky = Arc::new(FlakyAdmissionStore::new(memory_store()));
        flaky.drop_replies(1);
        let gate = gate_over(flaky.clone(), RetryPolicy::default());

        let r = gate
            .try_admit(
                CampaignId(1),
                UserId(1),
                token(),
                10,
                chrono::Duration::minutes(1),
            )
            .await
            .unwrap();
        assert!(r.is_new_user);
        assert_eq!(r.current_count, 1);
        assert_eq!(flaky.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_reply_for_known_user_stays_known() {
        let flaky = Arc::new(FlakyAdmissionStore::new(memory_store()));
        let gate = gate_over(flaky.clone(), RetryPolicy::default());
        let ttl = chrono::Duration::minutes(1);

        gate.try_admit(CampaignId(1), UserId(1), ApplyToken(1), 10, ttl)
            .await
            .unwrap();

        flaky.drop_replies(1);
        let again = gate
            .try_admit(CampaignId(1), UserId(1), ApplyToken(2), 10, ttl)
            .await
            .unwrap();
        assert!(!again.is_new_user);
        assert_eq!(again.current_count, 1);
    }

    #[tokio::test]
    async fn test_lost_reply_leaves_entry_for_token() {
        let flaky = Arc::new(FlakyAdmissionStore::new(memory_store()));
        flaky.drop_replies(1);
        let gate = gate_over(flaky, RetryPolicy::no_retry());
        let token = ApplyToken(9);

        let err = gate
            .try_admit(CampaignId(1), UserId(4), token, 10, chrono::Duration::minutes(1))
            .await
            .unwrap_err();
        assert!(err.is_transient());

        let entry = gate.lookup(CampaignId(1), UserId(4)).await.unwrap().unwrap();
        assert_eq!(entry, AdmissionEntry { position: 1, token });
    }

    #[tokio::test]
    async fn test_cancelled_trial_does_not_wedge_circuit() {
        let flaky = Arc::new(FlakyAdmissionStore::new(memory_store()));
        let breaker = Arc::new(CircuitBreaker::with_config(CircuitBreakerConfig {
            failure_threshold: 1,
            recovery_timeout: Duration::from_millis(30),
        }));
        let gate = AdmissionGate::new(
            flaky.clone(),
            breaker.clone(),
            Duration::from_secs(1),
            RetryPolicy::no_retry(),
        );
        let ttl = chrono::Duration::minutes(1);

        flaky.set_unavailable(true);
        let _ = gate
            .try_admit(CampaignId(1), UserId(1), token(), 5, ttl)
            .await;
        assert_eq!(breaker.state(), CircuitState::Open);
        flaky.set_unavailable(false);

        // The trial caller gives up before the store answers
        tokio::time::sleep(Duration::from_millis(50)).await;
        flaky.set_latency(Duration::from_millis(200));
        let trial = gate.try_admit(CampaignId(1), UserId(2), token(), 5, ttl);
        assert!(tokio::time::timeout(Duration::from_millis(20), trial)
            .await
            .is_err());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        flaky.set_latency(Duration::ZERO);
        tokio::time::sleep(Duration::from_millis(50)).await;
        let r = gate
            .try_admit(CampaignId(1), UserId(3), token(), 5, ttl)
            .await
            .unwrap();
        assert!(r.is_new_user);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_open_circuit_fails_fast() {
        let flaky = Arc::new(FlakyAdmissionStore::new(memory_store()));
        flaky.set_unavailable(true);
        let breaker = Arc::new(CircuitBreaker::with_config(CircuitBreakerConfig {
            failure_threshold: 2,
            recovery_timeout: Duration::from_secs(60),
        }));
        let gate = AdmissionGate::new(
            flaky.clone(),
            breaker,
            Duration::from_millis(200),
            RetryPolicy::no_retry(),
        );
        let ttl = chrono::Duration::minutes(1);

        for _ in 0..2 {
            let _ = gate
                .try_admit(CampaignId(1), UserId(1), token(), 1, ttl)
                .await;
        }
        let err = gate
            .try_admit(CampaignId(1), UserId(1), token(), 1, ttl)
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::CircuitOpen);
        assert_eq!(flaky.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_store_times_out() {
        let flaky = Arc::new(FlakyAdmissionStore::new(memory_store()));
        flaky.set_latency(Duration::from_secs(5));
        let gate = gate_over(flaky, RetryPolicy::no_retry());

        let err = gate
            .try_admit(CampaignId(1), UserId(1), token(), 1, chrono::Duration::minutes(1))
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::Timeout(Duration::from_millis(200)));
    }
}
