//! Fault-injecting admission store.

use crate::application::error::StoreError;
use crate::application::ports::AdmissionStore;
use crate::domain::{
    campaign::{CampaignId, UserId},
    decision::{AdmissionEntry, ApplyToken, TryApplyResult},
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Wraps a real store and injects failures.
///
/// - `set_unavailable(true)` refuses every call before it reaches the store
/// - `drop_replies(n)` lets the next `n` calls run, then reports them failed,
///   simulating a reply lost on the wire after the add happened
/// - `set_latency(d)` delays every call
#[derive(Debug)]
pub struct FlakyAdmissionStore {
    inner: Arc<dyn AdmissionStore>,
    unavailable: AtomicBool,
    dropped_replies: AtomicU32,
    latency: Mutex<Duration>,
    calls: AtomicU64,
}

impl FlakyAdmissionStore {
    /// Wrap `inner`, initially healthy.
    pub fn new(inner: Arc<dyn AdmissionStore>) -> Self {
        Self {
            inner,
            unavailable: AtomicBool::new(false),
            dropped_replies: AtomicU32::new(0),
            latency: Mutex::new(Duration::ZERO),
            calls: AtomicU64::new(0),
        }
    }

    /// Refuse (or stop refusing) every call.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Execute the next `count` calls but report them as failed.
    pub fn drop_replies(&self, count: u32) {
        self.dropped_replies.store(count, Ordering::SeqCst);
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().expect("latency mutex poisoned") = latency;
    }

    /// Number of `try_admit` calls that reached this store.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    async fn pause(&self) {
        let latency = *self.latency.lock().expect("latency mutex poisoned");
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    fn take_dropped_reply(&self) -> bool {
        self.dropped_replies
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl AdmissionStore for FlakyAdmissionStore {
    async fn try_admit(
        &self,
        campaign_id: CampaignId,
        user_id: UserId,
        token: ApplyToken,
        capacity: u64,
        ttl: Duration,
    ) -> Result<TryApplyResult, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection refused".into()));
        }
        let result = self
            .inner
            .try_admit(campaign_id, user_id, token, capacity, ttl)
            .await?;
        if self.take_dropped_reply() {
            return Err(StoreError::Unavailable("connection reset".into()));
        }
        Ok(result)
    }

    async fn lookup(
        &self,
        campaign_id: CampaignId,
        user_id: UserId,
    ) -> Result<Option<AdmissionEntry>, StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection refused".into()));
        }
        self.inner.lookup(campaign_id, user_id).await
    }

    async fn cardinality(&self, campaign_id: CampaignId) -> Result<u64, StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection refused".into()));
        }
        self.inner.cardinality(campaign_id).await
    }
}
