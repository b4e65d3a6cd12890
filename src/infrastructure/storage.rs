//! In-process admission store.
//!
//! Keeps one admission set per campaign in a sharded `DashMap`. Holding the
//! shard's entry lock for the whole add-expire-count sequence gives the same
//! per-key atomicity a server-side script gives, and unrelated campaigns hash
//! to different shards so they rarely contend.

use crate::application::error::StoreError;
use crate::application::ports::{AdmissionStore, Clock};
use crate::domain::{
    campaign::{CampaignId, UserId},
    decision::{AdmissionEntry, ApplyToken, TryApplyResult},
};
use ahash::RandomState;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Users who attempted admission to one campaign, with their positions.
#[derive(Debug, Clone, Default)]
pub struct AdmissionSet {
    entries: HashMap<UserId, AdmissionEntry, RandomState>,
    expires_at: Option<DateTime<Utc>>,
}

impl AdmissionSet {
    /// Number of users in the set.
    pub fn len(&self) -> u64 {
        self.entries.len() as u64
    }

    /// Returns `true` if nobody attempted admission yet.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Position assigned to `user_id`, if present.
    pub fn position(&self, user_id: UserId) -> Option<u64> {
        self.entry(user_id).map(|entry| entry.position)
    }

    /// Entry recorded for `user_id`, if present.
    pub fn entry(&self, user_id: UserId) -> Option<AdmissionEntry> {
        self.entries.get(&user_id).copied()
    }

    /// When the set expires, if an expiry was set.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Add the user if absent and return `(is_new, position)`.
    ///
    /// A present user counts as new only for the token that added them.
    fn admit(&mut self, user_id: UserId, token: ApplyToken) -> (bool, u64) {
        if let Some(entry) = self.entry(user_id) {
            return (entry.token == token, entry.position);
        }
        let position = self.len() + 1;
        self.entries
            .insert(user_id, AdmissionEntry { position, token });
        (true, position)
    }
}

/// Sharded in-memory implementation of [`AdmissionStore`].
///
/// Suitable for a single process and for tests. Expired sets are replaced
/// lazily on their next access; [`purge_expired`](Self::purge_expired) frees
/// sets that are never touched again.
pub struct ShardedAdmissionStore {
    sets: DashMap<CampaignId, AdmissionSet, RandomState>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for ShardedAdmissionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShardedAdmissionStore")
            .field("campaigns", &self.sets.len())
            .finish_non_exhaustive()
    }
}

impl ShardedAdmissionStore {
    /// Create an empty store that reads expiry against `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            sets: DashMap::with_hasher(RandomState::new()),
            clock,
        }
    }

    /// Copy of the live admission set for a campaign.
    pub fn snapshot(&self, campaign_id: CampaignId) -> Option<AdmissionSet> {
        let now = self.clock.now();
        self.sets
            .get(&campaign_id)
            .filter(|set| !set.is_expired(now))
            .map(|set| set.value().clone())
    }

    /// Number of campaigns with a stored set, expired or not.
    pub fn len(&self) -> usize {
        self.sets.len()
    }

    /// Returns `true` if no sets are stored.
    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    /// Drop every expired set. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.sets.len();
        self.sets.retain(|_, set| !set.is_expired(now));
        before.saturating_sub(self.sets.len())
    }
}

#[async_trait]
impl AdmissionStore for ShardedAdmissionStore {
    async fn try_admit(
        &self,
        campaign_id: CampaignId,
        user_id: UserId,
        token: ApplyToken,
        capacity: u64,
        ttl: Duration,
    ) -> Result<TryApplyResult, StoreError> {
        let now = self.clock.now();
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| StoreError::Protocol(format!("ttl out of range: {e}")))?;

        // The entry guard serializes all callers for this campaign until dropped
        let mut set = self.sets.entry(campaign_id).or_default();
        if set.is_expired(now) {
            *set = AdmissionSet::default();
        }
        let (is_new, position) = set.admit(user_id, token);
        if set.expires_at.is_none() {
            set.expires_at = Some(now + ttl);
        }
        drop(set);

        Ok(TryApplyResult::at_position(is_new, position, capacity))
    }

    async fn lookup(
        &self,
        campaign_id: CampaignId,
        user_id: UserId,
    ) -> Result<Option<AdmissionEntry>, StoreError> {
        let now = self.clock.now();
        Ok(self
            .sets
            .get(&campaign_id)
            .filter(|set| !set.is_expired(now))
            .and_then(|set| set.entry(user_id)))
    }

    async fn cardinality(&self, campaign_id: CampaignId) -> Result<u64, StoreError> {
        Ok(self.snapshot(campaign_id).map_or(0, |set| set.len()))
    }
}
