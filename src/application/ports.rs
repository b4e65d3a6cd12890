//! Ports (interfaces) for the application layer.
//!
//! In hexagonal architecture, ports define the interfaces that the application
//! layer needs. Infrastructure adapters implement these ports.

use crate::application::error::{PublishError, RepositoryError, StoreError};
use crate::domain::{
    application::{ApplyEvent, CampaignApplication},
    campaign::{Campaign, CampaignId, UserId},
    decision::{AdmissionEntry, ApplyToken, TryApplyResult},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt::Debug;
use std::time::Duration;

/// Port for obtaining the current wall-clock time.
///
/// Infrastructure provides concrete implementations (SystemClock, MockClock).
pub trait Clock: Send + Sync + Debug {
    /// Get the current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Port for the shared atomic counting primitive behind the admission gate.
///
/// Implementations must run `try_admit` as one atomic unit per campaign key:
/// add the user if absent, set the expiry if none is set, and read the
/// position. Two distinct users must never receive the same position.
///
/// The store keeps the [`ApplyToken`] of the call that added each user.
/// `is_new_user` is `true` when the user was absent, or was added earlier
/// under the same token.
#[async_trait]
pub trait AdmissionStore: Send + Sync + Debug {
    /// Add `user_id` to the campaign's admission set and report its position.
    ///
    /// # Arguments
    /// * `token` - Identifies the logical call; repeated on every retry
    /// * `capacity` - Number of slots, used to derive `is_over_limit`
    /// * `ttl` - Expiry applied if the set has none yet (always positive)
    async fn try_admit(
        &self,
        campaign_id: CampaignId,
        user_id: UserId,
        token: ApplyToken,
        capacity: u64,
        ttl: Duration,
    ) -> Result<TryApplyResult, StoreError>;

    /// Read a user's entry without adding them.
    ///
    /// Returns `None` if the user is absent or the set has expired.
    async fn lookup(
        &self,
        campaign_id: CampaignId,
        user_id: UserId,
    ) -> Result<Option<AdmissionEntry>, StoreError>;

    /// Number of users currently in the campaign's admission set.
    ///
    /// Returns 0 for a missing or expired set.
    async fn cardinality(&self, campaign_id: CampaignId) -> Result<u64, StoreError>;
}

/// Port for handing events to the async durable-write pipeline.
#[async_trait]
pub trait EventPublisher: Send + Sync + Debug {
    /// Hand `event` to the pipeline.
    ///
    /// Returns once the pipeline has accepted the event, not once it has been
    /// persisted.
    async fn publish(&self, event: ApplyEvent) -> Result<(), PublishError>;
}

/// Port for transactional durable storage of campaigns and applications.
#[async_trait]
pub trait CampaignRepository: Send + Sync + Debug {
    /// Look up a campaign.
    async fn find_campaign(&self, id: CampaignId) -> Result<Option<Campaign>, RepositoryError>;

    /// Insert or replace a campaign.
    async fn save_campaign(&self, campaign: &Campaign) -> Result<(), RepositoryError>;

    /// Upsert an application row keyed by `(campaign_id, user_id)`.
    ///
    /// Returns `true` if a new row was created. An existing row keeps its
    /// original `applied_at`.
    async fn save_application(
        &self,
        application: CampaignApplication,
    ) -> Result<bool, RepositoryError>;

    /// Number of application rows for a campaign.
    async fn count_applications(&self, id: CampaignId) -> Result<u64, RepositoryError>;

    /// Number of application rows with `selected = true` for a campaign.
    async fn count_selected(&self, id: CampaignId) -> Result<u64, RepositoryError>;

    /// Open a transaction holding the campaign row lock.
    ///
    /// Concurrent transactions on the same campaign serialize. Returns
    /// `None` if the campaign does not exist.
    async fn begin(
        &self,
        id: CampaignId,
    ) -> Result<Option<Box<dyn CampaignTransaction>>, RepositoryError>;
}

/// A transaction scoped to one campaign row.
///
/// Dropping the transaction without committing discards staged writes.
#[async_trait]
pub trait CampaignTransaction: Send {
    /// The campaign as read at the start of the transaction, plus staged edits.
    fn campaign(&self) -> &Campaign;

    /// Stage edits to the campaign row.
    fn campaign_mut(&mut self) -> &mut Campaign;

    /// Look up an existing application row for this campaign.
    fn application(&self, user_id: UserId) -> Option<CampaignApplication>;

    /// Stage an application row.
    fn insert_application(&mut self, application: CampaignApplication);

    /// Apply staged writes and release the row lock.
    async fn commit(self: Box<Self>) -> Result<(), RepositoryError>;
}
