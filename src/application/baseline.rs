//! Transactional baseline applier.
//!
//! Every call runs one transaction holding the campaign row lock, so
//! concurrent calls on a campaign serialize on durable storage. This is the
//! path the gate replaces; it stays here to measure that contention.

use crate::application::error::AdmissionError;
use crate::application::ports::{CampaignRepository, Clock};
use crate::domain::{
    application::ApplyEvent,
    campaign::{CampaignId, UserId},
    decision::{Admission, ApplyOutcome, CloseReport, Rejection},
};
use std::sync::Arc;

/// Applies users by locking and re-reading the campaign row.
#[derive(Debug, Clone)]
pub struct BaselineApplier {
    repository: Arc<dyn CampaignRepository>,
    clock: Arc<dyn Clock>,
}

impl BaselineApplier {
    /// Create an applier over `repository`.
    pub fn new(repository: Arc<dyn CampaignRepository>, clock: Arc<dyn Clock>) -> Self {
        Self { repository, clock }
    }

    /// Apply `user_id` to `campaign_id` in one transaction.
    ///
    /// The user is selected if the campaign is open and
    /// `current_applicants < capacity`. A row is inserted either way. A user
    /// who already has a row gets the recorded decision back; their position
    /// is not tracked and is reported as 0.
    ///
    /// # Errors
    /// - `NotFound` if the campaign does not exist
    /// - `PersistenceFailure` if the transaction cannot be opened or committed
    pub async fn apply(
        &self,
        campaign_id: CampaignId,
        user_id: UserId,
    ) -> Result<ApplyOutcome, AdmissionError> {
        let persistence = |source| AdmissionError::PersistenceFailure {
            campaign_id,
            source,
        };
        let mut tx = self
            .repository
            .begin(campaign_id)
            .await
            .map_err(persistence)?
            .ok_or(AdmissionError::NotFound { campaign_id })?;

        if let Some(existing) = tx.application(user_id) {
            tracing::debug!(%campaign_id, %user_id, "Baseline application already recorded");
            return Ok(if existing.selected {
                ApplyOutcome::Admitted(Admission {
                    campaign_id,
                    user_id,
                    position: 0,
                    first_attempt: false,
                    close: CloseReport::Unchanged,
                })
            } else {
                ApplyOutcome::Rejected(Rejection {
                    campaign_id,
                    user_id,
                    first_attempt: false,
                })
            });
        }

        let now = self.clock.now();
        let campaign = tx.campaign_mut();
        campaign.sync_status(now);
        let was_open = campaign.status.is_open();
        let selected = was_open && campaign.current_applicants < campaign.capacity;
        if selected {
            campaign.increase_applicants();
            campaign.sync_status(now);
        }
        let position = campaign.current_applicants;
        let closed = was_open && !campaign.status.is_open();

        let event = ApplyEvent {
            campaign_id,
            user_id,
            selected,
        };
        tx.insert_application(event.into_application(now));
        tx.commit().await.map_err(persistence)?;

        tracing::debug!(%campaign_id, %user_id, selected, "Baseline application stored");
        if !selected {
            return Ok(ApplyOutcome::Rejected(Rejection {
                campaign_id,
                user_id,
                first_attempt: true,
            }));
        }
        Ok(ApplyOutcome::Admitted(Admission {
            campaign_id,
            user_id,
            position,
            first_attempt: true,
            close: if closed {
                CloseReport::Closed
            } else {
                CloseReport::Unchanged
            },
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::campaign::{Campaign, CampaignStatus};
    use crate::infrastructure::mocks::MockClock;
    use crate::infrastructure::repository::InMemoryRepository;
    use chrono::Utc;

    async fn setup(capacity: u64) -> (BaselineApplier, InMemoryRepository, Arc<MockClock>) {
        let clock = Arc::new(MockClock::new(Utc::now()));
        let repo = InMemoryRepository::new();
        let campaign =
            Campaign::open(1, capacity, clock.now() + chrono::Duration::hours(1)).unwrap();
        repo.save_campaign(&campaign).await.unwrap();
        let applier = BaselineApplier::new(Arc::new(repo.clone()), clock.clone());
        (applier, repo, clock)
    }

    #[tokio::test]
    async fn test_selects_until_capacity() {
        let (applier, repo, _) = setup(2).await;

        let first = applier.apply(CampaignId(1), UserId(1)).await.unwrap();
        assert_eq!(first.admission().unwrap().position, 1);

        let second = applier.apply(CampaignId(1), UserId(2)).await.unwrap();
        assert_eq!(second.admission().unwrap().close, CloseReport::Closed);

        let third = applier.apply(CampaignId(1), UserId(3)).await.unwrap();
        assert!(third.is_rejected());

        assert_eq!(repo.count_applications(CampaignId(1)).await.unwrap(), 3);
        assert_eq!(repo.count_selected(CampaignId(1)).await.unwrap(), 2);
        let stored = repo.find_campaign(CampaignId(1)).await.unwrap().unwrap();
        assert_eq!(stored.status, CampaignStatus::Closed);
        assert_eq!(stored.current_applicants, 2);
    }

    #[tokio::test]
    async fn test_repeated_application_keeps_one_row() {
        let (applier, repo, _) = setup(5).await;

        applier.apply(CampaignId(1), UserId(1)).await.unwrap();
        let again = applier.apply(CampaignId(1), UserId(1)).await.unwrap();

        assert!(!again.admission().unwrap().first_attempt);
        assert_eq!(repo.count_applications(CampaignId(1)).await.unwrap(), 1);
        let stored = repo.find_campaign(CampaignId(1)).await.unwrap().unwrap();
        assert_eq!(stored.current_applicants, 1);
    }

    #[tokio::test]
    async fn test_past_end_date_rejects_and_closes() {
        let (applier, repo, clock) = setup(5).await;
        clock.advance(chrono::Duration::hours(2));

        let outcome = applier.apply(CampaignId(1), UserId(1)).await.unwrap();
        assert!(outcome.is_rejected());
        let stored = repo.find_campaign(CampaignId(1)).await.unwrap().unwrap();
        assert_eq!(stored.status, CampaignStatus::Closed);
    }

    #[tokio::test]
    async fn test_failed_commit_is_persistence_failure() {
        let (applier, repo, _) = setup(5).await;
        repo.set_fail_writes(true);

        let err = applier.apply(CampaignId(1), UserId(1)).await.unwrap_err();
        assert!(matches!(err, AdmissionError::PersistenceFailure { .. }));
        assert_eq!(repo.count_applications(CampaignId(1)).await.unwrap(), 0);
    }
}
