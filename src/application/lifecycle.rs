//! Campaign OPEN → CLOSED transitions.
//!
//! The fast path closes a campaign when an admitted call observes
//! `position == capacity`. Positions are unique per campaign, so exactly one
//! call sees that boundary and no lock is needed to pick the closer.
//!
//! The status is advisory: the gate keeps rejecting positions beyond capacity
//! whether or not the `Closed` write ever lands.

use crate::application::error::AdmissionError;
use crate::application::ledger::ReconciliationLedger;
use crate::application::metrics::Metrics;
use crate::application::ports::CampaignRepository;
use crate::domain::campaign::CampaignId;
use std::sync::Arc;

/// Drives and persists the campaign state machine.
#[derive(Debug, Clone)]
pub struct CampaignLifecycle {
    repository: Arc<dyn CampaignRepository>,
    ledger: ReconciliationLedger,
    metrics: Metrics,
}

impl CampaignLifecycle {
    /// Create a lifecycle writing through `repository`.
    pub fn new(
        repository: Arc<dyn CampaignRepository>,
        ledger: ReconciliationLedger,
        metrics: Metrics,
    ) -> Self {
        Self {
            repository,
            ledger,
            metrics,
        }
    }

    /// Persist `Closed` for a campaign.
    ///
    /// Returns `true` if this call moved the row from `Open` to `Closed`,
    /// `false` if it was already closed.
    ///
    /// # Errors
    /// Returns `AdmissionError::PersistenceFailure` if the write fails. The
    /// close is then recorded in the ledger for reconciliation.
    pub async fn close(&self, campaign_id: CampaignId) -> Result<bool, AdmissionError> {
        match self.write_close(campaign_id).await {
            Ok(transitioned) => {
                self.ledger.resolve_close(campaign_id);
                if transitioned {
                    tracing::info!(%campaign_id, "Campaign closed at capacity");
                }
                Ok(transitioned)
            }
            Err(e) => {
                tracing::warn!(
                    %campaign_id,
                    error = %e,
                    "Failed to persist campaign close, deferring to reconciliation"
                );
                self.metrics.record_deferred_close();
                self.ledger.defer_close(campaign_id, e.to_string());
                Err(e)
            }
        }
    }

    async fn write_close(&self, campaign_id: CampaignId) -> Result<bool, AdmissionError> {
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

        if !tx.campaign_mut().close() {
            return Ok(false);
        }
        tx.commit().await.map_err(persistence)?;
        Ok(true)
    }

    /// Re-derive the status from the true admitted count.
    ///
    /// Closes the campaign if `admitted` has reached capacity. Returns `true`
    /// if this call closed it.
    ///
    /// # Errors
    /// Returns `AdmissionError::PersistenceFailure` if the write fails.
    pub async fn reconcile(
        &self,
        campaign_id: CampaignId,
        admitted: u64,
    ) -> Result<bool, AdmissionError> {
        let campaign = self
            .repository
            .find_campaign(campaign_id)
            .await
            .map_err(|source| AdmissionError::CampaignLookup {
                campaign_id,
                source,
            })?
            .ok_or(AdmissionError::NotFound { campaign_id })?;

        if !campaign.status.is_open() {
            self.ledger.resolve_close(campaign_id);
            return Ok(false);
        }
        if admitted < campaign.capacity {
            tracing::debug!(
                %campaign_id,
                admitted,
                capacity = campaign.capacity,
                "Campaign still has free slots"
            );
            self.ledger.resolve_close(campaign_id);
            return Ok(false);
        }
        self.close(campaign_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::campaign::{Campaign, CampaignStatus};
    use crate::infrastructure::repository::InMemoryRepository;
    use chrono::Utc;

    async fn setup(capacity: u64) -> (CampaignLifecycle, InMemoryRepository, ReconciliationLedger) {
        let repo = InMemoryRepository::new();
        let campaign =
            Campaign::open(1, capacity, Utc::now() + chrono::Duration::hours(1)).unwrap();
        repo.save_campaign(&campaign).await.unwrap();
        let ledger = ReconciliationLedger::new();
        let lifecycle =
            CampaignLifecycle::new(Arc::new(repo.clone()), ledger.clone(), Metrics::new());
        (lifecycle, repo, ledger)
    }

    async fn status(repo: &InMemoryRepository) -> CampaignStatus {
        repo.find_campaign(CampaignId(1))
            .await
            .unwrap()
            .unwrap()
            .status
    }

    #[tokio::test]
    async fn test_close_transitions_once() {
        let (lifecycle, repo, _) = setup(3).await;

        assert!(lifecycle.close(CampaignId(1)).await.unwrap());
        assert!(!lifecycle.close(CampaignId(1)).await.unwrap());
        assert_eq!(status(&repo).await, CampaignStatus::Closed);
    }

    #[tokio::test]
    async fn test_close_missing_campaign() {
        let (lifecycle, _, _) = setup(3).await;
        let err = lifecycle.close(CampaignId(42)).await.unwrap_err();
        assert_eq!(
            err,
            AdmissionError::NotFound {
                campaign_id: CampaignId(42)
            }
        );
    }

    #[tokio::test]
    async fn test_failed_close_is_deferred() {
        let (lifecycle, repo, ledger) = setup(3).await;
        repo.set_fail_writes(true);

        let err = lifecycle.close(CampaignId(1)).await.unwrap_err();
        assert!(matches!(err, AdmissionError::PersistenceFailure { .. }));
        assert_eq!(ledger.deferred_closes(), vec![CampaignId(1)]);
        assert_eq!(status(&repo).await, CampaignStatus::Open);

        repo.set_fail_writes(false);
        assert!(lifecycle.reconcile(CampaignId(1), 3).await.unwrap());
        assert!(ledger.is_empty());
        assert_eq!(status(&repo).await, CampaignStatus::Closed);
    }

    #[tokio::test]
    async fn test_reconcile_below_capacity_keeps_open() {
        let (lifecycle, repo, _) = setup(3).await;
        assert!(!lifecycle.reconcile(CampaignId(1), 2).await.unwrap());
        assert_eq!(status(&repo).await, CampaignStatus::Open);
    }
}
