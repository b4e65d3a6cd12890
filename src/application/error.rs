//! Error types for admission operations.
//!
//! Port-level errors describe what a collaborator reported. `AdmissionError`
//! is what callers of the service see.

use crate::domain::campaign::{CampaignId, CampaignStatus, UserId};
use std::time::Duration;
use thiserror::Error;

/// Failure reported by the atomic counting primitive.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The primitive could not be reached or refused the command
    #[error("admission store unavailable: {0}")]
    Unavailable(String),
    /// The primitive did not answer in time
    #[error("admission store timed out after {0:?}")]
    Timeout(Duration),
    /// The call was refused locally because the store keeps failing
    #[error("admission store circuit is open")]
    CircuitOpen,
    /// The primitive answered with something we cannot interpret
    #[error("unexpected admission store reply: {0}")]
    Protocol(String),
}

impl StoreError {
    /// Returns `true` if retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Timeout(_))
    }
}

/// Failure reported by the event publisher.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PublishError {
    /// The channel no longer accepts messages
    #[error("event channel is closed")]
    Closed,
    /// The publisher refused the message
    #[error("publisher rejected event: {0}")]
    Rejected(String),
    /// The event could not be encoded
    #[error("failed to encode event: {0}")]
    Encoding(String),
}

impl PublishError {
    /// Returns `true` if retrying the same publish may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, PublishError::Rejected(_))
    }
}

/// Failure reported by durable storage.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepositoryError {
    /// Storage could not be reached
    #[error("durable storage unavailable: {0}")]
    Unavailable(String),
    /// A write could not be applied
    #[error("durable write failed: {0}")]
    WriteFailed(String),
}

/// Errors returned by [`AdmissionService`](crate::AdmissionService) and
/// [`BaselineApplier`](crate::BaselineApplier).
///
/// A full campaign is not an error: it is reported as
/// [`ApplyOutcome::Rejected`](crate::ApplyOutcome::Rejected).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionError {
    /// No campaign with this id
    #[error("campaign {campaign_id} not found")]
    NotFound { campaign_id: CampaignId },

    /// The campaign does not accept applications
    #[error("campaign {campaign_id} is {status}, only OPEN campaigns accept applications")]
    InvalidState {
        campaign_id: CampaignId,
        status: CampaignStatus,
    },

    /// The admission gate could not decide; nothing was granted or refused
    #[error("admission gate unavailable for campaign {campaign_id}: {source}")]
    StoreUnavailable {
        campaign_id: CampaignId,
        #[source]
        source: StoreError,
    },

    /// The slot was granted but the event was not accepted by the publisher.
    ///
    /// The event is kept for reconciliation.
    #[error("admission of user {user_id} to campaign {campaign_id} granted but not delivered: {source}")]
    DeliveryFailure {
        campaign_id: CampaignId,
        user_id: UserId,
        position: u64,
        #[source]
        source: PublishError,
    },

    /// A durable write failed
    #[error("failed to persist campaign {campaign_id}: {source}")]
    PersistenceFailure {
        campaign_id: CampaignId,
        #[source]
        source: RepositoryError,
    },

    /// The campaign could not be read from durable storage
    #[error("failed to load campaign {campaign_id}: {source}")]
    CampaignLookup {
        campaign_id: CampaignId,
        #[source]
        source: RepositoryError,
    },
}

impl AdmissionError {
    /// Returns `true` for errors the caller should retry or reconcile.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AdmissionError::StoreUnavailable { .. }
                | AdmissionError::DeliveryFailure { .. }
                | AdmissionError::CampaignLookup { .. }
        )
    }

    /// Returns `true` if the caller holds a slot despite the error.
    pub fn slot_granted(&self) -> bool {
        matches!(self, AdmissionError::DeliveryFailure { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_store_errors() {
        assert!(StoreError::Unavailable("down".into()).is_transient());
        assert!(StoreError::Timeout(Duration::from_millis(5)).is_transient());
        assert!(!StoreError::CircuitOpen.is_transient());
        assert!(!StoreError::Protocol("nil".into()).is_transient());
    }

    #[test]
    fn test_delivery_failure_holds_slot() {
        let err = AdmissionError::DeliveryFailure {
            campaign_id: CampaignId(1),
            user_id: UserId(2),
            position: 1,
            source: PublishError::Closed,
        };
        assert!(err.slot_granted());
        assert!(err.is_retryable());
    }

    #[test]
    fn test_terminal_errors() {
        let err = AdmissionError::InvalidState {
            campaign_id: CampaignId(1),
            status: CampaignStatus::Closed,
        };
        assert!(!err.is_retryable());
        assert_eq!(
            err.to_string(),
            "campaign 1 is CLOSED, only OPEN campaigns accept applications"
        );
    }
}
