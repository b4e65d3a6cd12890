//! Bookkeeping for work that must be finished later.
//!
//! Three things can be left behind by an apply call:
//! - a close transition whose write failed
//! - an event the publisher never accepted
//! - a gate call that ended without a decision, which may still have added
//!   the user; its token is kept so the next call or a reconciliation pass
//!   can tell
//!
//! Both are recorded here and picked up by
//! [`AdmissionService::reconcile`](crate::AdmissionService::reconcile).

use crate::domain::{
    application::ApplyEvent,
    campaign::{CampaignId, UserId},
    decision::ApplyToken,
};
use ahash::RandomState;
use dashmap::DashMap;
use std::sync::Arc;

/// Pending reconciliation work. Clones share the same ledger.
#[derive(Debug, Clone, Default)]
pub struct ReconciliationLedger {
    deferred_closes: Arc<DashMap<CampaignId, String, RandomState>>,
    undelivered: Arc<DashMap<(CampaignId, UserId), ApplyEvent, RandomState>>,
    unconfirmed: Arc<DashMap<(CampaignId, UserId), ApplyToken, RandomState>>,
}

impl ReconciliationLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember that closing `campaign_id` failed.
    pub fn defer_close(&self, campaign_id: CampaignId, reason: impl Into<String>) {
        self.deferred_closes.insert(campaign_id, reason.into());
    }

    /// Forget a deferred close once it has been applied.
    pub fn resolve_close(&self, campaign_id: CampaignId) {
        self.deferred_closes.remove(&campaign_id);
    }

    /// Campaigns whose close is still pending.
    pub fn deferred_closes(&self) -> Vec<CampaignId> {
        let mut ids: Vec<_> = self.deferred_closes.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }

    /// Remember an event that still has to reach the pipeline.
    pub fn hold_event(&self, event: ApplyEvent) {
        self.undelivered
            .insert((event.campaign_id, event.user_id), event);
    }

    /// Forget a held event once delivered.
    pub fn release_event(&self, event: &ApplyEvent) {
        self.undelivered.remove(&(event.campaign_id, event.user_id));
    }

    /// Events still waiting for delivery.
    pub fn undelivered(&self) -> Vec<ApplyEvent> {
        let mut events: Vec<_> = self.undelivered.iter().map(|e| *e.value()).collect();
        events.sort_by_key(|e| (e.campaign_id, e.user_id));
        events
    }

    /// Remember a gate call that ended without a decision.
    pub fn mark_unconfirmed(&self, campaign_id: CampaignId, user_id: UserId, token: ApplyToken) {
        self.unconfirmed.insert((campaign_id, user_id), token);
    }

    /// Claim the token of an earlier undecided call, if any.
    ///
    /// Only one caller gets it.
    pub fn take_unconfirmed(
        &self,
        campaign_id: CampaignId,
        user_id: UserId,
    ) -> Option<ApplyToken> {
        self.unconfirmed
            .remove(&(campaign_id, user_id))
            .map(|(_, token)| token)
    }

    /// Undecided calls still waiting to be settled.
    pub fn unconfirmed(&self) -> Vec<(CampaignId, UserId, ApplyToken)> {
        let mut calls: Vec<_> = self
            .unconfirmed
            .iter()
            .map(|e| (e.key().0, e.key().1, *e.value()))
            .collect();
        calls.sort_by_key(|(campaign_id, user_id, _)| (*campaign_id, *user_id));
        calls
    }

    /// Returns `true` if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.deferred_closes.is_empty()
            && self.undelivered.is_empty()
            && self.unconfirmed.is_empty()
    }
}

/// Result of one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Deferred closes applied in this pass
    pub closes_applied: usize,
    /// Deferred closes still pending after this pass
    pub closes_pending: usize,
    /// Held events delivered in this pass
    pub events_delivered: usize,
    /// Held events still undelivered after this pass
    pub events_pending: usize,
    /// Undecided calls found to hold a slot and finished in this pass
    pub admissions_recovered: usize,
    /// Undecided calls still unsettled after this pass
    pub unconfirmed_pending: usize,
}

impl ReconcileReport {
    /// Returns `true` if the pass left nothing behind.
    pub fn is_settled(&self) -> bool {
        self.closes_pending == 0 && self.events_pending == 0 && self.unconfirmed_pending == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deferred_closes() {
        let ledger = ReconciliationLedger::new();
        assert!(ledger.is_empty());

        ledger.defer_close(CampaignId(2), "timeout");
        ledger.defer_close(CampaignId(1), "timeout");
        assert_eq!(ledger.deferred_closes(), vec![CampaignId(1), CampaignId(2)]);

        ledger.resolve_close(CampaignId(1));
        assert_eq!(ledger.deferred_closes(), vec![CampaignId(2)]);
    }

    #[test]
    fn test_held_events_dedupe_by_key() {
        let ledger = ReconciliationLedger::new();
        let event = ApplyEvent::selected(CampaignId(1), UserId(1));

        ledger.hold_event(event);
        ledger.hold_event(event);
        assert_eq!(ledger.undelivered(), vec![event]);

        ledger.release_event(&event);
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_unconfirmed_token_is_claimed_once() {
        let ledger = ReconciliationLedger::new();
        ledger.mark_unconfirmed(CampaignId(1), UserId(2), ApplyToken(5));
        assert!(!ledger.is_empty());

        assert_eq!(
            ledger.take_unconfirmed(CampaignId(1), UserId(2)),
            Some(ApplyToken(5))
        );
        assert_eq!(ledger.take_unconfirmed(CampaignId(1), UserId(2)), None);
        assert!(ledger.is_empty());
    }
}
