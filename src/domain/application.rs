//! Application records and the events that carry them.

use crate::domain::campaign::{CampaignId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Topic on which apply events are published.
pub const APPLY_TOPIC: &str = "apply-campaign";

/// Outcome of one user's attempt, handed to the async pipeline.
///
/// Once a publisher accepts the event, ownership passes to the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyEvent {
    pub campaign_id: CampaignId,
    pub user_id: UserId,
    pub selected: bool,
}

impl ApplyEvent {
    /// Event for a user who won a slot.
    pub fn selected(campaign_id: CampaignId, user_id: UserId) -> Self {
        Self {
            campaign_id,
            user_id,
            selected: true,
        }
    }

    /// Event for a user who was turned away.
    pub fn rejected(campaign_id: CampaignId, user_id: UserId) -> Self {
        Self {
            campaign_id,
            user_id,
            selected: false,
        }
    }

    /// Turn the event into a durable row stamped at `applied_at`.
    pub fn into_application(self, applied_at: DateTime<Utc>) -> CampaignApplication {
        CampaignApplication {
            campaign_id: self.campaign_id,
            user_id: self.user_id,
            selected: self.selected,
            applied_at,
        }
    }
}

/// Durable record of one attempt, keyed by `(campaign_id, user_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignApplication {
    pub campaign_id: CampaignId,
    pub user_id: UserId,
    pub selected: bool,
    pub applied_at: DateTime<Utc>,
}

impl CampaignApplication {
    /// Key identifying the row.
    pub fn key(&self) -> (CampaignId, UserId) {
        (self.campaign_id, self.user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_format() {
        let event = ApplyEvent::selected(CampaignId(7), UserId(42));
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"campaignId":7,"userId":42,"selected":true}"#);

        let parsed: ApplyEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_into_application() {
        let now = Utc::now();
        let row = ApplyEvent::rejected(CampaignId(1), UserId(2)).into_application(now);
        assert!(!row.selected);
        assert_eq!(row.key(), (CampaignId(1), UserId(2)));
        assert_eq!(row.applied_at, now);
    }
}
