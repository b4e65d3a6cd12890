//! Campaigns and their OPEN/CLOSED lifecycle.
//!
//! A campaign offers a fixed number of slots until its end date. The status
//! only ever moves from `Open` to `Closed`; nothing in this crate reopens a
//! campaign.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CampaignId(pub u64);

impl fmt::Display for CampaignId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for CampaignId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Identifier of a user applying to a campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for UserId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Recruitment status of a campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CampaignStatus {
    /// Accepting applications
    Open,
    /// No longer accepting applications (terminal)
    Closed,
}

impl CampaignStatus {
    /// Returns `true` if the campaign accepts applications.
    pub fn is_open(&self) -> bool {
        matches!(self, CampaignStatus::Open)
    }
}

impl fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CampaignStatus::Open => write!(f, "OPEN"),
            CampaignStatus::Closed => write!(f, "CLOSED"),
        }
    }
}

/// Error returned when constructing an invalid campaign.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CampaignError {
    /// Capacity must allow at least one applicant
    #[error("campaign capacity must be greater than 0")]
    ZeroCapacity,
}

/// A capacity-limited sign-up campaign.
///
/// `current_applicants` is only maintained by the baseline path; the fast
/// path derives the admitted count from the admission set instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Campaign {
    pub id: CampaignId,
    pub capacity: u64,
    pub status: CampaignStatus,
    pub end_date: DateTime<Utc>,
    pub current_applicants: u64,
}

impl Campaign {
    /// Create a new open campaign.
    ///
    /// # Errors
    /// Returns `CampaignError::ZeroCapacity` if `capacity` is zero.
    pub fn open(
        id: u64,
        capacity: u64,
        end_date: DateTime<Utc>,
    ) -> Result<Self, CampaignError> {
        if capacity == 0 {
            return Err(CampaignError::ZeroCapacity);
        }
        Ok(Self {
            id: CampaignId(id),
            capacity,
            status: CampaignStatus::Open,
            end_date,
            current_applicants: 0,
        })
    }

    /// Time remaining until the end date, as seen from `now`.
    ///
    /// Negative once the end date has passed.
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        self.end_date - now
    }

    /// Returns `true` if a call that observed `position` took the last slot.
    pub fn is_last_slot(&self, position: u64) -> bool {
        position == self.capacity
    }

    /// Move the campaign to `Closed`.
    ///
    /// Returns `true` if this call performed the transition, `false` if the
    /// campaign was already closed.
    pub fn close(&mut self) -> bool {
        match self.status {
            CampaignStatus::Open => {
                self.status = CampaignStatus::Closed;
                true
            }
            CampaignStatus::Closed => false,
        }
    }

    /// Count one more selected applicant on the baseline path.
    pub fn increase_applicants(&mut self) {
        self.current_applicants = self.current_applicants.saturating_add(1);
    }

    /// Re-derive the status from the persisted applicant counter and the end
    /// date. Never reopens a closed campaign.
    pub fn sync_status(&mut self, now: DateTime<Utc>) {
        if self.current_applicants >= self.capacity || now >= self.end_date {
            self.close();
        }
    }

    /// Re-derive the status from an externally observed admitted count.
    ///
    /// Returns `true` if this call closed the campaign.
    pub fn reconcile_with(&mut self, admitted: u64) -> bool {
        if admitted >= self.capacity {
            self.close()
        } else {
            false
        }
    }
}
