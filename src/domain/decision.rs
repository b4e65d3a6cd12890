//! Admission decisions and outcomes.
//!
//! These types are transient: they describe what happened to one call and
//! are never persisted.

use crate::domain::campaign::{CampaignId, UserId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Message returned to a caller who won a slot.
pub const SELECTED_MESSAGE: &str = "selected";

/// Message returned to a caller turned away because the campaign is full.
pub const CAPACITY_REACHED_MESSAGE: &str = "capacity reached";

/// Identifies one logical apply call across all of its store attempts.
///
/// The store remembers the token that added each user. A later attempt
/// carrying the same token is told it added the user, so a reply lost on
/// the wire can be recovered without guessing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApplyToken(pub u64);

impl ApplyToken {
    /// A fresh token for a new apply call.
    pub fn random() -> Self {
        Self(rand::random())
    }
}

impl fmt::Display for ApplyToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// A user's record in a campaign's admission set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionEntry {
    /// Position assigned on first arrival
    pub position: u64,
    /// Token of the call that added the user
    pub token: ApplyToken,
}

/// Raw decision produced by the admission gate.
///
/// `current_count` is the 1-based position assigned to the user when they
/// first entered the admission set. For a new user this equals the set's
/// cardinality right after the add; a returning user gets their original
/// position back, so the decision they observe never changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TryApplyResult {
    /// `true` if the user was added under the caller's token
    pub is_new_user: bool,
    /// Position assigned to this user
    pub current_count: u64,
    /// `true` if the position lies beyond the campaign capacity
    pub is_over_limit: bool,
}

impl TryApplyResult {
    /// Derive the decision for a position against a capacity.
    pub fn at_position(is_new_user: bool, current_count: u64, capacity: u64) -> Self {
        Self {
            is_new_user,
            current_count,
            is_over_limit: current_count > capacity,
        }
    }

    /// Decision for a campaign whose end date has passed.
    ///
    /// The admission set is not touched, so nobody is recorded as new.
    pub fn expired() -> Self {
        Self {
            is_new_user: false,
            current_count: 0,
            is_over_limit: true,
        }
    }

    /// Returns `true` for the decision produced by [`expired`](Self::expired).
    pub fn is_expired(&self) -> bool {
        self.current_count == 0 && self.is_over_limit
    }

    /// Returns `true` if the user holds a slot.
    pub fn is_selected(&self) -> bool {
        !self.is_over_limit
    }
}

/// What happened to the campaign status during an admission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReport {
    /// This call did not drive a transition
    Unchanged,
    /// This admission took the last slot and the campaign is now closed
    Closed,
    /// This admission took the last slot but persisting `Closed` failed.
    ///
    /// The admission still stands; the close is left for reconciliation.
    Deferred {
        /// Description of the persistence failure
        reason: String,
    },
}

/// A granted slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub campaign_id: CampaignId,
    pub user_id: UserId,
    /// Position the user holds (`1..=capacity`)
    pub position: u64,
    /// `false` when the call was a re-application by a known user
    pub first_attempt: bool,
    pub close: CloseReport,
}

/// A final refusal because the campaign is full or over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub campaign_id: CampaignId,
    pub user_id: UserId,
    /// `false` when the call was a re-application by a known user
    pub first_attempt: bool,
}

/// Final outcome of `apply`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Admitted(Admission),
    Rejected(Rejection),
}

impl ApplyOutcome {
    /// Returns `true` if the caller holds a slot.
    pub fn is_admitted(&self) -> bool {
        matches!(self, ApplyOutcome::Admitted(_))
    }

    /// Returns `true` if the campaign was full.
    pub fn is_rejected(&self) -> bool {
        matches!(self, ApplyOutcome::Rejected(_))
    }

    /// Human-readable message for the caller.
    pub fn message(&self) -> &'static str {
        match self {
            ApplyOutcome::Admitted(_) => SELECTED_MESSAGE,
            ApplyOutcome::Rejected(_) => CAPACITY_REACHED_MESSAGE,
        }
    }

    /// The granted admission, if any.
    pub fn admission(&self) -> Option<&Admission> {
        match self {
            ApplyOutcome::Admitted(admission) => Some(admission),
            ApplyOutcome::Rejected(_) => None,
        }
    }
}

/// Response shape exposed to upstream callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyResponse {
    pub admitted: bool,
    pub message: String,
}

impl From<&ApplyOutcome> for ApplyResponse {
    fn from(outcome: &ApplyOutcome) -> Self {
        Self {
            admitted: outcome.is_admitted(),
            message: outcome.message().to_string(),
        }
    }
}

impl From<ApplyOutcome> for ApplyResponse {
    fn from(outcome: ApplyOutcome) -> Self {
        Self::from(&outcome)
    }
}
