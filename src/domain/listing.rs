//! Listing lifecycle state machine.
//!
//! ```text
//! draft --activate--> active
//! active --expire (non-premium, past expiry)--> expired
//! active --mark sold--> sold [terminal]
//! active --suspend--> suspended [terminal]
//! expired --reactivate (premium only)--> active
//! ```
//!
//! `is_premium` is an orthogonal flag, not a state, but gates the
//! expired -> active edge.

use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingStatus {
    Draft,
    Active,
    Expired,
    Sold,
    Suspended,
}

impl ListingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListingStatus::Draft => "draft",
            ListingStatus::Active => "active",
            ListingStatus::Expired => "expired",
            ListingStatus::Sold => "sold",
            ListingStatus::Suspended => "suspended",
        }
    }

    /// Sold and suspended listings never leave their state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ListingStatus::Sold | ListingStatus::Suspended)
    }

    /// Whether a transition along the lifecycle graph is allowed.
    /// `is_premium` gates reactivation of expired listings.
    pub fn can_transition_to(&self, next: ListingStatus, is_premium: bool) -> bool {
        match (self, next) {
            (ListingStatus::Draft, ListingStatus::Active) => true,
            (ListingStatus::Active, ListingStatus::Expired) => true,
            (ListingStatus::Active, ListingStatus::Sold) => true,
            (ListingStatus::Active, ListingStatus::Suspended) => true,
            (ListingStatus::Expired, ListingStatus::Active) => is_premium,
            _ => false,
        }
    }

    /// Content edits are only allowed while the listing is visible or unpublished.
    pub fn allows_edit(&self) -> bool {
        matches!(self, ListingStatus::Draft | ListingStatus::Active)
    }
}

impl fmt::Display for ListingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ListingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(ListingStatus::Draft),
            "active" => Ok(ListingStatus::Active),
            "expired" => Ok(ListingStatus::Expired),
            "sold" => Ok(ListingStatus::Sold),
            "suspended" => Ok(ListingStatus::Suspended),
            other => Err(format!("unknown listing status: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn draft_activates() {
        assert!(ListingStatus::Draft.can_transition_to(ListingStatus::Active, false));
        assert!(ListingStatus::Draft.can_transition_to(ListingStatus::Active, true));
    }

    #[test]
    fn active_edges() {
        assert!(ListingStatus::Active.can_transition_to(ListingStatus::Expired, false));
        assert!(ListingStatus::Active.can_transition_to(ListingStatus::Sold, false));
        assert!(ListingStatus::Active.can_transition_to(ListingStatus::Suspended, false));
        assert!(!ListingStatus::Active.can_transition_to(ListingStatus::Draft, false));
    }

    #[test]
    fn reactivation_requires_premium() {
        assert!(ListingStatus::Expired.can_transition_to(ListingStatus::Active, true));
        assert!(!ListingStatus::Expired.can_transition_to(ListingStatus::Active, false));
    }

    #[test]
    fn terminal_states_have_no_outgoing_edges() {
        for next in [
            ListingStatus::Draft,
            ListingStatus::Active,
            ListingStatus::Expired,
            ListingStatus::Sold,
            ListingStatus::Suspended,
        ] {
            assert!(!ListingStatus::Sold.can_transition_to(next, true));
            assert!(!ListingStatus::Suspended.can_transition_to(next, true));
        }
        assert!(ListingStatus::Sold.is_terminal());
        assert!(ListingStatus::Suspended.is_terminal());
        assert!(!ListingStatus::Expired.is_terminal());
    }

    #[test]
    fn edits_only_while_draft_or_active() {
        assert!(ListingStatus::Draft.allows_edit());
        assert!(ListingStatus::Active.allows_edit());
        assert!(!ListingStatus::Expired.allows_edit());
        assert!(!ListingStatus::Sold.allows_edit());
    }

    #[test]
    fn round_trips_through_strings() {
        for status in [
            ListingStatus::Draft,
            ListingStatus::Active,
            ListingStatus::Expired,
            ListingStatus::Sold,
            ListingStatus::Suspended,
        ] {
            assert_eq!(status.as_str().parse::<ListingStatus>().unwrap(), status);
        }
        assert!("archived".parse::<ListingStatus>().is_err());
    }
}
