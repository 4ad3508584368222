//! The [`EventType`] discriminator for entitlement events.
//!
//! Each variant serializes to the upper-case string stored in the
//! `subscription_events.event_type` column.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of transition an entitlement event records.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    /// Subscription created.
    Create,
    /// Subscription re-created after expiring.
    Recreate,
    /// Move to the next phase of the current plan.
    Phase,
    /// Switch to another plan.
    PlanChange,
    /// End the subscription.
    Cancel,
    /// Withdraw a pending cancel.
    Uncancel,
    /// Imported from another system.
    Migrate,
}

/// Every variant, in declaration order.
pub const ALL_EVENT_TYPES: [EventType; 7] = [
    EventType::Create,
    EventType::Recreate,
    EventType::Phase,
    EventType::PlanChange,
    EventType::Cancel,
    EventType::Uncancel,
    EventType::Migrate,
];

impl EventType {
    /// Canonical string form (e.g. `"PLAN_CHANGE"`).
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Recreate => "RECREATE",
            Self::Phase => "PHASE",
            Self::PlanChange => "PLAN_CHANGE",
            Self::Cancel => "CANCEL",
            Self::Uncancel => "UNCANCEL",
            Self::Migrate => "MIGRATE",
        }
    }

    /// Whether a pending event of this type on a base subscription can
    /// invalidate its add-ons.
    #[must_use]
    pub fn is_pivot(self) -> bool {
        matches!(self, Self::Cancel | Self::PlanChange)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.to_owned()))
            .map_err(|_| format!("unknown event type: {s}"))
    }
}
