//! Entitlement events: the immutable records a subscription timeline is
//! made of.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tally_core::{EventId, SubscriptionId};

use super::event_type::EventType;

/// Variant-specific data of an entitlement event.
///
/// Serialized with an internal `type` tag into the `payload` column.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventPayload {
    /// Subscription created on `plan`, starting in `phase`.
    Create {
        /// Plan name.
        plan: String,
        /// Initial phase name.
        phase: String,
    },
    /// Subscription re-created on `plan`.
    Recreate {
        /// Plan name.
        plan: String,
        /// Initial phase name.
        phase: String,
    },
    /// Current plan moves to `phase`.
    Phase {
        /// Next phase name.
        phase: String,
    },
    /// Switch to `plan`, starting in `phase`.
    PlanChange {
        /// Target plan name.
        plan: String,
        /// Phase of the target plan.
        phase: String,
    },
    /// Entitlement ends.
    Cancel,
    /// A pending cancel is withdrawn.
    Uncancel,
    /// Timeline imported on `plan`/`phase`.
    Migrate {
        /// Plan name.
        plan: String,
        /// Phase name.
        phase: String,
    },
}

impl EventPayload {
    /// Discriminator of this payload.
    #[must_use]
    pub fn event_type(&self) -> EventType {
        match self {
            Self::Create { .. } => EventType::Create,
            Self::Recreate { .. } => EventType::Recreate,
            Self::Phase { .. } => EventType::Phase,
            Self::PlanChange { .. } => EventType::PlanChange,
            Self::Cancel => EventType::Cancel,
            Self::Uncancel => EventType::Uncancel,
            Self::Migrate { .. } => EventType::Migrate,
        }
    }

    /// Plan named by the event, if it names one.
    #[must_use]
    pub fn plan(&self) -> Option<&str> {
        match self {
            Self::Create { plan, .. }
            | Self::Recreate { plan, .. }
            | Self::PlanChange { plan, .. }
            | Self::Migrate { plan, .. } => Some(plan),
            Self::Phase { .. } | Self::Cancel | Self::Uncancel => None,
        }
    }

    /// Phase named by the event, if it names one.
    #[must_use]
    pub fn phase(&self) -> Option<&str> {
        match self {
            Self::Create { phase, .. }
            | Self::Recreate { phase, .. }
            | Self::Phase { phase }
            | Self::PlanChange { phase, .. }
            | Self::Migrate { phase, .. } => Some(phase),
            Self::Cancel | Self::Uncancel => None,
        }
    }
}

/// One transition on a subscription timeline.
///
/// Events are never edited after insertion apart from the active flag
/// (cleared when superseded) and the version (bumped by repair).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitlementEvent {
    /// Event ID.
    pub id: EventId,
    /// Owning subscription.
    pub subscription_id: SubscriptionId,
    /// Instant the transition takes effect.
    pub effective_date: DateTime<Utc>,
    /// Instant the event was written.
    pub processed_date: DateTime<Utc>,
    /// Instant the change was requested.
    pub requested_date: DateTime<Utc>,
    /// Subscription version this event belongs to.
    pub active_version: i64,
    /// Cleared when the event is superseded.
    pub is_active: bool,
    /// Storage insertion order; `None` until persisted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_id: Option<i64>,
    /// Variant data.
    pub payload: EventPayload,
}

impl EntitlementEvent {
    /// Discriminator of this event.
    #[must_use]
    pub fn event_type(&self) -> EventType {
        self.payload.event_type()
    }

    /// Whether the event takes effect strictly after `now`.
    #[must_use]
    pub fn is_future(&self, now: DateTime<Utc>) -> bool {
        self.effective_date > now
    }
}
