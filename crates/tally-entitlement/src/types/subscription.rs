//! Persisted subscription data and the derived subscription view.
//!
//! Only [`SubscriptionData`] is stored. [`Subscription`] is recomputed from
//! the event timeline on every read and never written back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tally_core::{BundleId, EventId, SubscriptionId};

use super::event::EntitlementEvent;
use super::event_type::EventType;

/// Role of a subscription inside its bundle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProductCategory {
    /// The bundle's primary subscription. At most one per bundle.
    Base,
    /// Depends on the bundle's base plan.
    AddOn,
    /// Independent of any other subscription.
    Standalone,
}

impl ProductCategory {
    /// Canonical string form.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Base => "BASE",
            Self::AddOn => "ADD_ON",
            Self::Standalone => "STANDALONE",
        }
    }
}

impl fmt::Display for ProductCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProductCategory {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.to_owned()))
            .map_err(|_| format!("unknown product category: {s}"))
    }
}

/// Stored subscription attributes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionData {
    /// Subscription ID.
    pub id: SubscriptionId,
    /// Owning bundle.
    pub bundle_id: BundleId,
    /// Role within the bundle.
    pub category: ProductCategory,
    /// Alignment/start date.
    pub start_date: DateTime<Utc>,
    /// Start date of the owning bundle, used for bundle-aligned billing.
    pub bundle_start_date: DateTime<Utc>,
    /// Date up to which the subscription has been invoiced.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub charged_through_date: Option<DateTime<Utc>>,
    /// Events at any other version are ignored on replay.
    pub active_version: i64,
}

impl SubscriptionData {
    /// First version of every subscription.
    pub const INITIAL_VERSION: i64 = 1;

    /// New subscription at the initial version.
    pub fn new(
        bundle_id: BundleId,
        category: ProductCategory,
        start_date: DateTime<Utc>,
        bundle_start_date: DateTime<Utc>,
    ) -> Self {
        Self {
            id: SubscriptionId::new(),
            bundle_id,
            category,
            start_date,
            bundle_start_date,
            charged_through_date: None,
            active_version: Self::INITIAL_VERSION,
        }
    }
}

/// Lifecycle state as of the query instant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionStatus {
    /// No event has taken effect yet.
    Pending,
    /// Entitled, with no cancel pending.
    Active,
    /// Entitled, with a cancel scheduled in the future.
    Cancelled,
    /// A cancel has taken effect.
    Expired,
}

/// Before/after view of one replayed event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transition {
    /// Event that caused the transition.
    pub event_id: EventId,
    /// Kind of transition.
    pub event_type: EventType,
    /// When it takes effect.
    pub effective_date: DateTime<Utc>,
    /// Plan before the event.
    pub previous_plan: Option<String>,
    /// Phase before the event.
    pub previous_phase: Option<String>,
    /// Plan after the event.
    pub next_plan: Option<String>,
    /// Phase after the event.
    pub next_phase: Option<String>,
    /// Takes effect after the query instant.
    pub is_future: bool,
    /// Computed by bundle assembly, not stored.
    pub is_synthetic: bool,
}

/// A subscription rebuilt from its timeline.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    /// Stored attributes.
    pub data: SubscriptionData,
    /// State as of the query instant.
    pub status: SubscriptionStatus,
    /// Plan in effect, if entitled.
    pub current_plan: Option<String>,
    /// Phase in effect, if entitled.
    pub current_phase: Option<String>,
    /// When an applied cancel ended the subscription.
    pub end_date: Option<DateTime<Utc>>,
    /// When a pending cancel will end the subscription.
    pub future_end_date: Option<DateTime<Utc>>,
    /// Active events still to take effect, in timeline order. Includes
    /// synthetic events.
    pub pending_events: Vec<EntitlementEvent>,
    /// Every replayed event, in timeline order.
    pub transitions: Vec<Transition>,
}

impl Subscription {
    /// Subscription ID.
    pub fn id(&self) -> &SubscriptionId {
        &self.data.id
    }

    /// Owning bundle.
    pub fn bundle_id(&self) -> &BundleId {
        &self.data.bundle_id
    }

    /// Role within the bundle.
    pub fn category(&self) -> ProductCategory {
        self.data.category
    }

    /// Earliest pending event of `event_type`.
    pub fn pending_event(&self, event_type: EventType) -> Option<&EntitlementEvent> {
        self.pending_events
            .iter()
            .find(|e| e.event_type() == event_type)
    }

    /// Whether any transition came from a synthetic event.
    pub fn has_synthetic_events(&self) -> bool {
        self.transitions.iter().any(|t| t.is_synthetic)
    }
}
