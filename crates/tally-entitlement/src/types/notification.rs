//! Scheduling keys and change-notification messages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tally_core::{AccountId, BundleId, EventId, SubscriptionId};
use uuid::Uuid;

use super::event::EntitlementEvent;
use super::event_type::EventType;

/// Correlates a scheduled wake-up with the event it activates.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationKey {
    /// Event to activate.
    pub event_id: EventId,
    /// Distinguishes repeated wake-ups for the same event.
    pub seq_id: i64,
}

impl NotificationKey {
    /// Key with sequence id 0.
    pub fn new(event_id: EventId) -> Self {
        Self { event_id, seq_id: 0 }
    }

    /// Key with an explicit sequence id.
    pub fn with_seq(event_id: EventId, seq_id: i64) -> Self {
        Self { event_id, seq_id }
    }
}

/// Message posted on the change-notification channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum BusEvent {
    /// A subscription has a new pending or active event.
    #[serde(rename_all = "camelCase")]
    RequestedSubscriptionChange {
        /// Triggering event.
        event_id: EventId,
        /// Subscription the event belongs to.
        subscription_id: SubscriptionId,
        /// Owning bundle.
        bundle_id: BundleId,
        /// Kind of change.
        event_type: EventType,
        /// Plan after the change, if the event names one.
        #[serde(skip_serializing_if = "Option::is_none")]
        plan: Option<String>,
        /// Phase after the change, if the event names one.
        #[serde(skip_serializing_if = "Option::is_none")]
        phase: Option<String>,
        /// When the change takes effect.
        effective_date: DateTime<Utc>,
        /// Correlation token of the originating call.
        user_token: Uuid,
    },
    /// A bundle's timeline was rewritten by repair.
    #[serde(rename_all = "camelCase")]
    RepairEntitlement {
        /// Owning account.
        account_id: AccountId,
        /// Repaired bundle.
        bundle_id: BundleId,
        /// When the repair ran.
        effective_date: DateTime<Utc>,
        /// Correlation token of the originating call.
        user_token: Uuid,
    },
}

impl BusEvent {
    /// Build a requested-change message for `event` on a subscription of
    /// `bundle_id`.
    pub fn requested_change(
        bundle_id: &BundleId,
        event: &EntitlementEvent,
        user_token: Uuid,
    ) -> Self {
        Self::RequestedSubscriptionChange {
            event_id: event.id.clone(),
            subscription_id: event.subscription_id.clone(),
            bundle_id: bundle_id.clone(),
            event_type: event.event_type(),
            plan: event.payload.plan().map(str::to_owned),
            phase: event.payload.phase().map(str::to_owned),
            effective_date: event.effective_date,
            user_token,
        }
    }

    /// Discriminator stored in the outbox `event_kind` column.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RequestedSubscriptionChange { .. } => "requestedSubscriptionChange",
            Self::RepairEntitlement { .. } => "repairEntitlement",
        }
    }
}
