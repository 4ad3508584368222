//! Event creation utilities.
//!
//! [`EventFactory`] is scoped to one subscription and builds
//! [`EntitlementEvent`]s of every variant with generated ids, the
//! subscription's active version, and processed/requested dates taken from
//! the injected clock.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tally_core::{Clock, EventId, SubscriptionId};

use crate::types::{EntitlementEvent, EventPayload, SubscriptionData};

/// Scoped event factory for a single subscription.
pub struct EventFactory {
    subscription_id: SubscriptionId,
    active_version: i64,
    clock: Arc<dyn Clock>,
}

impl EventFactory {
    /// Factory for `subscription` at its current active version.
    pub fn new(subscription: &SubscriptionData, clock: Arc<dyn Clock>) -> Self {
        Self {
            subscription_id: subscription.id.clone(),
            active_version: subscription.active_version,
            clock,
        }
    }

    /// Same subscription, events stamped with `active_version` (used when
    /// building repair timelines).
    #[must_use]
    pub fn at_version(mut self, active_version: i64) -> Self {
        self.active_version = active_version;
        self
    }

    /// Subscription this factory is scoped to.
    pub fn subscription_id(&self) -> &SubscriptionId {
        &self.subscription_id
    }

    /// Generic constructor; the named helpers below delegate here.
    pub fn event(&self, effective_date: DateTime<Utc>, payload: EventPayload) -> EntitlementEvent {
        let now = self.clock.utc_now();
        EntitlementEvent {
            id: EventId::new(),
            subscription_id: self.subscription_id.clone(),
            effective_date,
            processed_date: now,
            requested_date: now,
            active_version: self.active_version,
            is_active: true,
            record_id: None,
            payload,
        }
    }

    /// CREATE on `plan`/`phase`.
    pub fn create(
        &self,
        effective_date: DateTime<Utc>,
        plan: &str,
        phase: &str,
    ) -> EntitlementEvent {
        self.event(
            effective_date,
            EventPayload::Create {
                plan: plan.to_owned(),
                phase: phase.to_owned(),
            },
        )
    }

    /// RECREATE on `plan`/`phase`.
    pub fn recreate(
        &self,
        effective_date: DateTime<Utc>,
        plan: &str,
        phase: &str,
    ) -> EntitlementEvent {
        self.event(
            effective_date,
            EventPayload::Recreate {
                plan: plan.to_owned(),
                phase: phase.to_owned(),
            },
        )
    }

    /// PHASE transition to `phase`.
    pub fn phase(&self, effective_date: DateTime<Utc>, phase: &str) -> EntitlementEvent {
        self.event(
            effective_date,
            EventPayload::Phase {
                phase: phase.to_owned(),
            },
        )
    }

    /// PLAN_CHANGE to `plan`/`phase`.
    pub fn plan_change(
        &self,
        effective_date: DateTime<Utc>,
        plan: &str,
        phase: &str,
    ) -> EntitlementEvent {
        self.event(
            effective_date,
            EventPayload::PlanChange {
                plan: plan.to_owned(),
                phase: phase.to_owned(),
            },
        )
    }

    /// CANCEL.
    pub fn cancel(&self, effective_date: DateTime<Utc>) -> EntitlementEvent {
        self.event(effective_date, EventPayload::Cancel)
    }

    /// UNCANCEL.
    pub fn uncancel(&self, effective_date: DateTime<Utc>) -> EntitlementEvent {
        self.event(effective_date, EventPayload::Uncancel)
    }

    /// MIGRATE onto `plan`/`phase`.
    pub fn migrate(
        &self,
        effective_date: DateTime<Utc>,
        plan: &str,
        phase: &str,
    ) -> EntitlementEvent {
        self.event(
            effective_date,
            EventPayload::Migrate {
                plan: plan.to_owned(),
                phase: phase.to_owned(),
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EventType, ProductCategory};
    use chrono::TimeZone;
    use tally_core::{BundleId, ClockMock};

    fn at(month: u32, day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2021, month, day, 0, 0, 0).unwrap()
    }

    fn subscription() -> SubscriptionData {
        SubscriptionData::new(BundleId::from("b-1"), ProductCategory::Base, at(1, 1), at(1, 1))
    }

    #[test]
    fn events_are_stamped_from_clock() {
        let data = subscription();
        let factory = EventFactory::new(&data, Arc::new(ClockMock::new(at(3, 1))));

        let event = factory.plan_change(at(6, 1), "gold", "evergreen");
        assert_eq!(event.subscription_id, data.id);
        assert_eq!(event.processed_date, at(3, 1));
        assert_eq!(event.requested_date, at(3, 1));
        assert_eq!(event.effective_date, at(6, 1));
        assert_eq!(event.active_version, SubscriptionData::INITIAL_VERSION);
        assert!(event.is_active);
        assert!(event.record_id.is_none());
        assert_eq!(event.payload.plan(), Some("gold"));
    }

    #[test]
    fn every_variant_has_its_type() {
        let factory = EventFactory::new(&subscription(), Arc::new(ClockMock::new(at(1, 1))));
        let built = [
            factory.create(at(1, 1), "p", "x").event_type(),
            factory.recreate(at(1, 1), "p", "x").event_type(),
            factory.phase(at(1, 1), "x").event_type(),
            factory.plan_change(at(1, 1), "p", "x").event_type(),
            factory.cancel(at(1, 1)).event_type(),
            factory.uncancel(at(1, 1)).event_type(),
            factory.migrate(at(1, 1), "p", "x").event_type(),
        ];
        assert_eq!(built.to_vec(), crate::types::ALL_EVENT_TYPES.to_vec());
        assert_eq!(built[4], EventType::Cancel);
    }

    #[test]
    fn ids_are_unique_and_version_overridable() {
        let clock = Arc::new(ClockMock::new(at(1, 1)));
        let factory = EventFactory::new(&subscription(), clock).at_version(3);
        let a = factory.cancel(at(2, 1));
        let b = factory.cancel(at(2, 1));
        assert_ne!(a.id, b.id);
        assert_eq!(a.active_version, 3);
    }
}
