//! Bundle assembly: rebuild every subscription of a bundle and derive add-on
//! side effects from the base subscription's pending events.
//!
//! The base's earliest pending CANCEL or PLAN_CHANGE is the *pivot*. An
//! add-on with a current plan gets a synthetic CANCEL at the pivot's
//! effective date when the pivot is a cancel, or when the catalog says the
//! add-on is unavailable on (or included in) the pivot's target plan.
//! Synthetic events live only in the returned views.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tally_core::{BundleId, EventId};
use tracing::debug;

use crate::engine::catalog::Catalog;
use crate::engine::replay::{replay, replay_with_overlay};
use crate::errors::{EntitlementError, Result};
use crate::types::{
    EntitlementEvent, EventPayload, EventType, ProductCategory, Subscription, SubscriptionData,
};

/// A stored subscription with its full stored timeline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubscriptionTimeline {
    /// Stored attributes.
    pub data: SubscriptionData,
    /// Every stored event, in any order.
    pub events: Vec<EntitlementEvent>,
}

/// Composes bundle views from stored timelines and catalog rules.
#[derive(Clone)]
pub struct BundleAssembler {
    catalog: Arc<dyn Catalog>,
}

impl BundleAssembler {
    /// Assembler consulting `catalog` for add-on rules.
    pub fn new(catalog: Arc<dyn Catalog>) -> Self {
        Self { catalog }
    }

    /// Rebuild every subscription of `bundle_id` as of `now`.
    ///
    /// Output order: the base first, then the rest by ascending start date
    /// (ties keep input order).
    pub fn build(
        &self,
        bundle_id: &BundleId,
        mut timelines: Vec<SubscriptionTimeline>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Subscription>> {
        if let Some(stray) = timelines.iter().find(|t| &t.data.bundle_id != bundle_id) {
            return Err(EntitlementError::Validation(format!(
                "subscription {} belongs to bundle {}, not {bundle_id}",
                stray.data.id, stray.data.bundle_id
            )));
        }

        let bases = timelines
            .iter()
            .filter(|t| t.data.category == ProductCategory::Base)
            .count();
        if bases > 1 {
            return Err(EntitlementError::InvariantViolation(format!(
                "bundle {bundle_id} has {bases} base subscriptions"
            )));
        }
        let has_addons = timelines
            .iter()
            .any(|t| t.data.category == ProductCategory::AddOn);
        if has_addons && bases == 0 {
            return Err(EntitlementError::InconsistentBundle(bundle_id.to_string()));
        }

        timelines.sort_by_key(|t| (t.data.category != ProductCategory::Base, t.data.start_date));

        let mut pivot: Option<EntitlementEvent> = None;
        let mut result = Vec::with_capacity(timelines.len());
        for timeline in &timelines {
            let rebuilt = replay(&timeline.data, &timeline.events, now);
            match timeline.data.category {
                ProductCategory::Base => {
                    pivot = rebuilt
                        .pending_events
                        .iter()
                        .find(|e| e.event_type().is_pivot())
                        .cloned();
                    result.push(rebuilt);
                }
                ProductCategory::AddOn => {
                    let synthetic = pivot
                        .as_ref()
                        .and_then(|p| self.addon_cancel(p, &rebuilt, now));
                    if let Some(synthetic) = synthetic {
                        debug!(
                            bundle_id = %bundle_id,
                            subscription_id = %timeline.data.id,
                            effective = %synthetic.effective_date,
                            "add-on cancelled by base pivot"
                        );
                        result.push(replay_with_overlay(
                            &timeline.data,
                            &timeline.events,
                            std::slice::from_ref(&synthetic),
                            now,
                        ));
                    } else {
                        result.push(rebuilt);
                    }
                }
                ProductCategory::Standalone => result.push(rebuilt),
            }
        }
        Ok(result)
    }

    fn addon_cancel(
        &self,
        pivot: &EntitlementEvent,
        addon: &Subscription,
        now: DateTime<Utc>,
    ) -> Option<EntitlementEvent> {
        let addon_plan = addon.current_plan.as_deref()?;
        let required = match (pivot.event_type(), pivot.payload.plan()) {
            (EventType::Cancel, _) => true,
            (_, Some(target)) => {
                !self
                    .catalog
                    .is_addon_available(target, pivot.effective_date, addon_plan)
                    || self
                        .catalog
                        .is_addon_included(target, pivot.effective_date, addon_plan)
            }
            (_, None) => false,
        };
        required.then(|| synthetic_cancel(&addon.data, pivot, now))
    }
}

fn synthetic_cancel(
    addon: &SubscriptionData,
    pivot: &EntitlementEvent,
    now: DateTime<Utc>,
) -> EntitlementEvent {
    EntitlementEvent {
        id: EventId::from(format!("synthetic-cancel-{}-{}", addon.id, pivot.id)),
        subscription_id: addon.id.clone(),
        effective_date: pivot.effective_date,
        processed_date: now,
        requested_date: now,
        active_version: addon.active_version,
        is_active: true,
        record_id: None,
        payload: EventPayload::Cancel,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
