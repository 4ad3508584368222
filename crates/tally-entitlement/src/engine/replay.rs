//! Timeline replay: events + "now" → [`Subscription`].
//!
//! [`replay`] is a pure function. It keeps only active events at the
//! subscription's current version, orders them by effective date (ties by
//! insertion order, synthetic overlay events last), and folds them:
//!
//! 1. Events effective at or before `now` build the current plan/phase.
//! 2. Later events are kept as the pending list and still contribute
//!    transitions, so callers can look ahead.
//!
//! The stored timeline is never modified. Bundle assembly passes computed
//! events through the separate `overlay` argument of [`replay_with_overlay`].

use chrono::{DateTime, Utc};

use crate::types::{
    EntitlementEvent, EventPayload, EventType, Subscription, SubscriptionData,
    SubscriptionStatus, Transition,
};

/// Replay a stored timeline as of `now`.
pub fn replay(
    data: &SubscriptionData,
    events: &[EntitlementEvent],
    now: DateTime<Utc>,
) -> Subscription {
    replay_with_overlay(data, events, &[], now)
}

/// Replay a stored timeline extended with computed `overlay` events.
///
/// Overlay events are always considered active and sort after stored
/// events with the same effective date.
pub fn replay_with_overlay(
    data: &SubscriptionData,
    events: &[EntitlementEvent],
    overlay: &[EntitlementEvent],
    now: DateTime<Utc>,
) -> Subscription {
    let ordered = order(data, events, overlay);

    let mut state = FoldState::default();
    let mut current: Option<FoldState> = None;
    let mut pending = Vec::new();
    let mut transitions = Vec::with_capacity(ordered.len());

    for entry in &ordered {
        let event = entry.event;
        let is_future = event.is_future(now);
        if is_future && current.is_none() {
            current = Some(state.clone());
        }
        if is_future {
            pending.push(event.clone());
        }

        let previous_plan = state.plan.clone();
        let previous_phase = state.phase.clone();
        state.apply(event);

        transitions.push(Transition {
            event_id: event.id.clone(),
            event_type: event.event_type(),
            effective_date: event.effective_date,
            previous_plan,
            previous_phase,
            next_plan: state.plan.clone(),
            next_phase: state.phase.clone(),
            is_future,
            is_synthetic: entry.synthetic,
        });
    }

    let current = current.unwrap_or(state);
    let future_end_date = if current.alive {
        pending
            .iter()
            .find(|e| e.event_type() == EventType::Cancel)
            .map(|e| e.effective_date)
    } else {
        None
    };
    let status = match (current.started, current.alive, future_end_date) {
        (false, _, _) => SubscriptionStatus::Pending,
        (true, true, Some(_)) => SubscriptionStatus::Cancelled,
        (true, true, None) => SubscriptionStatus::Active,
        (true, false, _) => SubscriptionStatus::Expired,
    };

    Subscription {
        data: data.clone(),
        status,
        current_plan: current.plan,
        current_phase: current.phase,
        end_date: current.end_date,
        future_end_date,
        pending_events: pending,
        transitions,
    }
}

// ─── Ordering ────────────────────────────────────────────────────────────────

struct Ordered<'a> {
    event: &'a EntitlementEvent,
    synthetic: bool,
}

fn order<'a>(
    data: &SubscriptionData,
    events: &'a [EntitlementEvent],
    overlay: &'a [EntitlementEvent],
) -> Vec<Ordered<'a>> {
    let mut ordered: Vec<Ordered<'a>> = events
        .iter()
        .filter(|e| e.is_active && e.active_version == data.active_version)
        .map(|event| Ordered {
            event,
            synthetic: false,
        })
        .chain(overlay.iter().map(|event| Ordered {
            event,
            synthetic: true,
        }))
        .collect();

    ordered.sort_by_key(|o| {
        (
            o.event.effective_date,
            o.synthetic,
            o.event.record_id.unwrap_or(i64::MAX),
        )
    });
    ordered
}

// ─── Fold ────────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Default)]
struct FoldState {
    started: bool,
    alive: bool,
    plan: Option<String>,
    phase: Option<String>,
    end_date: Option<DateTime<Utc>>,
}

impl FoldState {
    fn apply(&mut self, event: &EntitlementEvent) {
        match &event.payload {
            EventPayload::Create { plan, phase }
            | EventPayload::Recreate { plan, phase }
            | EventPayload::Migrate { plan, phase } => {
                self.started = true;
                self.alive = true;
                self.plan = Some(plan.clone());
                self.phase = Some(phase.clone());
                self.end_date = None;
            }
            EventPayload::Phase { phase } => {
                if self.alive {
                    self.phase = Some(phase.clone());
                }
            }
            EventPayload::PlanChange { plan, phase } => {
                if self.alive {
                    self.plan = Some(plan.clone());
                    self.phase = Some(phase.clone());
                }
            }
            EventPayload::Cancel => {
                if self.alive {
                    self.alive = false;
                    self.plan = None;
                    self.phase = None;
                    self.end_date = Some(event.effective_date);
                }
            }
            // Marker only: the withdrawn cancel is already inactive.
            EventPayload::Uncancel => {}
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
