//! Scheduling aborts, swallowed publish failures, duplicate cancels and
//! concurrent writers.

#![allow(missing_docs, unused_results)]

mod common;

use std::sync::Arc;

use assert_matches::assert_matches;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tally_core::CallContext;
use tally_core::logging::capture_logs;
use tally_entitlement::sqlite::repositories::{BusEventRepo, EventRepo};
use tally_entitlement::{
    BusError, BusEvent, BundleData, EntitlementError, EventBus, EventType, NotificationKey,
    NotificationQueue, ProductCategory, QueueError, SubscriptionData, SubscriptionStatus,
};
use tracing::Level;

use common::{Harness, at, ctx, tenant};

struct OfflineQueue;

impl NotificationQueue for OfflineQueue {
    fn record_future_notification(
        &self,
        _conn: &Connection,
        _effective_date: DateTime<Utc>,
        _key: &NotificationKey,
        _ctx: &CallContext,
        _now: DateTime<Utc>,
    ) -> Result<(), QueueError> {
        Err(QueueError::Unavailable("queue unreachable".into()))
    }
}

struct OfflineBus;

impl EventBus for OfflineBus {
    fn post_from_transaction(
        &self,
        _conn: &Connection,
        _event: &BusEvent,
        _ctx: &CallContext,
        _now: DateTime<Utc>,
    ) -> Result<(), BusError> {
        Err(BusError::Unavailable("broker down".into()))
    }
}

#[test]
fn scheduling_failure_rolls_back_the_whole_write() {
    let h = Harness::with_backends(Some(Arc::new(OfflineQueue)), None);
    let bundle = h.bundle("acct-1", "key-1");
    let start = at(2021, 1, 1);
    let data = SubscriptionData::new(bundle.id.clone(), ProductCategory::Base, start, start);
    let create = h.factory(&data).create(at(2021, 1, 1), "silver", "evergreen");

    let err = h.coordinator.create_subscription(&data, &[create.clone()], &ctx()).unwrap_err();
    assert_matches!(
        err,
        EntitlementError::Scheduling { ref event_id, source: QueueError::Unavailable(_) }
            if event_id == create.id.as_str()
    );
    assert!(err.is_retryable());

    assert!(h.coordinator.get_subscription(&data.id, &tenant()).unwrap().is_none());
    assert!(h.coordinator.get_event(&create.id, &tenant()).unwrap().is_none());
    let conn = h.coordinator.pool().get().unwrap();
    assert!(BusEventRepo::list_for_account(&conn, &tenant()).unwrap().is_empty());
}

#[test]
fn publish_failure_is_logged_and_write_commits() {
    let (logs, _guard) = capture_logs();
    let h = Harness::with_backends(None, Some(Arc::new(OfflineBus)));
    let bundle = h.bundle("acct-1", "key-1");
    let data = h.subscription(&bundle, ProductCategory::Base, |f| {
        vec![f.create(at(2021, 1, 1), "silver", "evergreen")]
    });

    let sub = h.coordinator.get_subscription(&data.id, &tenant()).unwrap().unwrap();
    assert_eq!(sub.status, SubscriptionStatus::Active);
    assert!(logs.has_event(Level::WARN, "failed to post change notification"));
}

#[test]
fn two_pending_cancels_fail_uncancel() {
    let h = Harness::in_memory();
    let bundle = h.bundle("acct-1", "key-1");
    let data = h.subscription(&bundle, ProductCategory::Base, |f| {
        vec![f.create(at(2021, 1, 1), "silver", "evergreen")]
    });

    // Corrupt the timeline behind the coordinator's back.
    {
        let conn = h.coordinator.pool().get().unwrap();
        let factory = h.factory(&data);
        for month in [5, 6] {
            let cancel = factory.cancel(at(2021, month, 1));
            EventRepo::insert(&conn, &cancel, &ctx(), at(2021, 1, 1)).unwrap();
        }
    }

    let (logs, _guard) = capture_logs();
    let uncancel = h.factory(&data).uncancel(at(2021, 1, 1));
    let err = h.coordinator.uncancel_subscription(&data, &[uncancel.clone()], &ctx()).unwrap_err();
    assert_matches!(err, EntitlementError::DuplicateCancel { count: 2, .. });
    assert!(!err.is_retryable());
    assert!(logs.has_event(Level::ERROR, "entitlement write aborted"));
    assert_eq!(logs.count_at_level(Level::ERROR), 1);
    assert!(h.coordinator.get_event(&uncancel.id, &tenant()).unwrap().is_none());
}

#[test]
fn duplicate_event_id_is_rejected() {
    let h = Harness::in_memory();
    let bundle = h.bundle("acct-1", "key-1");
    let data = h.subscription(&bundle, ProductCategory::Base, |f| {
        vec![f.create(at(2021, 1, 1), "silver", "evergreen")]
    });
    let stored = h.coordinator.events_for_subscription(&data.id, &tenant()).unwrap();
    let mut replayed = stored[0].clone();
    replayed.record_id = None;

    let err = h.coordinator.recreate_subscription(&data, &[replayed], &ctx()).unwrap_err();
    assert_matches!(err, EntitlementError::DuplicateId(_));
}

#[test]
fn mismatched_event_subscription_is_rejected() {
    let h = Harness::in_memory();
    let bundle = h.bundle("acct-1", "key-1");
    let first = h.subscription(&bundle, ProductCategory::Base, |f| {
        vec![f.create(at(2021, 1, 1), "silver", "evergreen")]
    });
    let second = h.subscription(&bundle, ProductCategory::Standalone, |f| {
        vec![f.create(at(2021, 1, 1), "solo", "evergreen")]
    });

    let stray = h.factory(&second).plan_change(at(2021, 2, 1), "platinum", "evergreen");
    let err = h.coordinator.change_plan(&first, &[stray], &ctx()).unwrap_err();
    assert_matches!(err, EntitlementError::Validation(_));

    let err = h.coordinator.change_plan(&first, &[], &ctx()).unwrap_err();
    assert_matches!(err, EntitlementError::Validation(_));
}

#[test]
fn concurrent_cancels_leave_a_single_pending_cancel() {
    let h = Harness::on_disk();
    let bundle: BundleData = h.bundle("acct-1", "key-1");
    let data = h.subscription(&bundle, ProductCategory::Base, |f| {
        vec![f.create(at(2021, 1, 1), "silver", "evergreen")]
    });
    let cancels: Vec<_> = (1..=4u32)
        .map(|month| h.factory(&data).cancel(at(2021, month + 4, 1)))
        .collect();

    std::thread::scope(|scope| {
        for cancel in &cancels {
            let coordinator = &h.coordinator;
            let data = &data;
            scope.spawn(move || coordinator.cancel_subscription(data, cancel, 0, &ctx()).unwrap());
        }
    });

    let pending = h.coordinator.pending_events(&data.id, &tenant()).unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].event_type(), EventType::Cancel);
    let all = h.coordinator.events_for_subscription(&data.id, &tenant()).unwrap();
    assert_eq!(all.len(), 5);
}
