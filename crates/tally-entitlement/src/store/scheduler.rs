//! Future-activation scheduling.
//!
//! Every event written with a future effective date gets a wake-up recorded
//! on the same connection (and therefore in the same transaction) as the
//! event itself. A failed schedule aborts the write.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tally_core::CallContext;
use tally_settings::NotificationSettings;
use tracing::debug;

use crate::errors::{EntitlementError, QueueError, Result};
use crate::sqlite::repositories::NotificationRepo;
use crate::types::NotificationKey;

/// Durable, transactional backend for future wake-ups.
pub trait NotificationQueue: Send + Sync {
    /// Record a wake-up for `key` at `effective_date`, writing through `conn`.
    ///
    /// Recording the same key twice must be a no-op.
    fn record_future_notification(
        &self,
        conn: &Connection,
        effective_date: DateTime<Utc>,
        key: &NotificationKey,
        ctx: &CallContext,
        now: DateTime<Utc>,
    ) -> std::result::Result<(), QueueError>;
}

/// Queue stored in the `notifications` table of the entitlement database.
#[derive(Clone, Debug)]
pub struct SqliteNotificationQueue {
    queue_name: String,
    service_name: String,
}

impl SqliteNotificationQueue {
    /// Queue labelled with the given names.
    pub fn new(queue_name: impl Into<String>, service_name: impl Into<String>) -> Self {
        Self {
            queue_name: queue_name.into(),
            service_name: service_name.into(),
        }
    }

    /// Queue labelled from settings.
    pub fn from_settings(settings: &NotificationSettings) -> Self {
        Self::new(settings.queue_name.clone(), settings.service_name.clone())
    }

    /// Name of the queue rows are written to.
    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }
}

impl NotificationQueue for SqliteNotificationQueue {
    fn record_future_notification(
        &self,
        conn: &Connection,
        effective_date: DateTime<Utc>,
        key: &NotificationKey,
        ctx: &CallContext,
        now: DateTime<Utc>,
    ) -> std::result::Result<(), QueueError> {
        let inserted = NotificationRepo::record(
            conn,
            &self.queue_name,
            &self.service_name,
            effective_date,
            key,
            ctx,
            now,
        )?;
        if !inserted {
            debug!(event_id = %key.event_id, seq_id = key.seq_id, "wake-up already queued");
        }
        Ok(())
    }
}

/// Schedules wake-ups for written events.
#[derive(Clone)]
pub struct NotificationScheduler {
    queue: Arc<dyn NotificationQueue>,
}

impl NotificationScheduler {
    /// Scheduler writing to `queue`.
    pub fn new(queue: Arc<dyn NotificationQueue>) -> Self {
        Self { queue }
    }

    /// Record a wake-up for `key` at `effective_date`.
    ///
    /// Fails with [`EntitlementError::Scheduling`], which the caller must let
    /// abort its transaction.
    pub fn schedule_future_activation(
        &self,
        conn: &Connection,
        effective_date: DateTime<Utc>,
        key: &NotificationKey,
        ctx: &CallContext,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.queue
            .record_future_notification(conn, effective_date, key, ctx, now)
            .map_err(|source| EntitlementError::Scheduling {
                event_id: key.event_id.to_string(),
                source,
            })?;
        debug!(
            event_id = %key.event_id,
            seq_id = key.seq_id,
            effective = %effective_date,
            "scheduled future activation"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::repositories::test_support::{at, ctx, setup};
    use assert_matches::assert_matches;
    use tally_core::EventId;

    struct FailingQueue;

    impl NotificationQueue for FailingQueue {
        fn record_future_notification(
            &self,
            _conn: &Connection,
            _effective_date: DateTime<Utc>,
            _key: &NotificationKey,
            _ctx: &CallContext,
            _now: DateTime<Utc>,
        ) -> std::result::Result<(), QueueError> {
            Err(QueueError::Unavailable("queue offline".into()))
        }
    }

    #[test]
    fn sqlite_queue_records_once_per_key() {
        let conn = setup();
        let queue = SqliteNotificationQueue::new("q", "svc");
        let scheduler = NotificationScheduler::new(Arc::new(queue));
        let key = NotificationKey::new(EventId::from("evt-1"));

        scheduler
            .schedule_future_activation(&conn, at(2021, 3, 1), &key, &ctx(), at(2021, 1, 1))
            .unwrap();
        scheduler
            .schedule_future_activation(&conn, at(2021, 3, 1), &key, &ctx(), at(2021, 1, 1))
            .unwrap();

        assert_eq!(NotificationRepo::count(&conn, "q", ctx().tenant()).unwrap(), 1);
    }

    #[test]
    fn from_settings_uses_configured_queue() {
        let queue = SqliteNotificationQueue::from_settings(&NotificationSettings::default());
        assert_eq!(queue.queue_name(), "next-billing-date-queue");
    }

    #[test]
    fn failure_maps_to_retryable_scheduling_error() {
        let conn = setup();
        let scheduler = NotificationScheduler::new(Arc::new(FailingQueue));
        let key = NotificationKey::new(EventId::from("evt-1"));

        let err = scheduler
            .schedule_future_activation(&conn, at(2021, 3, 1), &key, &ctx(), at(2021, 1, 1))
            .unwrap_err();
        assert!(err.is_retryable());
        assert_matches!(
            err,
            EntitlementError::Scheduling { event_id, source: QueueError::Unavailable(reason) }
                if event_id == "evt-1" && reason == "queue offline"
        );
    }
}
