//! Future-activation queue.
//!
//! One row per `(queue, event, sequence)`. Recording the same key twice is
//! a no-op. The external activation processor reads [`NotificationRepo::due`]
//! rows and marks them processed once it has re-derived the subscription.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use tally_core::{CallContext, EventId, TenantContext};

use crate::errors::Result;
use crate::sqlite::row_types::{instant, to_millis};
use crate::types::NotificationKey;

/// A queued wake-up.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScheduledNotification {
    /// Row id, used to mark the wake-up processed.
    pub record_id: i64,
    /// Queue it belongs to.
    pub queue_name: String,
    /// Event to activate.
    pub key: NotificationKey,
    /// When it becomes due.
    pub effective_date: DateTime<Utc>,
    /// Whether the processor has handled it.
    pub processed: bool,
}

/// Notification repository, stateless.
pub struct NotificationRepo;

impl NotificationRepo {
    /// Queue a wake-up. Returns `false` if the key was already queued.
    pub fn record(
        conn: &Connection,
        queue_name: &str,
        service_name: &str,
        effective_date: DateTime<Utc>,
        key: &NotificationKey,
        ctx: &CallContext,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO notifications (queue_name, service_name, event_id, seq_id,
                                                  effective_date, user_token, created_date,
                                                  account_record_id, tenant_record_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                queue_name,
                service_name,
                key.event_id.as_str(),
                key.seq_id,
                to_millis(effective_date),
                ctx.user_token.to_string(),
                to_millis(now),
                ctx.tenant.account_record_id,
                ctx.tenant.tenant_record_id,
            ],
        )?;
        Ok(inserted > 0)
    }

    /// Unprocessed wake-ups due at or before `now`, oldest first.
    pub fn due(
        conn: &Connection,
        queue_name: &str,
        now: DateTime<Utc>,
        limit: u32,
        tenant: &TenantContext,
    ) -> Result<Vec<ScheduledNotification>> {
        let mut stmt = conn.prepare(
            "SELECT record_id, queue_name, event_id, seq_id, effective_date, processing_state
             FROM notifications
             WHERE queue_name = ?1 AND tenant_record_id = ?2
               AND processing_state = 'AVAILABLE' AND effective_date <= ?3
             ORDER BY effective_date ASC, record_id ASC
             LIMIT ?4",
        )?;
        let rows = stmt
            .query_map(
                params![queue_name, tenant.tenant_record_id, to_millis(now), limit],
                Self::map_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Every wake-up queued for an event, in insertion order.
    pub fn list_for_event(
        conn: &Connection,
        event_id: &EventId,
        tenant: &TenantContext,
    ) -> Result<Vec<ScheduledNotification>> {
        let mut stmt = conn.prepare(
            "SELECT record_id, queue_name, event_id, seq_id, effective_date, processing_state
             FROM notifications
             WHERE event_id = ?1 AND tenant_record_id = ?2
             ORDER BY record_id ASC",
        )?;
        let rows = stmt
            .query_map(params![event_id.as_str(), tenant.tenant_record_id], Self::map_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Number of wake-ups in a queue for the tenant.
    pub fn count(conn: &Connection, queue_name: &str, tenant: &TenantContext) -> Result<i64> {
        let count = conn.query_row(
            "SELECT COUNT(*) FROM notifications WHERE queue_name = ?1 AND tenant_record_id = ?2",
            params![queue_name, tenant.tenant_record_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Mark a wake-up handled. Returns `false` if it was already processed.
    pub fn mark_processed(
        conn: &Connection,
        record_id: i64,
        now: DateTime<Utc>,
        tenant: &TenantContext,
    ) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE notifications SET processing_state = 'PROCESSED', processed_date = ?1
             WHERE record_id = ?2 AND tenant_record_id = ?3 AND processing_state = 'AVAILABLE'",
            params![to_millis(now), record_id, tenant.tenant_record_id],
        )?;
        Ok(changed > 0)
    }

    fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ScheduledNotification> {
        let state: String = row.get(5)?;
        Ok(ScheduledNotification {
            record_id: row.get(0)?,
            queue_name: row.get(1)?,
            key: NotificationKey::with_seq(EventId::from_string(row.get(2)?), row.get(3)?),
            effective_date: instant(row, 4)?,
            processed: state == "PROCESSED",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::repositories::test_support::{at, ctx, setup};

    const QUEUE: &str = "next-billing-date-queue";

    fn record(conn: &Connection, event: &str, seq: i64, when: DateTime<Utc>) -> bool {
        let key = NotificationKey::with_seq(EventId::from(event), seq);
        let service = "entitlement-service";
        NotificationRepo::record(conn, QUEUE, service, when, &key, &ctx(), at(2021, 1, 1)).unwrap()
    }

    #[test]
    fn recording_same_key_is_idempotent() {
        let conn = setup();
        assert!(record(&conn, "evt-1", 0, at(2021, 6, 1)));
        assert!(!record(&conn, "evt-1", 0, at(2021, 6, 1)));
        assert!(record(&conn, "evt-1", 1, at(2021, 6, 1)));
        assert_eq!(NotificationRepo::count(&conn, QUEUE, &ctx().tenant).unwrap(), 2);
    }

    #[test]
    fn due_returns_only_reached_unprocessed_rows() {
        let conn = setup();
        let tenant = ctx().tenant;
        let _ = record(&conn, "early", 0, at(2021, 2, 1));
        let _ = record(&conn, "later", 0, at(2021, 9, 1));

        let due = NotificationRepo::due(&conn, QUEUE, at(2021, 3, 1), 10, &tenant).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].key.event_id.as_str(), "early");

        let (record_id, now) = (due[0].record_id, at(2021, 3, 1));
        assert!(NotificationRepo::mark_processed(&conn, record_id, now, &tenant).unwrap());
        assert!(!NotificationRepo::mark_processed(&conn, record_id, now, &tenant).unwrap());
        let again = NotificationRepo::due(&conn, QUEUE, at(2021, 3, 1), 10, &tenant).unwrap();
        assert!(again.is_empty());

        let rows =
            NotificationRepo::list_for_event(&conn, &EventId::from("early"), &tenant).unwrap();
        assert!(rows[0].processed);
    }
}
