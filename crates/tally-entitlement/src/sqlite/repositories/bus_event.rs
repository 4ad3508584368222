//! Transactional outbox for change notifications.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use tally_core::{CallContext, TenantContext};

use crate::errors::{BusError, Result};
use crate::sqlite::row_types::{instant, json, to_millis};
use crate::types::BusEvent;

/// An outbox row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredBusEvent {
    /// Insertion order.
    pub record_id: i64,
    /// Decoded message.
    pub event: BusEvent,
    /// When the message was written.
    pub created_date: DateTime<Utc>,
}

/// Outbox repository, stateless.
pub struct BusEventRepo;

impl BusEventRepo {
    /// Append a message and return its record id.
    pub fn insert(
        conn: &Connection,
        event: &BusEvent,
        ctx: &CallContext,
        now: DateTime<Utc>,
    ) -> std::result::Result<i64, BusError> {
        let payload = serde_json::to_string(event)?;
        let _ = conn.execute(
            "INSERT INTO bus_events (event_kind, payload, user_token, created_date,
                                     account_record_id, tenant_record_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                event.kind(),
                payload,
                ctx.user_token.to_string(),
                to_millis(now),
                ctx.tenant.account_record_id,
                ctx.tenant.tenant_record_id,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Messages written for the tenant's account, oldest first.
    pub fn list_for_account(
        conn: &Connection,
        tenant: &TenantContext,
    ) -> Result<Vec<StoredBusEvent>> {
        let mut stmt = conn.prepare(
            "SELECT record_id, payload, created_date FROM bus_events
             WHERE tenant_record_id = ?1 AND account_record_id IS ?2
             ORDER BY record_id ASC",
        )?;
        let rows = stmt
            .query_map(
                params![tenant.tenant_record_id, tenant.account_record_id],
                Self::map_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredBusEvent> {
        Ok(StoredBusEvent {
            record_id: row.get(0)?,
            event: json(row, 1)?,
            created_date: instant(row, 2)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::repositories::test_support::{at, ctx, setup};
    use tally_core::{AccountId, BundleId};
    use uuid::Uuid;

    fn repair(bundle: &str) -> BusEvent {
        BusEvent::RepairEntitlement {
            account_id: AccountId::from("acct-1"),
            bundle_id: BundleId::from(bundle),
            effective_date: at(2021, 4, 1),
            user_token: Uuid::nil(),
        }
    }

    #[test]
    fn insert_and_list_in_order() {
        let conn = setup();
        let first = BusEventRepo::insert(&conn, &repair("b-1"), &ctx(), at(2021, 4, 1)).unwrap();
        let second = BusEventRepo::insert(&conn, &repair("b-2"), &ctx(), at(2021, 4, 2)).unwrap();
        assert!(first < second);

        let rows = BusEventRepo::list_for_account(&conn, &ctx().tenant).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].event, repair("b-1"));
        assert_eq!(rows[1].created_date, at(2021, 4, 2));
    }

    #[test]
    fn list_is_scoped_to_account() {
        let conn = setup();
        let _ = BusEventRepo::insert(&conn, &repair("b-1"), &ctx(), at(2021, 4, 1)).unwrap();

        let other = TenantContext::new(1, 11);
        assert!(BusEventRepo::list_for_account(&conn, &other).unwrap().is_empty());
    }
}
