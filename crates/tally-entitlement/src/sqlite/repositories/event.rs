//! Event repository: the append-only entitlement log.
//!
//! Rows are never deleted. Superseding an event clears `is_active`;
//! repair moves events to a new `active_version`. Timelines are read in
//! `(effective_date, record_id)` order, so ties keep insertion order.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tally_core::{BundleId, CallContext, EventId, SubscriptionId, TenantContext};
use uuid::Uuid;

use crate::errors::{EntitlementError, Result};
use crate::sqlite::row_types::{instant, json, to_millis};
use crate::types::EntitlementEvent;

const COLUMNS: &str = "e.id, e.subscription_id, e.effective_date, e.processed_date, \
                       e.requested_date, e.active_version, e.is_active, e.record_id, e.payload";

/// Who appended an event, and why.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventAudit {
    /// Correlation token of the write.
    pub user_token: Option<Uuid>,
    /// Initiator of the write.
    pub created_by: String,
    /// Reason given with the write, if any.
    pub reason: Option<String>,
}

/// Event repository, stateless.
pub struct EventRepo;

impl EventRepo {
    /// Append an event and return its record id.
    ///
    /// Fails with [`EntitlementError::DuplicateId`] if the id is taken.
    pub fn insert(
        conn: &Connection,
        event: &EntitlementEvent,
        ctx: &CallContext,
        now: DateTime<Utc>,
    ) -> Result<i64> {
        let payload = serde_json::to_string(&event.payload)?;
        let inserted = conn.execute(
            "INSERT INTO subscription_events (id, subscription_id, event_type, plan_name,
                                              phase_name, payload, effective_date,
                                              processed_date, requested_date, active_version,
                                              is_active, user_token, created_by, reason,
                                              created_date, updated_date, account_record_id,
                                              tenant_record_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                     ?15, ?15, ?16, ?17)",
            params![
                event.id.as_str(),
                event.subscription_id.as_str(),
                event.event_type().as_str(),
                event.payload.plan(),
                event.payload.phase(),
                payload,
                to_millis(event.effective_date),
                to_millis(event.processed_date),
                to_millis(event.requested_date),
                event.active_version,
                event.is_active,
                ctx.user_token.to_string(),
                ctx.created_by,
                ctx.reason,
                to_millis(now),
                ctx.tenant.account_record_id,
                ctx.tenant.tenant_record_id,
            ],
        );
        match inserted {
            Ok(_) => Ok(conn.last_insert_rowid()),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
            {
                Err(EntitlementError::DuplicateId(event.id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Event by id, active or not.
    pub fn get_by_id(
        conn: &Connection,
        id: &EventId,
        tenant: &TenantContext,
    ) -> Result<Option<EntitlementEvent>> {
        let row = conn
            .query_row(
                &format!(
                    "SELECT {COLUMNS} FROM subscription_events e
                     WHERE e.id = ?1 AND e.tenant_record_id = ?2"
                ),
                params![id.as_str(), tenant.tenant_record_id],
                Self::map_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Audit columns of an event.
    pub fn audit(
        conn: &Connection,
        id: &EventId,
        tenant: &TenantContext,
    ) -> Result<Option<EventAudit>> {
        let row = conn
            .query_row(
                "SELECT user_token, created_by, reason FROM subscription_events
                 WHERE id = ?1 AND tenant_record_id = ?2",
                params![id.as_str(), tenant.tenant_record_id],
                |row| {
                    let token: Option<String> = row.get(0)?;
                    Ok(EventAudit {
                        user_token: token.and_then(|t| Uuid::parse_str(&t).ok()),
                        created_by: row.get(1)?,
                        reason: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    /// Every event of a subscription (active and inactive, all versions),
    /// ordered by effective date then insertion.
    pub fn timeline(
        conn: &Connection,
        subscription_id: &SubscriptionId,
        tenant: &TenantContext,
    ) -> Result<Vec<EntitlementEvent>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM subscription_events e
             WHERE e.subscription_id = ?1 AND e.tenant_record_id = ?2
             ORDER BY e.effective_date ASC, e.record_id ASC"
        ))?;
        let rows = stmt
            .query_map(
                params![subscription_id.as_str(), tenant.tenant_record_id],
                Self::map_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Active events at the subscription's current version that take effect
    /// strictly after `now`, in timeline order.
    pub fn active_future(
        conn: &Connection,
        subscription_id: &SubscriptionId,
        now: DateTime<Utc>,
        tenant: &TenantContext,
    ) -> Result<Vec<EntitlementEvent>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM subscription_events e
             JOIN subscriptions s ON s.id = e.subscription_id
                                 AND s.active_version = e.active_version
             WHERE e.subscription_id = ?1 AND e.tenant_record_id = ?2
               AND e.is_active = 1 AND e.effective_date > ?3
             ORDER BY e.effective_date ASC, e.record_id ASC"
        ))?;
        let rows = stmt
            .query_map(
                params![subscription_id.as_str(), tenant.tenant_record_id, to_millis(now)],
                Self::map_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Every event of every subscription in a bundle, grouped by subscription
    /// insertion order and then timeline order.
    pub fn list_for_bundle(
        conn: &Connection,
        bundle_id: &BundleId,
        tenant: &TenantContext,
    ) -> Result<Vec<EntitlementEvent>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM subscription_events e
             JOIN subscriptions s ON s.id = e.subscription_id
             WHERE s.bundle_id = ?1 AND e.tenant_record_id = ?2
             ORDER BY s.record_id ASC, e.effective_date ASC, e.record_id ASC"
        ))?;
        let rows = stmt
            .query_map(params![bundle_id.as_str(), tenant.tenant_record_id], Self::map_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Clear the active flag. Returns `false` if the event was already
    /// inactive or does not exist.
    pub fn deactivate(
        conn: &Connection,
        id: &EventId,
        now: DateTime<Utc>,
        tenant: &TenantContext,
    ) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE subscription_events SET is_active = 0, updated_date = ?1
             WHERE id = ?2 AND tenant_record_id = ?3 AND is_active = 1",
            params![to_millis(now), id.as_str(), tenant.tenant_record_id],
        )?;
        Ok(changed > 0)
    }

    /// Move an event to `active_version`. Returns whether it exists.
    pub fn update_version(
        conn: &Connection,
        id: &EventId,
        active_version: i64,
        now: DateTime<Utc>,
        tenant: &TenantContext,
    ) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE subscription_events SET active_version = ?1, updated_date = ?2
             WHERE id = ?3 AND tenant_record_id = ?4",
            params![active_version, to_millis(now), id.as_str(), tenant.tenant_record_id],
        )?;
        Ok(changed > 0)
    }

    fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<EntitlementEvent> {
        Ok(EntitlementEvent {
            id: EventId::from_string(row.get(0)?),
            subscription_id: SubscriptionId::from_string(row.get(1)?),
            effective_date: instant(row, 2)?,
            processed_date: instant(row, 3)?,
            requested_date: instant(row, 4)?,
            active_version: row.get(5)?,
            is_active: row.get(6)?,
            record_id: Some(row.get(7)?),
            payload: json(row, 8)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::repositories::test_support::{at, bundle, ctx, setup, subscription};
    use crate::types::{EventPayload, EventType, ProductCategory, SubscriptionData};
    use assert_matches::assert_matches;

    fn event(
        sub: &SubscriptionData,
        id: &str,
        effective: DateTime<Utc>,
        payload: EventPayload,
    ) -> EntitlementEvent {
        EntitlementEvent {
            id: EventId::from(id),
            subscription_id: sub.id.clone(),
            effective_date: effective,
            processed_date: at(2021, 1, 1),
            requested_date: at(2021, 1, 1),
            active_version: sub.active_version,
            is_active: true,
            record_id: None,
            payload,
        }
    }

    fn create() -> EventPayload {
        EventPayload::Create {
            plan: "silver".into(),
            phase: "trial".into(),
        }
    }

    #[test]
    fn insert_and_get() {
        let conn = setup();
        let b = bundle(&conn, "k");
        let sub = subscription(&conn, &b, ProductCategory::Base);
        let e = event(&sub, "evt-1", at(2021, 1, 1), create());

        let record_id = EventRepo::insert(&conn, &e, &ctx(), at(2021, 1, 1)).unwrap();
        let loaded = EventRepo::get_by_id(&conn, &e.id, &ctx().tenant).unwrap().unwrap();
        assert_eq!(loaded.record_id, Some(record_id));
        assert_eq!(loaded.payload, e.payload);
        assert_eq!(loaded.event_type(), EventType::Create);
    }

    #[test]
    fn audit_records_token_and_reason() {
        let conn = setup();
        let b = bundle(&conn, "k");
        let sub = subscription(&conn, &b, ProductCategory::Base);
        let e = event(&sub, "evt-1", at(2021, 1, 1), create());
        let call = ctx().with_reason("catalog fix");

        let _ = EventRepo::insert(&conn, &e, &call, at(2021, 1, 1)).unwrap();
        let audit = EventRepo::audit(&conn, &e.id, &call.tenant).unwrap().unwrap();
        assert_eq!(audit.user_token, Some(call.user_token));
        assert_eq!(audit.created_by, call.created_by);
        assert_eq!(audit.reason.as_deref(), Some("catalog fix"));
        assert!(EventRepo::audit(&conn, &EventId::from("nope"), &call.tenant).unwrap().is_none());
    }

    #[test]
    fn duplicate_id_is_rejected() {
        let conn = setup();
        let b = bundle(&conn, "k");
        let sub = subscription(&conn, &b, ProductCategory::Base);
        let e = event(&sub, "evt-1", at(2021, 1, 1), create());
        let _ = EventRepo::insert(&conn, &e, &ctx(), at(2021, 1, 1)).unwrap();

        let err = EventRepo::insert(&conn, &e, &ctx(), at(2021, 1, 1)).unwrap_err();
        assert_matches!(err, EntitlementError::DuplicateId(id) if id == "evt-1");
    }

    #[test]
    fn timeline_orders_by_effective_then_insertion() {
        let conn = setup();
        let b = bundle(&conn, "k");
        let sub = subscription(&conn, &b, ProductCategory::Base);
        for (id, when) in [
            ("late", at(2021, 6, 1)),
            ("tie-a", at(2021, 3, 1)),
            ("early", at(2021, 1, 1)),
            ("tie-b", at(2021, 3, 1)),
        ] {
            let e = event(&sub, id, when, EventPayload::Phase { phase: id.into() });
            let _ = EventRepo::insert(&conn, &e, &ctx(), at(2021, 1, 1)).unwrap();
        }

        let ids: Vec<String> = EventRepo::timeline(&conn, &sub.id, &ctx().tenant)
            .unwrap()
            .into_iter()
            .map(|e| e.id.into_inner())
            .collect();
        assert_eq!(ids, vec!["early", "tie-a", "tie-b", "late"]);
    }

    #[test]
    fn active_future_skips_past_inactive_and_stale_versions() {
        let conn = setup();
        let tenant = ctx().tenant;
        let b = bundle(&conn, "k");
        let sub = subscription(&conn, &b, ProductCategory::Base);

        let past = event(&sub, "past", at(2021, 1, 1), create());
        let evergreen = EventPayload::Phase {
            phase: "evergreen".into(),
        };
        let future = event(&sub, "future", at(2021, 6, 1), evergreen);
        let inactive = event(&sub, "inactive", at(2021, 7, 1), EventPayload::Cancel);
        let mut stale = event(&sub, "stale", at(2021, 8, 1), EventPayload::Cancel);
        stale.active_version = 0;
        for e in [&past, &future, &inactive, &stale] {
            let _ = EventRepo::insert(&conn, e, &ctx(), at(2021, 1, 1)).unwrap();
        }
        assert!(EventRepo::deactivate(&conn, &inactive.id, at(2021, 2, 1), &tenant).unwrap());

        let pending = EventRepo::active_future(&conn, &sub.id, at(2021, 2, 1), &tenant).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, future.id);

        assert_eq!(EventRepo::timeline(&conn, &sub.id, &tenant).unwrap().len(), 4);
    }

    #[test]
    fn deactivate_is_idempotent() {
        let conn = setup();
        let tenant = ctx().tenant;
        let b = bundle(&conn, "k");
        let sub = subscription(&conn, &b, ProductCategory::Base);
        let e = event(&sub, "evt", at(2021, 6, 1), EventPayload::Cancel);
        let _ = EventRepo::insert(&conn, &e, &ctx(), at(2021, 1, 1)).unwrap();

        assert!(EventRepo::deactivate(&conn, &e.id, at(2021, 2, 1), &tenant).unwrap());
        assert!(!EventRepo::deactivate(&conn, &e.id, at(2021, 2, 2), &tenant).unwrap());
        let loaded = EventRepo::get_by_id(&conn, &e.id, &tenant).unwrap().unwrap();
        assert!(!loaded.is_active);
    }

    #[test]
    fn update_version_moves_event() {
        let conn = setup();
        let tenant = ctx().tenant;
        let b = bundle(&conn, "k");
        let sub = subscription(&conn, &b, ProductCategory::Base);
        let e = event(&sub, "evt", at(2021, 1, 1), create());
        let _ = EventRepo::insert(&conn, &e, &ctx(), at(2021, 1, 1)).unwrap();

        assert!(EventRepo::update_version(&conn, &e.id, 2, at(2021, 2, 1), &tenant).unwrap());
        let loaded = EventRepo::get_by_id(&conn, &e.id, &tenant).unwrap().unwrap();
        assert_eq!(loaded.active_version, 2);
    }

    #[test]
    fn list_for_bundle_groups_by_subscription() {
        let conn = setup();
        let b = bundle(&conn, "k");
        let base = subscription(&conn, &b, ProductCategory::Base);
        let addon = subscription(&conn, &b, ProductCategory::AddOn);
        for e in [
            event(&addon, "a1", at(2021, 1, 1), create()),
            event(&base, "b1", at(2021, 2, 1), create()),
        ] {
            let _ = EventRepo::insert(&conn, &e, &ctx(), at(2021, 1, 1)).unwrap();
        }

        let ids: Vec<String> = EventRepo::list_for_bundle(&conn, &b.id, &ctx().tenant)
            .unwrap()
            .into_iter()
            .map(|e| e.id.into_inner())
            .collect();
        assert_eq!(ids, vec!["b1", "a1"]);
    }
}
