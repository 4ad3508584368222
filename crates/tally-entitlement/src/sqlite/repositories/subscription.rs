//! Subscription repository.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tally_core::{BundleId, CallContext, SubscriptionId, TenantContext};

use crate::errors::Result;
use crate::sqlite::row_types::{instant, opt_instant, opt_to_millis, parsed, to_millis};
use crate::types::SubscriptionData;

const COLUMNS: &str =
    "id, bundle_id, category, start_date, bundle_start_date, charged_through_date, active_version";

/// Subscription repository, stateless.
pub struct SubscriptionRepo;

impl SubscriptionRepo {
    /// Insert a subscription. The bundle must exist.
    pub fn insert(
        conn: &Connection,
        data: &SubscriptionData,
        ctx: &CallContext,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let _ = conn.execute(
            "INSERT INTO subscriptions (id, bundle_id, category, start_date, bundle_start_date,
                                        charged_through_date, active_version, created_by,
                                        created_date, updated_date, account_record_id,
                                        tenant_record_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9, ?10, ?11)",
            params![
                data.id.as_str(),
                data.bundle_id.as_str(),
                data.category.as_str(),
                to_millis(data.start_date),
                to_millis(data.bundle_start_date),
                opt_to_millis(data.charged_through_date),
                data.active_version,
                ctx.created_by,
                to_millis(now),
                ctx.tenant.account_record_id,
                ctx.tenant.tenant_record_id,
            ],
        )?;
        Ok(())
    }

    /// Subscription by id.
    pub fn get_by_id(
        conn: &Connection,
        id: &SubscriptionId,
        tenant: &TenantContext,
    ) -> Result<Option<SubscriptionData>> {
        let row = conn
            .query_row(
                &format!(
                    "SELECT {COLUMNS} FROM subscriptions WHERE id = ?1 AND tenant_record_id = ?2"
                ),
                params![id.as_str(), tenant.tenant_record_id],
                Self::map_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Subscriptions of a bundle, in insertion order.
    pub fn list_for_bundle(
        conn: &Connection,
        bundle_id: &BundleId,
        tenant: &TenantContext,
    ) -> Result<Vec<SubscriptionData>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM subscriptions
             WHERE bundle_id = ?1 AND tenant_record_id = ?2 ORDER BY record_id"
        ))?;
        let rows = stmt
            .query_map(params![bundle_id.as_str(), tenant.tenant_record_id], Self::map_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Set the charged-through date. Returns whether the subscription exists.
    pub fn update_charged_through_date(
        conn: &Connection,
        id: &SubscriptionId,
        charged_through_date: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
        tenant: &TenantContext,
    ) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE subscriptions SET charged_through_date = ?1, updated_date = ?2
             WHERE id = ?3 AND tenant_record_id = ?4",
            params![
                opt_to_millis(charged_through_date),
                to_millis(now),
                id.as_str(),
                tenant.tenant_record_id
            ],
        )?;
        Ok(changed > 0)
    }

    /// Move a subscription to a new version with new alignment dates.
    pub fn update_for_repair(
        conn: &Connection,
        id: &SubscriptionId,
        active_version: i64,
        start_date: DateTime<Utc>,
        bundle_start_date: DateTime<Utc>,
        now: DateTime<Utc>,
        tenant: &TenantContext,
    ) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE subscriptions
             SET active_version = ?1, start_date = ?2, bundle_start_date = ?3, updated_date = ?4
             WHERE id = ?5 AND tenant_record_id = ?6",
            params![
                active_version,
                to_millis(start_date),
                to_millis(bundle_start_date),
                to_millis(now),
                id.as_str(),
                tenant.tenant_record_id
            ],
        )?;
        Ok(changed > 0)
    }

    fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SubscriptionData> {
        Ok(SubscriptionData {
            id: SubscriptionId::from_string(row.get(0)?),
            bundle_id: BundleId::from_string(row.get(1)?),
            category: parsed(row, 2)?,
            start_date: instant(row, 3)?,
            bundle_start_date: instant(row, 4)?,
            charged_through_date: opt_instant(row, 5)?,
            active_version: row.get(6)?,
        })
    }
}
