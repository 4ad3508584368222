//! Bundle repository.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tally_core::{AccountId, BundleId, CallContext, TenantContext};

use crate::errors::Result;
use crate::sqlite::row_types::{instant, to_millis};
use crate::types::BundleData;

const COLUMNS: &str = "id, account_id, external_key, start_date, last_sys_update_date";

/// Bundle repository, stateless.
pub struct BundleRepo;

impl BundleRepo {
    /// Insert a bundle. Fails on a duplicate id or `(account, key)`.
    pub fn insert(
        conn: &Connection,
        bundle: &BundleData,
        ctx: &CallContext,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let _ = conn.execute(
            "INSERT INTO bundles (id, external_key, account_id, start_date, last_sys_update_date,
                                  created_by, created_date, account_record_id, tenant_record_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                bundle.id.as_str(),
                bundle.external_key,
                bundle.account_id.as_str(),
                to_millis(bundle.start_date),
                to_millis(bundle.last_sys_update_date),
                ctx.created_by,
                to_millis(now),
                ctx.tenant.account_record_id,
                ctx.tenant.tenant_record_id,
            ],
        )?;
        Ok(())
    }

    /// Bundle by id.
    pub fn get_by_id(
        conn: &Connection,
        id: &BundleId,
        tenant: &TenantContext,
    ) -> Result<Option<BundleData>> {
        let row = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM bundles WHERE id = ?1 AND tenant_record_id = ?2"),
                params![id.as_str(), tenant.tenant_record_id],
                Self::map_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Bundle by `(account, external key)`.
    pub fn get_by_account_and_key(
        conn: &Connection,
        account_id: &AccountId,
        external_key: &str,
        tenant: &TenantContext,
    ) -> Result<Option<BundleData>> {
        let row = conn
            .query_row(
                &format!(
                    "SELECT {COLUMNS} FROM bundles
                     WHERE account_id = ?1 AND external_key = ?2 AND tenant_record_id = ?3"
                ),
                params![account_id.as_str(), external_key, tenant.tenant_record_id],
                Self::map_row,
            )
            .optional()?;
        Ok(row)
    }

    /// All bundles of an account, oldest first.
    pub fn list_for_account(
        conn: &Connection,
        account_id: &AccountId,
        tenant: &TenantContext,
    ) -> Result<Vec<BundleData>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM bundles
             WHERE account_id = ?1 AND tenant_record_id = ?2 ORDER BY record_id"
        ))?;
        let rows = stmt
            .query_map(params![account_id.as_str(), tenant.tenant_record_id], Self::map_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// All bundles using `external_key`, across the tenant's accounts.
    pub fn list_for_key(
        conn: &Connection,
        external_key: &str,
        tenant: &TenantContext,
    ) -> Result<Vec<BundleData>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM bundles
             WHERE external_key = ?1 AND tenant_record_id = ?2 ORDER BY record_id"
        ))?;
        let rows = stmt
            .query_map(params![external_key, tenant.tenant_record_id], Self::map_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Bump `last_sys_update_date`. Returns whether the bundle exists.
    pub fn touch(
        conn: &Connection,
        id: &BundleId,
        now: DateTime<Utc>,
        tenant: &TenantContext,
    ) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE bundles SET last_sys_update_date = ?1 WHERE id = ?2 AND tenant_record_id = ?3",
            params![to_millis(now), id.as_str(), tenant.tenant_record_id],
        )?;
        Ok(changed > 0)
    }

    fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<BundleData> {
        Ok(BundleData {
            id: BundleId::from_string(row.get(0)?),
            account_id: AccountId::from_string(row.get(1)?),
            external_key: row.get(2)?,
            start_date: instant(row, 3)?,
            last_sys_update_date: instant(row, 4)?,
        })
    }
}
