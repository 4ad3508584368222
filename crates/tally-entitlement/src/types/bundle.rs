//! Persisted bundle data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tally_core::{AccountId, BundleId};

/// A group of subscriptions sharing a lifecycle key.
///
/// `(account_id, external_key)` is unique within a tenant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleData {
    /// Bundle ID.
    pub id: BundleId,
    /// Owning account.
    pub account_id: AccountId,
    /// Caller-assigned key, unique per account.
    pub external_key: String,
    /// Creation instant of the bundle's lifecycle.
    pub start_date: DateTime<Utc>,
    /// Last time any subscription in the bundle was touched by the system.
    pub last_sys_update_date: DateTime<Utc>,
}

impl BundleData {
    /// New bundle starting at `start_date`.
    pub fn new(
        account_id: AccountId,
        external_key: impl Into<String>,
        start_date: DateTime<Utc>,
    ) -> Self {
        Self {
            id: BundleId::new(),
            account_id,
            external_key: external_key.into(),
            start_date,
            last_sys_update_date: start_date,
        }
    }
}
