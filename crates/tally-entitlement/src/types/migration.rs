//! Inputs for bulk timeline rewrites: migration, transfer and repair.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tally_core::{AccountId, EventId, SubscriptionId};

use super::bundle::BundleData;
use super::event::EntitlementEvent;
use super::subscription::SubscriptionData;

/// One subscription and the timeline to import with it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionMigration {
    /// Subscription to create.
    pub data: SubscriptionData,
    /// Events to append, in timeline order. Must not be empty.
    pub initial_events: Vec<EntitlementEvent>,
}

/// One bundle and its subscriptions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleMigration {
    /// Bundle to create. Skipped if `(account, external key)` already exists.
    pub data: BundleData,
    /// Subscriptions to create in the bundle.
    pub subscriptions: Vec<SubscriptionMigration>,
}

/// Everything imported for one account.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountMigration {
    /// Bundles to import.
    pub bundles: Vec<BundleMigration>,
}

/// A source-account subscription to cancel as part of a transfer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferCancel {
    /// Subscription being transferred away.
    pub subscription: SubscriptionData,
    /// Cancel event to append to it.
    pub cancel_event: EntitlementEvent,
}

/// Repair instructions for one subscription.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionRepair {
    /// Subscription to repair.
    pub id: SubscriptionId,
    /// Version the subscription moves to.
    pub active_version: i64,
    /// New alignment/start date.
    pub start_date: DateTime<Utc>,
    /// New bundle start date.
    pub bundle_start_date: DateTime<Utc>,
    /// Existing events carried over to `active_version`.
    pub carried_events: Vec<EventId>,
    /// Events to append at `active_version`.
    pub new_events: Vec<EntitlementEvent>,
}

/// Result of a migrate call.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// `account/key` of every bundle written.
    pub imported: Vec<String>,
    /// `account/key` of every bundle skipped because it already existed.
    pub skipped: Vec<String>,
}

impl MigrationReport {
    /// Record the outcome for one bundle.
    pub(crate) fn record(&mut self, account_id: &AccountId, external_key: &str, imported: bool) {
        let label = format!("{account_id}/{external_key}");
        if imported {
            self.imported.push(label);
        } else {
            self.skipped.push(label);
        }
    }
}
