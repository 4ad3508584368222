//! Change notification through a transactional outbox.
//!
//! Messages are posted on the writing connection, so a rolled-back write
//! never leaves a message behind. Post failures are logged and swallowed:
//! the timeline write still commits.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tally_core::{AccountId, BundleId, CallContext};
use tracing::{debug, warn};

use crate::errors::BusError;
use crate::sqlite::repositories::BusEventRepo;
use crate::types::{BusEvent, EntitlementEvent};

/// Publish channel accepting messages inside the caller's transaction.
pub trait EventBus: Send + Sync {
    /// Post `event` through `conn`.
    fn post_from_transaction(
        &self,
        conn: &Connection,
        event: &BusEvent,
        ctx: &CallContext,
        now: DateTime<Utc>,
    ) -> Result<(), BusError>;
}

/// Outbox stored in the `bus_events` table of the entitlement database.
#[derive(Clone, Copy, Debug, Default)]
pub struct SqliteOutboxBus;

impl EventBus for SqliteOutboxBus {
    fn post_from_transaction(
        &self,
        conn: &Connection,
        event: &BusEvent,
        ctx: &CallContext,
        now: DateTime<Utc>,
    ) -> Result<(), BusError> {
        let _ = BusEventRepo::insert(conn, event, ctx, now)?;
        Ok(())
    }
}

/// Best-effort publisher of change notifications.
#[derive(Clone)]
pub struct ChangeNotifier {
    bus: Arc<dyn EventBus>,
}

impl ChangeNotifier {
    /// Notifier posting on `bus`.
    pub fn new(bus: Arc<dyn EventBus>) -> Self {
        Self { bus }
    }

    /// Announce `event` on a subscription of `bundle_id`.
    pub fn publish_requested_change(
        &self,
        conn: &Connection,
        bundle_id: &BundleId,
        event: &EntitlementEvent,
        ctx: &CallContext,
        now: DateTime<Utc>,
    ) {
        let message = BusEvent::requested_change(bundle_id, event, ctx.user_token);
        self.post(conn, &message, ctx, now);
    }

    /// Announce a repair of `bundle_id`.
    pub fn publish_repair(
        &self,
        conn: &Connection,
        account_id: &AccountId,
        bundle_id: &BundleId,
        ctx: &CallContext,
        now: DateTime<Utc>,
    ) {
        let message = BusEvent::RepairEntitlement {
            account_id: account_id.clone(),
            bundle_id: bundle_id.clone(),
            effective_date: now,
            user_token: ctx.user_token,
        };
        self.post(conn, &message, ctx, now);
    }

    fn post(&self, conn: &Connection, message: &BusEvent, ctx: &CallContext, now: DateTime<Utc>) {
        match self.bus.post_from_transaction(conn, message, ctx, now) {
            Ok(()) => debug!(
                kind = message.kind(),
                user_token = %ctx.user_token,
                "posted change notification"
            ),
            Err(e) => warn!(
                kind = message.kind(),
                user_token = %ctx.user_token,
                error = %e,
                "failed to post change notification"
            ),
        }
    }
}
