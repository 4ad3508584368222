//! Transactional entitlement API.
//!
//! [`TransactionCoordinator`] composes the repositories, the scheduler, the
//! notifier and the bundle assembler into atomic operations. Every write
//! runs inside one `BEGIN IMMEDIATE` transaction, which serializes writers
//! at the database, and follows the same shape: validate, supersede
//! conflicting future events, append, schedule each appended event, notify
//! on the last one. Before commit, every touched subscription is checked for
//! duplicate pending events.
//!
//! Reads run in deferred transactions, rebuild subscriptions as of the
//! injected clock's "now", and return `None`/empty for unknown ids.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use tally_core::{AccountId, BundleId, CallContext, Clock, EventId, SubscriptionId, TenantContext};
use tally_settings::{NotificationSettings, TallySettings};
use tracing::{debug, error, info, warn};

use crate::engine::{BundleAssembler, Catalog, SubscriptionTimeline};
use crate::errors::{EntitlementError, Result};
use crate::sqlite::connection::{self, ConnectionPool, PooledConnection};
use crate::sqlite::migrations::run_migrations;
use crate::sqlite::repositories::{BundleRepo, EventAudit, EventRepo, SubscriptionRepo};
use crate::store::notifier::{ChangeNotifier, EventBus, SqliteOutboxBus};
use crate::store::scheduler::{NotificationQueue, NotificationScheduler, SqliteNotificationQueue};
use crate::types::{
    AccountMigration, BundleData, BundleMigration, EntitlementEvent, EventType, MigrationReport,
    NotificationKey, ProductCategory, Subscription, SubscriptionData, SubscriptionRepair,
    TransferCancel,
};

/// State shared by every step of one write transaction.
struct WriteTx<'a> {
    conn: &'a Connection,
    ctx: &'a CallContext,
    now: DateTime<Utc>,
    touched: BTreeSet<SubscriptionId>,
}

impl WriteTx<'_> {
    fn tenant(&self) -> &TenantContext {
        self.ctx.tenant()
    }
}

/// Atomic entitlement operations over a `SQLite` event store.
pub struct TransactionCoordinator {
    pool: ConnectionPool,
    clock: Arc<dyn Clock>,
    assembler: BundleAssembler,
    scheduler: NotificationScheduler,
    notifier: ChangeNotifier,
}

impl TransactionCoordinator {
    /// Coordinator over an already-migrated pool and explicit collaborators.
    pub fn new(
        pool: ConnectionPool,
        clock: Arc<dyn Clock>,
        catalog: Arc<dyn Catalog>,
        queue: Arc<dyn NotificationQueue>,
        bus: Arc<dyn EventBus>,
    ) -> Self {
        Self {
            pool,
            clock,
            assembler: BundleAssembler::new(catalog),
            scheduler: NotificationScheduler::new(queue),
            notifier: ChangeNotifier::new(bus),
        }
    }

    /// Coordinator whose wake-ups and notifications live in the same
    /// database as the timelines.
    pub fn with_sqlite_defaults(
        pool: ConnectionPool,
        clock: Arc<dyn Clock>,
        catalog: Arc<dyn Catalog>,
        notifications: &NotificationSettings,
    ) -> Self {
        Self::new(
            pool,
            clock,
            catalog,
            Arc::new(SqliteNotificationQueue::from_settings(notifications)),
            Arc::new(SqliteOutboxBus),
        )
    }

    /// Open the database described by `settings`, apply migrations and wire
    /// the `SQLite` queue and outbox.
    ///
    /// Also installs the configured log subscriber unless the embedder has
    /// already set one.
    pub fn open(
        settings: &TallySettings,
        clock: Arc<dyn Clock>,
        catalog: Arc<dyn Catalog>,
    ) -> Result<Self> {
        tally_core::logging::init(&settings.logging.level, settings.logging.json);
        let pool = connection::open(&settings.storage)?;
        {
            let conn = pool.get()?;
            let applied = run_migrations(&conn)?;
            debug!(applied, path = %settings.storage.database_path, "entitlement store opened");
        }
        Ok(Self::with_sqlite_defaults(pool, clock, catalog, &settings.notifications))
    }

    /// The underlying pool.
    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    fn conn(&self) -> Result<PooledConnection> {
        Ok(self.pool.get()?)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Transactions
    // ─────────────────────────────────────────────────────────────────────

    fn write<T>(
        &self,
        operation: &'static str,
        ctx: &CallContext,
        body: impl FnOnce(&mut WriteTx<'_>) -> Result<T>,
    ) -> Result<T> {
        let conn = self.conn()?;
        let tx = Transaction::new_unchecked(&conn, TransactionBehavior::Immediate)?;
        let mut scope = WriteTx {
            conn: &*tx,
            ctx,
            now: self.clock.utc_now(),
            touched: BTreeSet::new(),
        };

        let out = body(&mut scope)
            .and_then(|out| verify_pending_events(&scope).map(|()| out))
            .inspect_err(|e| match e {
                EntitlementError::InvariantViolation(_)
                | EntitlementError::DuplicateCancel { .. }
                | EntitlementError::InconsistentBundle(_) => {
                    let category = e.category();
                    error!(operation, category, error = %e, "entitlement write aborted");
                }
                _ => {
                    let category = e.category();
                    debug!(operation, category, error = %e, "entitlement write aborted");
                }
            })?;
        let touched = scope.touched.len();

        tx.commit()?;
        debug!(operation, touched, user_token = %ctx.user_token, "entitlement write committed");
        Ok(out)
    }

    fn read<T>(&self, body: impl FnOnce(&Connection, DateTime<Utc>) -> Result<T>) -> Result<T> {
        let conn = self.conn()?;
        let tx = Transaction::new_unchecked(&conn, TransactionBehavior::Deferred)?;
        let out = body(&tx, self.clock.utc_now())?;
        tx.commit()?;
        Ok(out)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Write steps
    // ─────────────────────────────────────────────────────────────────────

    fn stored_subscription(w: &WriteTx<'_>, id: &SubscriptionId) -> Result<SubscriptionData> {
        SubscriptionRepo::get_by_id(w.conn, id, w.tenant())?
            .ok_or_else(|| EntitlementError::Validation(format!("unknown subscription {id}")))
    }

    fn append(w: &mut WriteTx<'_>, event: &EntitlementEvent) -> Result<()> {
        let record_id = EventRepo::insert(w.conn, event, w.ctx, w.now)?;
        let _ = w.touched.insert(event.subscription_id.clone());
        debug!(
            event_id = %event.id,
            subscription_id = %event.subscription_id,
            event_type = %event.event_type(),
            effective = %event.effective_date,
            record_id,
            "appended entitlement event"
        );
        Ok(())
    }

    fn schedule(&self, w: &WriteTx<'_>, event: &EntitlementEvent, seq_id: i64) -> Result<()> {
        let key = NotificationKey::with_seq(event.id.clone(), seq_id);
        self.scheduler
            .schedule_future_activation(w.conn, event.effective_date, &key, w.ctx, w.now)
    }

    fn append_scheduled(
        &self,
        w: &mut WriteTx<'_>,
        event: &EntitlementEvent,
        seq_id: i64,
    ) -> Result<()> {
        Self::append(w, event)?;
        self.schedule(w, event, seq_id)
    }

    fn notify(&self, w: &WriteTx<'_>, bundle_id: &BundleId, event: &EntitlementEvent) {
        self.notifier
            .publish_requested_change(w.conn, bundle_id, event, w.ctx, w.now);
    }

    /// Deactivate pending events of `subscription_id`, all of them or only
    /// those of `only`. Returns what was deactivated.
    fn deactivate_future(
        w: &mut WriteTx<'_>,
        subscription_id: &SubscriptionId,
        only: Option<EventType>,
    ) -> Result<Vec<EntitlementEvent>> {
        let pending: Vec<_> = EventRepo::active_future(w.conn, subscription_id, w.now, w.tenant())?
            .into_iter()
            .filter(|e| only.is_none_or(|t| e.event_type() == t))
            .collect();
        for event in &pending {
            let _ = EventRepo::deactivate(w.conn, &event.id, w.now, w.tenant())?;
            debug!(
                event_id = %event.id,
                subscription_id = %subscription_id,
                "deactivated pending event"
            );
        }
        let _ = w.touched.insert(subscription_id.clone());
        Ok(pending)
    }

    /// Append, schedule each, notify on the last.
    fn append_batch(
        &self,
        w: &mut WriteTx<'_>,
        data: &SubscriptionData,
        events: &[EntitlementEvent],
    ) -> Result<()> {
        for event in events {
            self.append_scheduled(w, event, 0)?;
        }
        if let Some(last) = events.last() {
            self.notify(w, &data.bundle_id, last);
        }
        Ok(())
    }

    fn cancel_in(
        &self,
        w: &mut WriteTx<'_>,
        data: &SubscriptionData,
        cancel: &EntitlementEvent,
        seq_id: i64,
    ) -> Result<()> {
        check_events(data, std::slice::from_ref(cancel))?;
        if cancel.event_type() != EventType::Cancel {
            return Err(EntitlementError::Validation(format!(
                "event {} is {}, expected CANCEL",
                cancel.id,
                cancel.event_type()
            )));
        }
        let _ = Self::stored_subscription(w, &data.id)?;
        let _ = Self::deactivate_future(w, &data.id, None)?;
        self.append_scheduled(w, cancel, seq_id)?;
        self.notify(w, &data.bundle_id, cancel);
        Ok(())
    }

    /// Returns whether the bundle was written (`false` when skipped).
    fn migrate_bundle(&self, w: &mut WriteTx<'_>, migration: &BundleMigration) -> Result<bool> {
        let bundle = &migration.data;
        let (account_id, key) = (&bundle.account_id, &bundle.external_key);
        if BundleRepo::get_by_account_and_key(w.conn, account_id, key, w.tenant())?.is_some() {
            warn!(
                account_id = %bundle.account_id,
                external_key = %bundle.external_key,
                "bundle already exists, skipping migration"
            );
            return Ok(false);
        }

        let bases = migration
            .subscriptions
            .iter()
            .filter(|s| s.data.category == ProductCategory::Base)
            .count();
        if bases > 1 {
            return Err(EntitlementError::InvariantViolation(format!(
                "migrated bundle {} has {bases} base subscriptions",
                bundle.id
            )));
        }
        for sub in &migration.subscriptions {
            check_bundle_shape(&bundle.id, bases == 1, &sub.data)?;
        }

        BundleRepo::insert(w.conn, bundle, w.ctx, w.now)?;
        for sub in &migration.subscriptions {
            if sub.data.bundle_id != bundle.id {
                return Err(EntitlementError::Validation(format!(
                    "subscription {} does not belong to migrated bundle {}",
                    sub.data.id, bundle.id
                )));
            }
            check_events(&sub.data, &sub.initial_events)?;
            SubscriptionRepo::insert(w.conn, &sub.data, w.ctx, w.now)?;
            self.append_batch(w, &sub.data, &sub.initial_events)?;
        }
        Ok(true)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Write operations
    // ─────────────────────────────────────────────────────────────────────

    /// Create an empty bundle.
    ///
    /// A second bundle with the same `(account, external key)` is a
    /// validation error.
    pub fn create_bundle(&self, bundle: &BundleData, ctx: &CallContext) -> Result<()> {
        self.write("create_bundle", ctx, |w| {
            let (account_id, key) = (&bundle.account_id, &bundle.external_key);
            if BundleRepo::get_by_account_and_key(w.conn, account_id, key, w.tenant())?.is_some() {
                return Err(EntitlementError::Validation(format!(
                    "bundle {}/{} already exists",
                    bundle.account_id, bundle.external_key
                )));
            }
            BundleRepo::insert(w.conn, bundle, w.ctx, w.now)?;
            debug!(bundle_id = %bundle.id, account_id = %bundle.account_id, "created bundle");
            Ok(())
        })
    }

    /// Create a subscription with its initial events.
    pub fn create_subscription(
        &self,
        data: &SubscriptionData,
        initial_events: &[EntitlementEvent],
        ctx: &CallContext,
    ) -> Result<()> {
        self.write("create_subscription", ctx, |w| {
            check_events(data, initial_events)?;
            if BundleRepo::get_by_id(w.conn, &data.bundle_id, w.tenant())?.is_none() {
                return Err(EntitlementError::Validation(format!(
                    "unknown bundle {}",
                    data.bundle_id
                )));
            }
            let existing = SubscriptionRepo::list_for_bundle(w.conn, &data.bundle_id, w.tenant())?;
            let has_base = existing.iter().any(|s| s.category == ProductCategory::Base);
            check_bundle_shape(&data.bundle_id, has_base, data)?;
            SubscriptionRepo::insert(w.conn, data, w.ctx, w.now)?;
            self.append_batch(w, data, initial_events)
        })
    }

    /// Append a RECREATE timeline to an existing (expired) subscription.
    pub fn recreate_subscription(
        &self,
        data: &SubscriptionData,
        recreate_events: &[EntitlementEvent],
        ctx: &CallContext,
    ) -> Result<()> {
        self.write("recreate_subscription", ctx, |w| {
            check_events(data, recreate_events)?;
            let _ = Self::stored_subscription(w, &data.id)?;
            self.append_batch(w, data, recreate_events)
        })
    }

    /// Replace the pending PHASE event with `next_phase`.
    pub fn create_next_phase_event(
        &self,
        data: &SubscriptionData,
        next_phase: &EntitlementEvent,
        ctx: &CallContext,
    ) -> Result<()> {
        self.write("create_next_phase_event", ctx, |w| {
            check_events(data, std::slice::from_ref(next_phase))?;
            let _ = Self::stored_subscription(w, &data.id)?;
            let pending = EventRepo::active_future(w.conn, &data.id, w.now, w.tenant())?;
            let phases = pending.iter().filter(|e| e.event_type() == EventType::Phase).count();
            if phases > 1 {
                return Err(EntitlementError::InvariantViolation(format!(
                    "subscription {} has {phases} pending PHASE events",
                    data.id
                )));
            }
            let _ = Self::deactivate_future(w, &data.id, Some(EventType::Phase))?;
            self.append_scheduled(w, next_phase, 0)?;
            self.notify(w, &data.bundle_id, next_phase);
            Ok(())
        })
    }

    /// Cancel a subscription: every pending event is superseded by `cancel`.
    ///
    /// `seq_id` is carried in the wake-up key.
    pub fn cancel_subscription(
        &self,
        data: &SubscriptionData,
        cancel: &EntitlementEvent,
        seq_id: i64,
        ctx: &CallContext,
    ) -> Result<()> {
        self.write("cancel_subscription", ctx, |w| self.cancel_in(w, data, cancel, seq_id))
    }

    /// Withdraw the pending cancel and append `uncancel_events`.
    ///
    /// Two or more pending cancels fail with
    /// [`EntitlementError::DuplicateCancel`]. Without a pending cancel the
    /// call changes nothing.
    pub fn uncancel_subscription(
        &self,
        data: &SubscriptionData,
        uncancel_events: &[EntitlementEvent],
        ctx: &CallContext,
    ) -> Result<()> {
        self.write("uncancel_subscription", ctx, |w| {
            check_events(data, uncancel_events)?;
            let _ = Self::stored_subscription(w, &data.id)?;
            let cancels: Vec<_> = EventRepo::active_future(w.conn, &data.id, w.now, w.tenant())?
                .into_iter()
                .filter(|e| e.event_type() == EventType::Cancel)
                .collect();
            let cancel = match cancels.as_slice() {
                [] => {
                    warn!(subscription_id = %data.id, "no pending cancel, uncancel ignored");
                    return Ok(());
                }
                [only] => only,
                _ => {
                    return Err(EntitlementError::DuplicateCancel {
                        subscription_id: data.id.to_string(),
                        count: cancels.len(),
                    });
                }
            };
            let _ = EventRepo::deactivate(w.conn, &cancel.id, w.now, w.tenant())?;
            let _ = w.touched.insert(data.id.clone());
            self.append_batch(w, data, uncancel_events)
        })
    }

    /// Supersede every pending event and append `change_events`.
    pub fn change_plan(
        &self,
        data: &SubscriptionData,
        change_events: &[EntitlementEvent],
        ctx: &CallContext,
    ) -> Result<()> {
        self.write("change_plan", ctx, |w| {
            check_events(data, change_events)?;
            let _ = Self::stored_subscription(w, &data.id)?;
            let superseded = Self::deactivate_future(w, &data.id, None)?;
            debug!(subscription_id = %data.id, superseded = superseded.len(), "changing plan");
            self.append_batch(w, data, change_events)
        })
    }

    /// Record the invoiced-through date and touch the owning bundle.
    pub fn update_charged_through_date(
        &self,
        id: &SubscriptionId,
        charged_through_date: Option<DateTime<Utc>>,
        ctx: &CallContext,
    ) -> Result<()> {
        self.write("update_charged_through_date", ctx, |w| {
            let data = Self::stored_subscription(w, id)?;
            let _ = SubscriptionRepo::update_charged_through_date(
                w.conn,
                id,
                charged_through_date,
                w.now,
                w.tenant(),
            )?;
            let _ = BundleRepo::touch(w.conn, &data.bundle_id, w.now, w.tenant())?;
            Ok(())
        })
    }

    /// Import bundles with their timelines.
    ///
    /// Bundles whose `(account, external key)` already exists are skipped
    /// and reported, so the same import can be retried safely.
    pub fn migrate(
        &self,
        migration: &AccountMigration,
        ctx: &CallContext,
    ) -> Result<MigrationReport> {
        let report = self.write("migrate", ctx, |w| {
            let mut report = MigrationReport::default();
            for bundle in &migration.bundles {
                let imported = self.migrate_bundle(w, bundle)?;
                report.record(&bundle.data.account_id, &bundle.data.external_key, imported);
            }
            Ok(report)
        })?;
        info!(
            imported = report.imported.len(),
            skipped = report.skipped.len(),
            "account migration complete"
        );
        Ok(report)
    }

    /// Cancel the source subscriptions and import `bundle` in one
    /// transaction.
    pub fn transfer(
        &self,
        cancels: &[TransferCancel],
        bundle: &BundleMigration,
        ctx: &CallContext,
    ) -> Result<MigrationReport> {
        let report = self.write("transfer", ctx, |w| {
            for cancel in cancels {
                self.cancel_in(w, &cancel.subscription, &cancel.cancel_event, 0)?;
            }
            let mut report = MigrationReport::default();
            let imported = self.migrate_bundle(w, bundle)?;
            report.record(&bundle.data.account_id, &bundle.data.external_key, imported);
            Ok(report)
        })?;
        info!(
            cancelled = cancels.len(),
            bundle_id = %bundle.data.id,
            imported = !report.imported.is_empty(),
            "bundle transfer complete"
        );
        Ok(report)
    }

    /// Rewrite the timelines of `bundle_id` by moving subscriptions and
    /// carried events to new versions and appending new events.
    ///
    /// Only new events still in the future are scheduled. A repair message
    /// is published instead of requested-change messages.
    pub fn repair(
        &self,
        account_id: &AccountId,
        bundle_id: &BundleId,
        repairs: &[SubscriptionRepair],
        ctx: &CallContext,
    ) -> Result<()> {
        self.write("repair", ctx, |w| {
            if BundleRepo::get_by_id(w.conn, bundle_id, w.tenant())?.is_none() {
                return Err(EntitlementError::Validation(format!("unknown bundle {bundle_id}")));
            }
            for repair in repairs {
                let stored = Self::stored_subscription(w, &repair.id)?;
                check_repair(bundle_id, &stored, repair)?;
                let _ = SubscriptionRepo::update_for_repair(
                    w.conn,
                    &repair.id,
                    repair.active_version,
                    repair.start_date,
                    repair.bundle_start_date,
                    w.now,
                    w.tenant(),
                )?;
                for event_id in &repair.carried_events {
                    carry_event(w, event_id, repair)?;
                }
                for event in &repair.new_events {
                    Self::append(w, event)?;
                    if event.is_future(w.now) {
                        self.schedule(w, event, 0)?;
                    }
                }
                let _ = w.touched.insert(repair.id.clone());
                debug!(
                    subscription_id = %repair.id,
                    version = repair.active_version,
                    carried = repair.carried_events.len(),
                    appended = repair.new_events.len(),
                    "repaired subscription"
                );
            }
            self.notifier
                .publish_repair(w.conn, account_id, bundle_id, w.ctx, w.now);
            Ok(())
        })
    }

    // ─────────────────────────────────────────────────────────────────────
    // Bundle reads
    // ─────────────────────────────────────────────────────────────────────

    /// Bundle by id.
    pub fn get_bundle(&self, id: &BundleId, tenant: &TenantContext) -> Result<Option<BundleData>> {
        self.read(|conn, _| BundleRepo::get_by_id(conn, id, tenant))
    }

    /// Bundle by `(account, external key)`.
    pub fn get_bundle_for_account_and_key(
        &self,
        account_id: &AccountId,
        external_key: &str,
        tenant: &TenantContext,
    ) -> Result<Option<BundleData>> {
        self.read(|conn, _| {
            BundleRepo::get_by_account_and_key(conn, account_id, external_key, tenant)
        })
    }

    /// All bundles of an account.
    pub fn bundles_for_account(
        &self,
        account_id: &AccountId,
        tenant: &TenantContext,
    ) -> Result<Vec<BundleData>> {
        self.read(|conn, _| BundleRepo::list_for_account(conn, account_id, tenant))
    }

    /// All bundles using `external_key`, across the tenant's accounts.
    pub fn bundles_for_key(
        &self,
        external_key: &str,
        tenant: &TenantContext,
    ) -> Result<Vec<BundleData>> {
        self.read(|conn, _| BundleRepo::list_for_key(conn, external_key, tenant))
    }

    /// Owning account of a subscription, via its bundle.
    pub fn get_account_id_for_subscription(
        &self,
        id: &SubscriptionId,
        tenant: &TenantContext,
    ) -> Result<Option<AccountId>> {
        self.read(|conn, _| {
            let Some(data) = SubscriptionRepo::get_by_id(conn, id, tenant)? else {
                error!(subscription_id = %id, "no subscription found");
                return Ok(None);
            };
            let Some(bundle) = BundleRepo::get_by_id(conn, &data.bundle_id, tenant)? else {
                error!(
                    subscription_id = %id,
                    bundle_id = %data.bundle_id,
                    "no bundle found for subscription"
                );
                return Ok(None);
            };
            Ok(Some(bundle.account_id))
        })
    }

    // ─────────────────────────────────────────────────────────────────────
    // Subscription reads
    // ─────────────────────────────────────────────────────────────────────

    /// Every subscription of a bundle, base first.
    pub fn get_subscriptions(
        &self,
        bundle_id: &BundleId,
        tenant: &TenantContext,
    ) -> Result<Vec<Subscription>> {
        self.read(|conn, now| {
            let subs = SubscriptionRepo::list_for_bundle(conn, bundle_id, tenant)?;
            let timelines = load_timelines(conn, subs, tenant)?;
            self.assembler.build(bundle_id, timelines, now)
        })
    }

    /// Every subscription of the bundle `(account, external key)`; empty if
    /// there is no such bundle.
    pub fn subscriptions_for_account_and_key(
        &self,
        account_id: &AccountId,
        external_key: &str,
        tenant: &TenantContext,
    ) -> Result<Vec<Subscription>> {
        let bundle = self.get_bundle_for_account_and_key(account_id, external_key, tenant)?;
        let Some(bundle) = bundle else {
            return Ok(Vec::new());
        };
        self.get_subscriptions(&bundle.id, tenant)
    }

    /// One subscription. An add-on is rebuilt together with its base; an
    /// add-on without a base yields `None`.
    pub fn get_subscription(
        &self,
        id: &SubscriptionId,
        tenant: &TenantContext,
    ) -> Result<Option<Subscription>> {
        self.read(|conn, now| {
            let Some(data) = SubscriptionRepo::get_by_id(conn, id, tenant)? else {
                return Ok(None);
            };
            let bundle_id = data.bundle_id.clone();
            let mut input = Vec::with_capacity(2);
            if data.category == ProductCategory::AddOn {
                let Some(base) = find_base(conn, &bundle_id, tenant)? else {
                    error!(
                        subscription_id = %id,
                        bundle_id = %bundle_id,
                        "add-on has no base subscription"
                    );
                    return Ok(None);
                };
                input.push(base);
            }
            input.push(data);
            let timelines = load_timelines(conn, input, tenant)?;
            let rebuilt = self.assembler.build(&bundle_id, timelines, now)?;
            Ok(rebuilt.into_iter().find(|s| s.id() == id))
        })
    }

    /// The bundle's base subscription, if any.
    pub fn get_base_subscription(
        &self,
        bundle_id: &BundleId,
        tenant: &TenantContext,
    ) -> Result<Option<Subscription>> {
        self.read(|conn, now| {
            let Some(base) = find_base(conn, bundle_id, tenant)? else {
                return Ok(None);
            };
            let timelines = load_timelines(conn, vec![base], tenant)?;
            Ok(self.assembler.build(bundle_id, timelines, now)?.into_iter().next())
        })
    }

    // ─────────────────────────────────────────────────────────────────────
    // Event reads
    // ─────────────────────────────────────────────────────────────────────

    /// Event by id.
    pub fn get_event(
        &self,
        id: &EventId,
        tenant: &TenantContext,
    ) -> Result<Option<EntitlementEvent>> {
        self.read(|conn, _| EventRepo::get_by_id(conn, id, tenant))
    }

    /// Who appended an event, with the reason given at the time.
    pub fn get_event_audit(
        &self,
        id: &EventId,
        tenant: &TenantContext,
    ) -> Result<Option<EventAudit>> {
        self.read(|conn, _| EventRepo::audit(conn, id, tenant))
    }

    /// Full stored timeline of a subscription.
    pub fn events_for_subscription(
        &self,
        id: &SubscriptionId,
        tenant: &TenantContext,
    ) -> Result<Vec<EntitlementEvent>> {
        self.read(|conn, _| EventRepo::timeline(conn, id, tenant))
    }

    /// Stored timelines of every subscription in a bundle.
    pub fn events_for_bundle(
        &self,
        bundle_id: &BundleId,
        tenant: &TenantContext,
    ) -> Result<BTreeMap<SubscriptionId, Vec<EntitlementEvent>>> {
        self.read(|conn, _| {
            let mut grouped: BTreeMap<_, Vec<_>> =
                SubscriptionRepo::list_for_bundle(conn, bundle_id, tenant)?
                    .into_iter()
                    .map(|s| (s.id, Vec::new()))
                    .collect();
            for event in EventRepo::list_for_bundle(conn, bundle_id, tenant)? {
                if let Some(events) = grouped.get_mut(&event.subscription_id) {
                    events.push(event);
                }
            }
            Ok(grouped)
        })
    }

    /// Active events of a subscription still in the future.
    pub fn pending_events(
        &self,
        id: &SubscriptionId,
        tenant: &TenantContext,
    ) -> Result<Vec<EntitlementEvent>> {
        self.read(|conn, now| EventRepo::active_future(conn, id, now, tenant))
    }
}

fn check_events(data: &SubscriptionData, events: &[EntitlementEvent]) -> Result<()> {
    if events.is_empty() {
        return Err(EntitlementError::Validation(format!(
            "no events supplied for subscription {}",
            data.id
        )));
    }
    if let Some(stray) = events.iter().find(|e| e.subscription_id != data.id) {
        return Err(EntitlementError::Validation(format!(
            "event {} targets {}, not {}",
            stray.id, stray.subscription_id, data.id
        )));
    }
    Ok(())
}

/// One BASE per bundle, and no ADD_ON without a BASE.
fn check_bundle_shape(bundle_id: &BundleId, has_base: bool, data: &SubscriptionData) -> Result<()> {
    match data.category {
        ProductCategory::Base if has_base => Err(EntitlementError::InvariantViolation(format!(
            "bundle {bundle_id} already has a base subscription, rejecting {}",
            data.id
        ))),
        ProductCategory::AddOn if !has_base => Err(EntitlementError::Validation(format!(
            "add-on {} needs a base subscription in bundle {bundle_id}",
            data.id
        ))),
        _ => Ok(()),
    }
}

/// A repair targets `bundle_id`, moves to a newer version, and appends only
/// events stamped with that version.
fn check_repair(
    bundle_id: &BundleId,
    stored: &SubscriptionData,
    repair: &SubscriptionRepair,
) -> Result<()> {
    if &stored.bundle_id != bundle_id {
        return Err(EntitlementError::Validation(format!(
            "subscription {} is not in bundle {bundle_id}",
            repair.id
        )));
    }
    if repair.active_version <= stored.active_version {
        return Err(EntitlementError::Validation(format!(
            "repair of {} must move past version {}, got {}",
            repair.id, stored.active_version, repair.active_version
        )));
    }
    for event in &repair.new_events {
        if event.subscription_id != repair.id {
            return Err(EntitlementError::Validation(format!(
                "event {} targets {}, not {}",
                event.id, event.subscription_id, repair.id
            )));
        }
        if event.active_version != repair.active_version {
            return Err(EntitlementError::Validation(format!(
                "event {} is at version {}, repair writes version {}",
                event.id, event.active_version, repair.active_version
            )));
        }
    }
    Ok(())
}

fn carry_event(w: &WriteTx<'_>, event_id: &EventId, repair: &SubscriptionRepair) -> Result<()> {
    let stored = EventRepo::get_by_id(w.conn, event_id, w.tenant())?;
    match stored {
        Some(event) if event.subscription_id == repair.id => {
            let version = repair.active_version;
            let _ = EventRepo::update_version(w.conn, event_id, version, w.now, w.tenant())?;
            Ok(())
        }
        _ => Err(EntitlementError::Validation(format!(
            "event {event_id} is not on subscription {}",
            repair.id
        ))),
    }
}

/// At most one pending event per type on every touched subscription.
fn verify_pending_events(w: &WriteTx<'_>) -> Result<()> {
    for id in &w.touched {
        let mut counts: BTreeMap<EventType, usize> = BTreeMap::new();
        for event in EventRepo::active_future(w.conn, id, w.now, w.tenant())? {
            *counts.entry(event.event_type()).or_default() += 1;
        }
        if let Some((event_type, count)) = counts.into_iter().find(|(_, n)| *n > 1) {
            return Err(EntitlementError::InvariantViolation(format!(
                "subscription {id} has {count} pending {event_type} events"
            )));
        }
    }
    Ok(())
}

fn find_base(
    conn: &Connection,
    bundle_id: &BundleId,
    tenant: &TenantContext,
) -> Result<Option<SubscriptionData>> {
    Ok(SubscriptionRepo::list_for_bundle(conn, bundle_id, tenant)?
        .into_iter()
        .find(|s| s.category == ProductCategory::Base))
}

fn load_timelines(
    conn: &Connection,
    subs: Vec<SubscriptionData>,
    tenant: &TenantContext,
) -> Result<Vec<SubscriptionTimeline>> {
    subs.into_iter()
        .map(|data| {
            let events = EventRepo::timeline(conn, &data.id, tenant)?;
            Ok(SubscriptionTimeline { data, events })
        })
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
