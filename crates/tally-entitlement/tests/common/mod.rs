//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use tally_core::{AccountId, CallContext, Clock, ClockMock, TenantContext};
use tally_entitlement::sqlite::{self, ConnectionConfig, ConnectionPool};
use tally_entitlement::{
    BundleData, EntitlementEvent, EventBus, EventFactory, NotificationQueue, ProductCategory,
    SqliteNotificationQueue, SqliteOutboxBus, StaticCatalog, SubscriptionData,
    TransactionCoordinator,
};
use tally_settings::NotificationSettings;
use tempfile::TempDir;

pub const QUEUE: &str = "next-billing-date-queue";

pub fn at(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, 0, 0, 0).unwrap()
}

pub fn ctx() -> CallContext {
    CallContext::new(TenantContext::new(1, 10), "integration")
}

pub fn tenant() -> TenantContext {
    TenantContext::new(1, 10)
}

/// `storage` is purchasable on silver and platinum and part of gold.
pub fn catalog() -> StaticCatalog {
    StaticCatalog::new()
        .with_available("silver", "storage")
        .with_available("platinum", "storage")
        .with_available("gold", "storage")
        .with_included("gold", "storage")
}

pub struct Harness {
    pub coordinator: TransactionCoordinator,
    pub clock: Arc<ClockMock>,
    _dir: Option<TempDir>,
}

impl Harness {
    /// In-memory store with the `SQLite` queue and outbox, clock at 2021-01-01.
    pub fn in_memory() -> Self {
        Self::build(memory_pool(), None, None, None)
    }

    /// File-backed store in a temporary directory.
    pub fn on_disk() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tally.db");
        let config = ConnectionConfig {
            pool_size: 4,
            ..ConnectionConfig::default()
        };
        let pool = sqlite::new_file(path.to_str().unwrap(), &config).unwrap();
        migrate(&pool);
        Self::build(pool, None, None, Some(dir))
    }

    /// In-memory store with custom queue and/or bus backends.
    pub fn with_backends(
        queue: Option<Arc<dyn NotificationQueue>>,
        bus: Option<Arc<dyn EventBus>>,
    ) -> Self {
        Self::build(memory_pool(), queue, bus, None)
    }

    fn build(
        pool: ConnectionPool,
        queue: Option<Arc<dyn NotificationQueue>>,
        bus: Option<Arc<dyn EventBus>>,
        dir: Option<TempDir>,
    ) -> Self {
        let clock = Arc::new(ClockMock::new(at(2021, 1, 1)));
        let queue = queue.unwrap_or_else(|| {
            Arc::new(SqliteNotificationQueue::from_settings(&NotificationSettings::default()))
        });
        let bus = bus.unwrap_or_else(|| Arc::new(SqliteOutboxBus));
        let coordinator =
            TransactionCoordinator::new(pool, clock.clone(), Arc::new(catalog()), queue, bus);
        Self {
            coordinator,
            clock,
            _dir: dir,
        }
    }

    pub fn factory(&self, data: &SubscriptionData) -> EventFactory {
        EventFactory::new(data, self.clock.clone())
    }

    pub fn bundle(&self, account: &str, key: &str) -> BundleData {
        let bundle = BundleData::new(AccountId::from(account), key, self.clock.utc_now());
        self.coordinator.create_bundle(&bundle, &ctx()).unwrap();
        bundle
    }

    /// Subscription created with `events(factory)` as its initial timeline.
    pub fn subscription(
        &self,
        bundle: &BundleData,
        category: ProductCategory,
        events: impl FnOnce(&EventFactory) -> Vec<EntitlementEvent>,
    ) -> SubscriptionData {
        let start = bundle.start_date;
        let data = SubscriptionData::new(bundle.id.clone(), category, start, start);
        let initial = events(&self.factory(&data));
        self.coordinator.create_subscription(&data, &initial, &ctx()).unwrap();
        data
    }
}

fn memory_pool() -> ConnectionPool {
    let pool = sqlite::new_in_memory(&ConnectionConfig::default()).unwrap();
    migrate(&pool);
    pool
}

fn migrate(pool: &ConnectionPool) {
    let conn = pool.get().unwrap();
    let _ = sqlite::run_migrations(&conn).unwrap();
}
