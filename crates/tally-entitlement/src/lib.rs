//! # tally-entitlement
//!
//! Event-sourced subscription entitlement timelines with a `SQLite` backend.
//!
//! - **Event model**: closed [`EventPayload`] union over CREATE, RECREATE, PHASE,
//!   PLAN_CHANGE, CANCEL, UNCANCEL and MIGRATE
//! - **Event store**: append-only `rusqlite` repositories with an `r2d2` pool and
//!   version-tracked migrations
//! - **Replay**: pure, deterministic fold of a timeline into a [`Subscription`] view
//! - **Bundle assembly**: base-first ordering and synthetic add-on cancels derived
//!   from the base plan's pending cancel or plan change
//! - **Scheduling and notification**: future wake-ups and outbox messages written in
//!   the same transaction as the events they describe
//! - **Coordinator**: atomic create, cancel, uncancel, change plan, migrate, transfer
//!   and repair operations, plus tenant-scoped reads

#![deny(unsafe_code)]

pub mod engine;
pub mod errors;
pub mod factory;
pub mod sqlite;
pub mod store;
pub mod types;

pub use engine::{
    BundleAssembler, Catalog, StaticCatalog, SubscriptionTimeline, replay, replay_with_overlay,
};
pub use errors::{BusError, EntitlementError, QueueError, Result};
pub use factory::EventFactory;
pub use store::{
    ChangeNotifier, EventBus, NotificationQueue, NotificationScheduler, SqliteNotificationQueue,
    SqliteOutboxBus, TransactionCoordinator,
};
pub use types::{
    AccountMigration, BundleData, BundleMigration, BusEvent, EntitlementEvent, EventPayload,
    EventType, MigrationReport, NotificationKey, ProductCategory, Subscription, SubscriptionData,
    SubscriptionMigration, SubscriptionRepair, SubscriptionStatus, Transition, TransferCancel,
};
