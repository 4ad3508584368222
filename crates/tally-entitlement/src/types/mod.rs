//! Entitlement domain types.
//!
//! - [`EventType`] / [`EventPayload`] / [`EntitlementEvent`]: the closed event model
//! - [`BundleData`] / [`SubscriptionData`]: the only stored entity state
//! - [`Subscription`]: the view rebuilt from a timeline
//! - [`NotificationKey`] / [`BusEvent`]: scheduling and change-notification payloads
//! - migration, transfer and repair inputs

mod bundle;
mod event;
mod event_type;
mod migration;
mod notification;
mod subscription;

pub use bundle::BundleData;
pub use event::{EntitlementEvent, EventPayload};
pub use event_type::{ALL_EVENT_TYPES, EventType};
pub use migration::{
    AccountMigration, BundleMigration, MigrationReport, SubscriptionMigration, SubscriptionRepair,
    TransferCancel,
};
pub use notification::{BusEvent, NotificationKey};
pub use subscription::{
    ProductCategory, Subscription, SubscriptionData, SubscriptionStatus, Transition,
};
