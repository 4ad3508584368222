//! Transactional entitlement store.
//!
//! [`TransactionCoordinator`] is the public write/read API. It drives the
//! [`NotificationScheduler`] and [`ChangeNotifier`] inside its transactions;
//! both reach their backends through the [`NotificationQueue`] and
//! [`EventBus`] traits so embedders can plug in other transports.

mod coordinator;
pub mod notifier;
pub mod scheduler;

pub use coordinator::TransactionCoordinator;
pub use notifier::{ChangeNotifier, EventBus, SqliteOutboxBus};
pub use scheduler::{NotificationQueue, NotificationScheduler, SqliteNotificationQueue};
