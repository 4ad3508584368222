//! Settings type definitions.
//!
//! Field names are camelCase on the wire. Every section is `#[serde(default)]`,
//! so a partial JSON file only needs the keys it overrides.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings for the tally engine.
///
/// ```json
/// {
///   "storage": { "databasePath": "/var/lib/tally/tally.db", "poolSize": 8 },
///   "notifications": { "queueName": "next-billing-date-queue" }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TallySettings {
    /// SQLite storage and connection pool.
    pub storage: StorageSettings,
    /// Log filtering.
    pub logging: LoggingSettings,
    /// Labels for scheduled future activations.
    pub notifications: NotificationSettings,
}

impl TallySettings {
    /// Reject values the storage layer cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.storage.database_path.trim().is_empty() {
            return Err(SettingsError::InvalidValue(
                "storage.databasePath must not be empty".into(),
            ));
        }
        if self.storage.pool_size == 0 {
            return Err(SettingsError::InvalidValue(
                "storage.poolSize must be at least 1".into(),
            ));
        }
        if self.notifications.queue_name.trim().is_empty() {
            return Err(SettingsError::InvalidValue(
                "notifications.queueName must not be empty".into(),
            ));
        }
        Ok(())
    }
}

/// SQLite storage settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageSettings {
    /// Database file path, or `:memory:`.
    pub database_path: String,
    /// Maximum pooled connections.
    pub pool_size: u32,
    /// Busy timeout for lock contention, in milliseconds.
    pub busy_timeout_ms: u64,
    /// Page cache size in KiB.
    pub cache_size_kib: i64,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            database_path: "tally.db".to_string(),
            pool_size: 4,
            busy_timeout_ms: 5000,
            cache_size_kib: 16_384,
        }
    }
}

/// Logging settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive (`RUST_LOG` takes precedence).
    pub level: String,
    /// Emit JSON lines instead of the compact human format.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Labels attached to every scheduled future activation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NotificationSettings {
    /// Owning service name.
    pub service_name: String,
    /// Queue the activation processor polls.
    pub queue_name: String,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            service_name: "entitlement-service".to_string(),
            queue_name: "next-billing-date-queue".to_string(),
        }
    }
}
