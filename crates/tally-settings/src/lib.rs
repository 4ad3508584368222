//! # tally-settings
//!
//! Configuration for the tally entitlement engine.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`TallySettings::default()`]
//! 2. **User file**: `~/.tally/settings.json`, deep-merged over defaults
//! 3. **Environment variables**: `TALLY_*` overrides (highest priority)
//!
//! There is no global instance. Embedders load once and hand the relevant
//! sections to the storage and scheduling layers.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, deep_merge, load_settings, load_settings_from_path, settings_path,
};
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn re_exports_work() {
        let _settings = TallySettings::default();
        let path = settings_path();
        assert!(path.ends_with(".tally/settings.json"));
    }

    #[test]
    fn default_settings_are_valid() {
        let settings = TallySettings::default();
        assert_eq!(settings.storage.database_path, "tally.db");
        assert_eq!(settings.storage.pool_size, 4);
        assert_eq!(settings.logging.level, "info");
        assert_eq!(settings.notifications.queue_name, "next-billing-date-queue");
        settings.validate().unwrap();
    }
}
