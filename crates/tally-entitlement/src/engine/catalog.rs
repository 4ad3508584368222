//! Add-on availability rules consumed from the product catalog.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

/// Availability predicates for add-on plans relative to a base plan.
pub trait Catalog: Send + Sync {
    /// Whether `addon_plan` may be bought on top of `base_plan` at `effective_date`.
    fn is_addon_available(
        &self,
        base_plan: &str,
        effective_date: DateTime<Utc>,
        addon_plan: &str,
    ) -> bool;

    /// Whether `base_plan` already includes `addon_plan` at `effective_date`.
    fn is_addon_included(
        &self,
        base_plan: &str,
        effective_date: DateTime<Utc>,
        addon_plan: &str,
    ) -> bool;
}

/// Catalog backed by fixed availability and inclusion tables.
///
/// Ignores the effective date: the tables hold for every instant.
#[derive(Clone, Debug, Default)]
pub struct StaticCatalog {
    available: HashMap<String, HashSet<String>>,
    included: HashMap<String, HashSet<String>>,
}

impl StaticCatalog {
    /// Empty catalog: no add-on is available or included anywhere.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `addon_plan` purchasable on `base_plan`.
    #[must_use]
    pub fn with_available(mut self, base_plan: &str, addon_plan: &str) -> Self {
        let _ = self
            .available
            .entry(base_plan.to_owned())
            .or_default()
            .insert(addon_plan.to_owned());
        self
    }

    /// Make `addon_plan` part of `base_plan`.
    #[must_use]
    pub fn with_included(mut self, base_plan: &str, addon_plan: &str) -> Self {
        let _ = self
            .included
            .entry(base_plan.to_owned())
            .or_default()
            .insert(addon_plan.to_owned());
        self
    }

    fn contains(
        table: &HashMap<String, HashSet<String>>,
        base_plan: &str,
        addon_plan: &str,
    ) -> bool {
        table
            .get(base_plan)
            .is_some_and(|addons| addons.contains(addon_plan))
    }
}

impl Catalog for StaticCatalog {
    fn is_addon_available(
        &self,
        base_plan: &str,
        _effective_date: DateTime<Utc>,
        addon_plan: &str,
    ) -> bool {
        Self::contains(&self.available, base_plan, addon_plan)
    }

    fn is_addon_included(
        &self,
        base_plan: &str,
        _effective_date: DateTime<Utc>,
        addon_plan: &str,
    ) -> bool {
        Self::contains(&self.included, base_plan, addon_plan)
    }
}
