//! Pure state derivation: timeline replay, catalog rules and bundle assembly.

pub mod assembler;
pub mod catalog;
pub mod replay;

pub use assembler::{BundleAssembler, SubscriptionTimeline};
pub use catalog::{Catalog, StaticCatalog};
pub use replay::{replay, replay_with_overlay};
