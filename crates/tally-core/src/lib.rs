//! # tally-core
//!
//! Foundation types shared by every tally crate:
//!
//! - **Branded IDs**: `AccountId`, `BundleId`, `SubscriptionId`, `EventId` as newtypes
//! - **Clock**: the [`Clock`] capability injected wherever "now" matters, with a
//!   controllable [`ClockMock`] for tests
//! - **Context**: [`TenantContext`] and [`CallContext`] scoping every read and write
//! - **Logging**: `tracing` subscriber setup and a log-capture layer for tests

#![deny(unsafe_code)]

pub mod clock;
pub mod context;
pub mod ids;
pub mod logging;

pub use clock::{Clock, ClockMock, SystemClock};
pub use context::{CallContext, TenantContext};
pub use ids::{AccountId, BundleId, EventId, SubscriptionId};
