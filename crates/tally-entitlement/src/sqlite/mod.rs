//! `SQLite` backend for the entitlement store.
//!
//! - **[`connection`]**: `r2d2` pool with WAL, foreign keys and busy-timeout
//!   pragmas on every connection.
//! - **[`migrations`]**: embedded, version-tracked schema.
//! - **[`row_types`]**: column conversions (millisecond instants, enum text).
//! - **[`repositories`]**: stateless repositories taking `&Connection`.

pub mod connection;
pub mod migrations;
pub mod repositories;
pub mod row_types;

pub use connection::{
    ConnectionConfig, ConnectionPool, MEMORY_PATH, PooledConnection, new_file, new_in_memory,
    open,
};
pub use migrations::{current_version, latest_version, run_migrations};
