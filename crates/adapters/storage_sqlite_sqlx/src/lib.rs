//! # itemhub-adapter-storage-sqlite-sqlx
//!
//! `SQLite` persistence adapter using [sqlx](https://docs.rs/sqlx).
//!
//! ## Responsibilities
//! - Implement the `SnapshotStore` port defined in `itemhub-app::ports`
//! - Manage `SQLite` connection pool lifecycle
//! - Run database migrations (using sqlx embedded migrations)
//! - Map between persisted item records and database rows
//!
//! ## Dependency rule
//! Depends on `itemhub-app` (for port traits) and `itemhub-domain` (for domain types).
//! The `app` and `domain` crates must never reference this adapter.

mod error;
mod pool;
mod snapshot_store;

pub use error::StorageError;
pub use pool::{Config, Database};
pub use snapshot_store::SqliteSnapshotStore;
