//! Storage layer
//!
//! SQLite is the single source of truth: entity tables, the change log,
//! tombstones, and sync bookkeeping all live in one database so that a
//! mutation and its change record commit in the same transaction.

pub mod database;
pub mod error;
pub mod schema;

pub use database::{open_file, open_memory};
pub use error::{StorageError, StorageResult};
pub use schema::{init_schema, needs_init, SCHEMA_VERSION};
