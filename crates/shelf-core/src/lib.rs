//! Shelf Core Library
//!
//! This crate provides the core functionality for Shelf, a local-first
//! tag-and-resource organizer with optional background sync.
//!
//! # Architecture
//!
//! - **SQLite**: Single source of truth for entities, the change log,
//!   tombstones, and sync bookkeeping
//! - **Change log**: Every local mutation appends a change record in the
//!   same transaction; the sync engine replicates the log
//! - **Last-writer-wins**: Remote changes are reconciled by timestamp,
//!   with tombstones shielding deleted entities from stale updates
//!
//! # Quick Start
//!
//! ```text
//! let mut store = RecordStore::open(Config::load()?)?;
//!
//! // Add data
//! let tag = store.create_tag("rust")?;
//! let resource = store.create_resource("Notes", "body", &[tag.id])?;
//!
//! // Query resources
//! let recent = query::apply(&Filter::recent(), &store.list_resources()?);
//! ```
//!
//! # Modules
//!
//! - `store`: Unified record store (main entry point)
//! - `models`: Data structures for tags, resources, and tombstones
//! - `changelog`: Append-only change log and cursors
//! - `query`: Named filters over resources
//! - `sync`: Push/pull/reconcile engine and remote replicas
//! - `storage`: SQLite schema and connection handling
//! - `config`: Application configuration

pub mod changelog;
pub mod config;
pub mod error;
pub mod models;
pub mod query;
pub mod storage;
pub mod store;
pub mod sync;

pub use changelog::{ChangeCursor, ChangeOp, ChangeRecord};
pub use config::{Config, SyncSettings};
pub use error::{StoreError, StoreResult};
pub use models::{EntityKind, Resource, Tag, Tombstone};
pub use query::Filter;
pub use storage::{StorageError, StorageResult};
pub use store::{EntityEvent, RecordStore, ResourcePatch, TagPatch};
pub use sync::{
    FileRemote, InMemoryRemote, RemoteError, RemoteReplica, SyncEngine, SyncError, SyncReport,
    SyncState,
};
