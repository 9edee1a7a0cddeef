//! Sync engine for remote replication
//!
//! Replicates the local change log to a remote replica and applies remote
//! changes back, converging all replicas on the same records.
//!
//! ## Protocol
//!
//! 1. Push unacknowledged change records, oldest first
//! 2. Pull remote changes past the persisted cursor
//! 3. Reconcile with last-writer-wins (ties go to the remote)
//!
//! ## Usage
//!
//! ```ignore
//! let engine = SyncEngine::new(store, FileRemote::new(path), settings);
//! let report = engine.sync_once().await?;
//! ```

mod backoff;
mod engine;
mod file_remote;
mod remote;
mod state;

pub use backoff::Backoff;
pub use engine::{SyncEngine, SyncError, SyncReport};
pub use file_remote::FileRemote;
pub use remote::{InMemoryRemote, PullResponse, RemoteChange, RemoteCursor, RemoteError, RemoteReplica};
pub use state::SyncState;
