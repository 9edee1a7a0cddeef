//! Sync command handler

use std::sync::Arc;

use anyhow::{bail, Result};
use tokio::sync::Mutex;

use shelf_core::{FileRemote, RecordStore, SyncEngine};

use crate::output::Output;

/// Run one sync cycle against the configured remote
///
/// Takes the store by value: the engine needs shared ownership for the
/// duration of the cycle. The store is returned when the cycle is done.
pub async fn sync(store: RecordStore, output: &Output) -> Result<RecordStore> {
    let config = store.config().clone();

    if !config.sync_enabled {
        bail!(
            "Sync is not enabled. Enable it with:\n  \
             shelf config set sync_enabled true\n  \
             shelf config set remote_path /path/to/remote.json"
        );
    }

    let Some(ref remote_path) = config.remote_path else {
        bail!(
            "Remote path not configured. Set it with:\n  \
             shelf config set remote_path /path/to/remote.json"
        );
    };

    output.message(&format!("Syncing with {}...", remote_path.display()));

    let shared = Arc::new(Mutex::new(store));
    let remote = FileRemote::new(remote_path.clone());
    let mut engine = SyncEngine::new(shared.clone(), remote, config.sync.clone());

    let result = engine.sync_once().await;
    drop(engine);

    // The engine holds no other clones once dropped
    let store = Arc::try_unwrap(shared)
        .map_err(|_| anyhow::anyhow!("sync engine still holds the store"))?
        .into_inner();

    match result {
        Ok(report) => {
            output.print_sync_report(&report);
            Ok(store)
        }
        Err(e) => Err(e.into()),
    }
}
