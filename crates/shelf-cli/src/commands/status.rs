//! Status command handler

use anyhow::Result;

use shelf_core::RecordStore;

use crate::output::{Output, OutputFormat};

/// Show status information
pub fn show(store: &RecordStore, output: &Output) -> Result<()> {
    let config = store.config();
    let pending = store.change_log_len().unwrap_or(0);

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "replica_id": store.replica_id(),
                    "sync_enabled": config.sync_enabled,
                    "remote_path": config.remote_path,
                    "pending_changes": pending,
                    "last_acked": store.last_acked().unwrap_or(0),
                    "counts": {
                        "tags": store.tag_count().unwrap_or(0),
                        "resources": store.resource_count().unwrap_or(0)
                    }
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", store.replica_id());
        }
        OutputFormat::Human => {
            println!("Shelf Status");
            println!("============");
            println!();
            println!("Replica:");
            println!("  ID: {}", store.replica_id());
            println!();
            println!("Sync:");
            println!(
                "  Status: {}",
                if config.sync_enabled {
                    "enabled"
                } else {
                    "disabled"
                }
            );
            if let Some(ref path) = config.remote_path {
                println!("  Remote: {}", path.display());
            }
            println!("  Pending changes: {}", pending);
            println!();
            println!("Storage:");
            println!("  Location: {}", config.data_dir.display());
            println!();
            println!("Contents:");
            println!("  Tags:      {}", store.tag_count().unwrap_or(0));
            println!("  Resources: {}", store.resource_count().unwrap_or(0));
        }
    }

    Ok(())
}
