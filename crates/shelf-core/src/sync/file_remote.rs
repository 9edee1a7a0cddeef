//! File-backed remote replica
//!
//! Stores the remote log as a single JSON file, typically on a shared or
//! synced folder (NFS, Syncthing, a USB drive). Writes go through a temp
//! file and rename, so readers never observe a half-written log.
//!
//! One writer at a time; concurrent pushes from different machines need a
//! real server remote instead.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::remote::{PullResponse, RemoteChange, RemoteCursor, RemoteError, RemoteReplica};
use crate::changelog::ChangeRecord;

#[derive(Debug, Default, Serialize, Deserialize)]
struct FileState {
    log: Vec<RemoteChange>,
    acked: HashMap<Uuid, u64>,
}

/// JSON-file remote log
#[derive(Debug, Clone)]
pub struct FileRemote {
    path: PathBuf,
}

impl FileRemote {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    fn load(&self) -> Result<FileState, RemoteError> {
        if !self.path.exists() {
            return Ok(FileState::default());
        }
        let content = std::fs::read_to_string(&self.path)
            .map_err(|e| RemoteError::Network(format!("read {:?}: {e}", self.path)))?;
        serde_json::from_str(&content)
            .map_err(|e| RemoteError::Network(format!("parse {:?}: {e}", self.path)))
    }

    fn save(&self, state: &FileState) -> Result<(), RemoteError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| RemoteError::Network(format!("create {:?}: {e}", parent)))?;
        }

        let content = serde_json::to_string(state)
            .map_err(|e| RemoteError::Network(format!("encode remote log: {e}")))?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, content)
            .map_err(|e| RemoteError::Network(format!("write {:?}: {e}", tmp)))?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| RemoteError::Network(format!("rename {:?}: {e}", tmp)))?;
        Ok(())
    }
}

#[async_trait]
impl RemoteReplica for FileRemote {
    async fn push(&self, origin: Uuid, batch: &[ChangeRecord]) -> Result<u64, RemoteError> {
        let mut state = self.load()?;

        let mut acked = state.acked.get(&origin).copied().unwrap_or(0);
        for record in batch {
            if record.sequence <= acked {
                continue;
            }
            acked = record.sequence;
            state.log.push(RemoteChange {
                origin,
                record: record.clone(),
            });
        }
        state.acked.insert(origin, acked);

        self.save(&state)?;
        Ok(acked)
    }

    async fn pull(&self, origin: Uuid, cursor: RemoteCursor) -> Result<PullResponse, RemoteError> {
        let state = self.load()?;

        let start = (cursor.0 as usize).min(state.log.len());
        let changes = state.log[start..]
            .iter()
            .filter(|c| c.origin != origin)
            .cloned()
            .collect();

        Ok(PullResponse {
            changes,
            cursor: RemoteCursor(state.log.len() as u64),
        })
    }
}
