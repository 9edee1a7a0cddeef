//! Remote replica interface
//!
//! The sync engine talks to the remote through the [`RemoteReplica`] trait,
//! keeping transport concerns (HTTP, files, test doubles) out of the engine.
//! The remote is a dumb ordered log: it stores change records per origin and
//! hands them back to everyone else. All conflict resolution happens on the
//! replicas.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::changelog::ChangeRecord;

/// Errors surfaced by remote operations
#[derive(Error, Debug, Clone)]
pub enum RemoteError {
    /// Transport failure; worth retrying
    #[error("Network error: {0}")]
    Network(String),

    /// The remote did not answer in time; worth retrying
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Credentials rejected; retrying without new credentials is pointless
    #[error("Authentication failed: {0}")]
    Auth(String),
}

impl RemoteError {
    pub fn is_retryable(&self) -> bool {
        match self {
            RemoteError::Network(_) | RemoteError::Timeout(_) => true,
            RemoteError::Auth(_) => false,
        }
    }
}

/// Opaque position in the remote log
///
/// Replicas persist it between cycles and never interpret it beyond
/// equality and handing it back.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct RemoteCursor(pub u64);

impl std::fmt::Display for RemoteCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RemoteCursor {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(RemoteCursor(s.parse()?))
    }
}

/// A change record annotated with the replica that produced it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteChange {
    pub origin: Uuid,
    pub record: ChangeRecord,
}

/// One page of remote changes plus the cursor to resume from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullResponse {
    pub changes: Vec<RemoteChange>,
    pub cursor: RemoteCursor,
}

/// A remote change store
///
/// Implementations must be idempotent on push: re-sending an
/// already-acknowledged batch (after a lost ack) stores nothing twice.
#[async_trait]
pub trait RemoteReplica: Send + Sync {
    /// Upload a batch of local changes
    ///
    /// Returns the highest sequence number the remote now holds for
    /// `origin`; everything at or below it may be pruned locally.
    async fn push(&self, origin: Uuid, batch: &[ChangeRecord]) -> Result<u64, RemoteError>;

    /// Download changes appended since `cursor`
    ///
    /// Changes produced by `origin` itself are filtered out, so a replica
    /// never receives its own pushes back.
    async fn pull(&self, origin: Uuid, cursor: RemoteCursor) -> Result<PullResponse, RemoteError>;
}

// ==================== In-Memory Remote ====================

#[derive(Debug, Default)]
struct InMemoryInner {
    log: Vec<RemoteChange>,
    acked: HashMap<Uuid, u64>,
    auth_valid: bool,
    fail_pushes: u32,
    fail_pulls: u32,
}

/// In-process remote for tests and previews
///
/// Clones share the same log, so one instance can serve several stores.
#[derive(Debug, Clone)]
pub struct InMemoryRemote {
    inner: Arc<Mutex<InMemoryInner>>,
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(InMemoryInner {
                auth_valid: true,
                ..InMemoryInner::default()
            })),
        }
    }

    /// Seed a change as if another replica had pushed it
    pub fn inject(&self, origin: Uuid, record: ChangeRecord) {
        let mut inner = self.inner.lock().unwrap();
        let acked = inner.acked.entry(origin).or_insert(0);
        *acked = (*acked).max(record.sequence);
        inner.log.push(RemoteChange { origin, record });
    }

    /// Toggle whether credentials are accepted
    pub fn set_auth_valid(&self, valid: bool) {
        self.inner.lock().unwrap().auth_valid = valid;
    }

    /// Make the next `n` pushes fail with a network error
    pub fn fail_next_pushes(&self, n: u32) {
        self.inner.lock().unwrap().fail_pushes = n;
    }

    /// Make the next `n` pulls fail with a network error
    pub fn fail_next_pulls(&self, n: u32) {
        self.inner.lock().unwrap().fail_pulls = n;
    }

    /// Number of changes the remote holds
    pub fn change_count(&self) -> usize {
        self.inner.lock().unwrap().log.len()
    }
}

impl Default for InMemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteReplica for InMemoryRemote {
    async fn push(&self, origin: Uuid, batch: &[ChangeRecord]) -> Result<u64, RemoteError> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.auth_valid {
            return Err(RemoteError::Auth("invalid credentials".into()));
        }
        if inner.fail_pushes > 0 {
            inner.fail_pushes -= 1;
            return Err(RemoteError::Network("connection reset".into()));
        }

        let mut acked = inner.acked.get(&origin).copied().unwrap_or(0);
        for record in batch {
            // Idempotence: a re-sent batch after a lost ack stores nothing twice
            if record.sequence <= acked {
                continue;
            }
            acked = record.sequence;
            inner.log.push(RemoteChange {
                origin,
                record: record.clone(),
            });
        }
        inner.acked.insert(origin, acked);
        Ok(acked)
    }

    async fn pull(&self, origin: Uuid, cursor: RemoteCursor) -> Result<PullResponse, RemoteError> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.auth_valid {
            return Err(RemoteError::Auth("invalid credentials".into()));
        }
        if inner.fail_pulls > 0 {
            inner.fail_pulls -= 1;
            return Err(RemoteError::Network("connection reset".into()));
        }

        let start = (cursor.0 as usize).min(inner.log.len());
        let changes = inner.log[start..]
            .iter()
            .filter(|c| c.origin != origin)
            .cloned()
            .collect();

        Ok(PullResponse {
            changes,
            cursor: RemoteCursor(inner.log.len() as u64),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changelog::ChangeOp;
    use crate::models::EntityKind;
    use chrono::Utc;

    fn record(sequence: u64) -> ChangeRecord {
        ChangeRecord {
            sequence,
            entity_id: Uuid::new_v4(),
            entity_kind: EntityKind::Resource,
            op: ChangeOp::Create,
            payload: None,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_push_then_pull_excludes_own_origin() {
        let remote = InMemoryRemote::new();
        let me = Uuid::new_v4();
        let other = Uuid::new_v4();

        remote.push(me, &[record(1), record(2)]).await.unwrap();

        // My own changes never come back
        let response = remote.pull(me, RemoteCursor::default()).await.unwrap();
        assert!(response.changes.is_empty());
        assert_eq!(response.cursor, RemoteCursor(2));

        // Another replica sees them
        let response = remote.pull(other, RemoteCursor::default()).await.unwrap();
        assert_eq!(response.changes.len(), 2);
    }

    #[tokio::test]
    async fn test_push_is_idempotent_after_lost_ack() {
        let remote = InMemoryRemote::new();
        let me = Uuid::new_v4();

        let batch = vec![record(1), record(2)];
        assert_eq!(remote.push(me, &batch).await.unwrap(), 2);
        // Re-sending the same batch stores nothing new
        assert_eq!(remote.push(me, &batch).await.unwrap(), 2);
        assert_eq!(remote.change_count(), 2);
    }

    #[tokio::test]
    async fn test_pull_resumes_from_cursor() {
        let remote = InMemoryRemote::new();
        let me = Uuid::new_v4();
        let other = Uuid::new_v4();

        remote.push(other, &[record(1)]).await.unwrap();
        let first = remote.pull(me, RemoteCursor::default()).await.unwrap();
        assert_eq!(first.changes.len(), 1);

        remote.push(other, &[record(2)]).await.unwrap();
        let second = remote.pull(me, first.cursor).await.unwrap();
        assert_eq!(second.changes.len(), 1);
        assert_eq!(second.changes[0].record.sequence, 2);
    }

    #[tokio::test]
    async fn test_auth_failure() {
        let remote = InMemoryRemote::new();
        remote.set_auth_valid(false);

        let err = remote.push(Uuid::new_v4(), &[record(1)]).await.unwrap_err();
        assert!(matches!(err, RemoteError::Auth(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_injected_failures_are_transient() {
        let remote = InMemoryRemote::new();
        let me = Uuid::new_v4();
        remote.fail_next_pushes(1);

        let err = remote.push(me, &[record(1)]).await.unwrap_err();
        assert!(err.is_retryable());

        remote.push(me, &[record(1)]).await.unwrap();
        assert_eq!(remote.change_count(), 1);
    }

    #[test]
    fn test_cursor_round_trip() {
        let cursor = RemoteCursor(42);
        let text = cursor.to_string();
        assert_eq!(text.parse::<RemoteCursor>().unwrap(), cursor);
    }
}
