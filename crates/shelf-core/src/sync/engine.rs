//! Sync engine
//!
//! Drives the push/pull/reconcile cycle against a [`RemoteReplica`] and
//! publishes its state over a watch channel.
//!
//! ## Cycle
//!
//! 1. **Push**: unacknowledged change records go up in batches; each ack
//!    advances the prune point. Changes appended after the cycle started
//!    wait for the next cycle.
//! 2. **Pull**: fetch remote changes past the persisted cursor.
//! 3. **Reconcile**: apply each remote change under last-writer-wins.
//!    Equal timestamps resolve in favor of the remote, so both replicas
//!    converge on the same value regardless of who syncs first.
//!
//! Deleted entities are shielded by tombstones: a remote change at or
//! before the deletion time is stale and dropped; a strictly newer update
//! resurrects the entity (configurable). Errors never poison the store:
//! a failed cycle leaves local data intact and the engine retries with
//! jittered backoff.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use uuid::Uuid;

use super::backoff::Backoff;
use super::remote::{RemoteChange, RemoteCursor, RemoteError, RemoteReplica};
use super::state::SyncState;
use crate::changelog::{ChangeCursor, ChangeOp};
use crate::config::SyncSettings;
use crate::error::StoreError;
use crate::models::{EntityKind, Resource, Tag};
use crate::store::RecordStore;

/// Sync metadata key: position in the remote log
const META_REMOTE_CURSOR: &str = "remote_cursor";

/// Errors surfaced by a sync cycle
#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SyncError {
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Remote(e) => e.is_retryable(),
            SyncError::Store(_) => false,
        }
    }
}

/// What one sync cycle accomplished
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Change records uploaded
    pub pushed: usize,
    /// Remote changes fetched
    pub pulled: usize,
    /// Remote changes applied locally
    pub applied: usize,
    /// Remote changes dropped as stale (lost to local state or a tombstone)
    pub stale: usize,
}

/// Push/pull/reconcile engine over a remote replica
pub struct SyncEngine<R: RemoteReplica> {
    store: Arc<Mutex<RecordStore>>,
    remote: R,
    settings: SyncSettings,
    state_tx: watch::Sender<SyncState>,
    backoff: Backoff,
}

impl<R: RemoteReplica> SyncEngine<R> {
    pub fn new(store: Arc<Mutex<RecordStore>>, remote: R, settings: SyncSettings) -> Self {
        let (state_tx, _) = watch::channel(SyncState::Idle);
        let backoff = Backoff::new(settings.backoff_base(), settings.backoff_cap());
        Self {
            store,
            remote,
            settings,
            state_tx,
            backoff,
        }
    }

    /// Watch the engine's state transitions
    pub fn watch_state(&self) -> watch::Receiver<SyncState> {
        self.state_tx.subscribe()
    }

    /// Current state
    pub fn state(&self) -> SyncState {
        *self.state_tx.borrow()
    }

    /// Lift a suspension caused by an authentication failure
    pub fn resume(&mut self) {
        if self.state() == SyncState::Suspended {
            self.backoff.reset();
            self.set_state(SyncState::Idle);
        }
    }

    fn set_state(&self, state: SyncState) {
        // send_replace updates the value even with no receivers; the engine
        // reads its own state back through the channel
        self.state_tx.send_replace(state);
    }

    /// Run one full sync cycle
    ///
    /// On a retryable failure the engine waits out the backoff delay before
    /// returning, so a caller loop naturally paces its retries.
    pub async fn sync_once(&mut self) -> Result<SyncReport, SyncError> {
        if self.state() == SyncState::Suspended {
            return Err(RemoteError::Auth("sync is suspended; call resume()".into()).into());
        }

        match self.run_cycle().await {
            Ok(report) => {
                self.backoff.reset();
                self.set_state(SyncState::Idle);
                tracing::info!(
                    pushed = report.pushed,
                    pulled = report.pulled,
                    applied = report.applied,
                    stale = report.stale,
                    "sync cycle complete"
                );
                Ok(report)
            }
            Err(e) => {
                self.handle_failure(&e).await;
                Err(e)
            }
        }
    }

    /// Run sync cycles on an interval until `shutdown` flips to true
    pub async fn run(&mut self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.state() == SyncState::Suspended {
                        continue;
                    }
                    if let Err(e) = self.sync_once().await {
                        tracing::warn!(error = %e, "sync cycle failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    async fn handle_failure(&mut self, error: &SyncError) {
        if let SyncError::Remote(RemoteError::Auth(reason)) = error {
            tracing::error!(%reason, "authentication failed, suspending sync");
            self.set_state(SyncState::Suspended);
            return;
        }

        if error.is_retryable() {
            let delay = self.backoff.next_delay();
            let attempt = self.backoff.attempt();
            tracing::warn!(%error, attempt, ?delay, "sync failed, backing off");
            self.set_state(SyncState::Failed { attempt });
            tokio::time::sleep(delay).await;
        } else {
            tracing::error!(%error, "sync failed");
        }
        self.set_state(SyncState::Idle);
    }

    async fn run_cycle(&mut self) -> Result<SyncReport, SyncError> {
        let mut report = SyncReport::default();

        self.set_state(SyncState::Pushing);
        report.pushed = self.push_phase().await?;

        self.set_state(SyncState::Pulling);
        let (origin, response) = self.pull_phase().await?;
        report.pulled = response.changes.len();

        self.set_state(SyncState::Reconciling);
        let (applied, stale) = self.reconcile(origin, response.changes).await?;
        report.applied = applied;
        report.stale = stale;

        {
            let mut store = self.store.lock().await;
            store.set_meta_value(META_REMOTE_CURSOR, &response.cursor.to_string())?;
            let cutoff = Utc::now() - chrono::Duration::days(self.settings.tombstone_grace_days);
            store.prune_tombstones(cutoff)?;
        }

        Ok(report)
    }

    /// Upload unacknowledged changes in batches
    ///
    /// The ceiling is snapshotted up front so a cycle cannot chase a busy
    /// writer forever.
    async fn push_phase(&mut self) -> Result<usize, SyncError> {
        let (origin, ceiling, mut cursor) = {
            let store = self.store.lock().await;
            (
                store.replica_id(),
                store.latest_sequence()?,
                ChangeCursor::new(store.last_acked()?)
                    .with_batch_size(self.settings.push_batch_size),
            )
        };

        let mut pushed = 0;
        while cursor.position() < ceiling {
            let batch = {
                let store = self.store.lock().await;
                cursor.next_batch(&store)?
            };
            let batch: Vec<_> = batch
                .into_iter()
                .filter(|r| r.sequence <= ceiling)
                .collect();
            if batch.is_empty() {
                break;
            }

            let acked = self
                .with_timeout(self.remote.push(origin, &batch))
                .await?;
            pushed += batch.len();

            let mut store = self.store.lock().await;
            store.ack_pushed(acked)?;
        }
        Ok(pushed)
    }

    async fn pull_phase(&mut self) -> Result<(Uuid, super::remote::PullResponse), SyncError> {
        let (origin, cursor) = {
            let store = self.store.lock().await;
            let cursor = match store.meta_value(META_REMOTE_CURSOR)? {
                Some(text) => text.parse().unwrap_or_else(|_| {
                    tracing::warn!(value = %text, "bad remote cursor, restarting from zero");
                    RemoteCursor::default()
                }),
                None => RemoteCursor::default(),
            };
            (store.replica_id(), cursor)
        };

        let response = self
            .with_timeout(self.remote.pull(origin, cursor))
            .await?;
        Ok((origin, response))
    }

    /// Apply pulled changes under last-writer-wins
    async fn reconcile(
        &mut self,
        origin: Uuid,
        changes: Vec<RemoteChange>,
    ) -> Result<(usize, usize), SyncError> {
        let mut applied = 0;
        let mut stale = 0;

        for change in changes {
            // Own changes should already be filtered by the remote
            if change.origin == origin {
                continue;
            }
            let record = change.record;
            let mut store = self.store.lock().await;

            if let Some(tombstone) = store.tombstone_for(record.entity_id)? {
                if record.timestamp <= tombstone.deleted_at {
                    stale += 1;
                    continue;
                }
                if record.op == ChangeOp::Delete {
                    // A later delete elsewhere; refresh the tombstone clock
                    store.delete_remote(record.entity_id, record.entity_kind, record.timestamp)?;
                    applied += 1;
                    continue;
                }
                if !self.settings.resurrect_newer_updates {
                    stale += 1;
                    continue;
                }
                store.clear_tombstone(record.entity_id)?;
                // Fall through to the live-entity path below
            }

            let local = store.last_modified_of(record.entity_id, record.entity_kind)?;

            match record.op {
                ChangeOp::Delete => {
                    if local.is_some_and(|ts| ts > record.timestamp) {
                        stale += 1;
                    } else {
                        store.delete_remote(
                            record.entity_id,
                            record.entity_kind,
                            record.timestamp,
                        )?;
                        applied += 1;
                    }
                }
                ChangeOp::Create | ChangeOp::Update => {
                    // Strictly newer local state wins; a tie goes to the remote
                    if local.is_some_and(|ts| ts > record.timestamp) {
                        stale += 1;
                        continue;
                    }
                    let Some(payload) = record.payload else {
                        tracing::warn!(
                            entity_id = %record.entity_id,
                            "remote {} change without payload, skipping",
                            record.op
                        );
                        stale += 1;
                        continue;
                    };
                    match record.entity_kind {
                        EntityKind::Tag => match serde_json::from_value::<Tag>(payload) {
                            Ok(tag) => {
                                store.upsert_remote_tag(&tag)?;
                                applied += 1;
                            }
                            Err(e) => {
                                tracing::warn!(
                                    entity_id = %record.entity_id,
                                    error = %e,
                                    "undecodable remote tag, skipping"
                                );
                                stale += 1;
                            }
                        },
                        EntityKind::Resource => match serde_json::from_value::<Resource>(payload) {
                            Ok(resource) => {
                                store.upsert_remote_resource(&resource)?;
                                applied += 1;
                            }
                            Err(e) => {
                                tracing::warn!(
                                    entity_id = %record.entity_id,
                                    error = %e,
                                    "undecodable remote resource, skipping"
                                );
                                stale += 1;
                            }
                        },
                    }
                }
            }
        }

        Ok((applied, stale))
    }

    async fn with_timeout<T>(
        &self,
        fut: impl Future<Output = Result<T, RemoteError>>,
    ) -> Result<T, RemoteError> {
        let limit = self.settings.request_timeout();
        match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Timeout(limit)),
        }
    }
}
