//! Unified record store
//!
//! The `RecordStore` owns the SQLite database and coordinates:
//! - entity tables (tags, resources, junction)
//! - the append-only change log
//! - tombstones and sync bookkeeping
//!
//! ## Architecture
//!
//! Every local mutation runs in a single transaction that writes the entity
//! AND appends its change record, so the log never lags the data. Observers
//! subscribe to a broadcast channel and receive the ids of entities touched
//! by any committed mutation, local or remote.
//!
//! Remote-applied changes go through the `*_remote` entry points, which
//! deliberately skip the change log: pushing them back would echo them to
//! their origin.
//!
//! ## Usage
//!
//! ```ignore
//! let mut store = RecordStore::open(config)?;
//!
//! let tag = store.create_tag("rust")?;
//! let resource = store.create_resource("Notes", "body", &[tag.id])?;
//!
//! let all = store.list_resources()?;
//! ```

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::changelog::{self, ChangeOp, ChangeRecord};
use crate::config::Config;
use crate::error::{StoreError, StoreResult};
use crate::models::{next_timestamp, EntityKind, Resource, Tag, Tombstone};
use crate::storage::{open_file, open_memory, StorageError};

/// Sync metadata key: highest change sequence confirmed by the remote
const META_LAST_ACKED: &str = "last_acked";
/// Sync metadata key: this replica's stable identity
const META_REPLICA_ID: &str = "replica_id";

/// Notification that an entity changed (created, updated, or deleted)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityEvent {
    pub id: Uuid,
    pub kind: EntityKind,
}

/// Partial update for a tag
#[derive(Debug, Clone, Default)]
pub struct TagPatch {
    pub name: Option<String>,
}

/// Partial update for a resource
#[derive(Debug, Clone, Default)]
pub struct ResourcePatch {
    pub title: Option<String>,
    pub content: Option<String>,
    pub tags: Option<Vec<Uuid>>,
}

/// Unified store for tags, resources, the change log, and sync state
pub struct RecordStore {
    conn: Connection,
    config: Config,
    events: broadcast::Sender<EntityEvent>,
    replica_id: Uuid,
}

impl RecordStore {
    /// Open the store at the configured database path
    pub fn open(config: Config) -> Result<Self> {
        let conn = open_file(&config.database_path()).context("Failed to open database")?;
        Self::with_connection(conn, config)
    }

    /// Open an ephemeral in-memory store (tests, previews)
    pub fn open_in_memory(config: Config) -> Result<Self> {
        let conn = open_memory().context("Failed to open in-memory database")?;
        Self::with_connection(conn, config)
    }

    fn with_connection(conn: Connection, config: Config) -> Result<Self> {
        let replica_id =
            load_or_create_replica_id(&conn).context("Failed to load replica identity")?;
        let (events, _) = broadcast::channel(256);
        Ok(Self {
            conn,
            config,
            events,
            replica_id,
        })
    }

    /// Stable identity of this replica, minted on first open
    pub fn replica_id(&self) -> Uuid {
        self.replica_id
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Subscribe to entity change notifications
    ///
    /// Events fire after the mutation has committed. Slow subscribers can
    /// miss events (the channel is bounded); they observe a `Lagged` error
    /// and should re-read the store.
    pub fn subscribe(&self) -> broadcast::Receiver<EntityEvent> {
        self.events.subscribe()
    }

    fn notify(&self, id: Uuid, kind: EntityKind) {
        // No receivers is fine
        let _ = self.events.send(EntityEvent { id, kind });
    }

    // ==================== Tag Operations ====================

    /// Create a new tag
    ///
    /// Fails validation if the name is empty or already taken.
    pub fn create_tag(&mut self, name: &str) -> StoreResult<Tag> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StoreError::Validation("tag name must not be empty".into()));
        }
        if read_tag_by_name(&self.conn, name)?.is_some() {
            return Err(StoreError::Validation(format!(
                "tag name already in use: {name}"
            )));
        }

        let tag = Tag::new(name);
        let payload = serde_json::to_value(&tag)?;

        let tx = self.conn.transaction()?;
        write_tag(&tx, &tag)?;
        changelog::append(
            &tx,
            tag.id,
            EntityKind::Tag,
            ChangeOp::Create,
            Some(&payload),
            tag.last_modified,
        )?;
        tx.commit()?;

        self.notify(tag.id, EntityKind::Tag);
        Ok(tag)
    }

    /// Apply a partial update to a tag, returning the updated value
    pub fn update_tag(&mut self, id: Uuid, patch: TagPatch) -> StoreResult<Tag> {
        let mut tag = read_tag(&self.conn, id)?.ok_or(StoreError::NotFound {
            kind: EntityKind::Tag,
            id,
        })?;

        if let Some(name) = patch.name {
            let name = name.trim().to_string();
            if name.is_empty() {
                return Err(StoreError::Validation("tag name must not be empty".into()));
            }
            if let Some(existing) = read_tag_by_name(&self.conn, &name)? {
                if existing.id != id {
                    return Err(StoreError::Validation(format!(
                        "tag name already in use: {name}"
                    )));
                }
            }
            tag.name = name;
        }
        // Every committed update advances the clock, even an empty patch;
        // two change records must never share a timestamp
        tag.last_modified = next_timestamp(tag.last_modified);

        let payload = serde_json::to_value(&tag)?;
        let tx = self.conn.transaction()?;
        write_tag(&tx, &tag)?;
        changelog::append(
            &tx,
            tag.id,
            EntityKind::Tag,
            ChangeOp::Update,
            Some(&payload),
            tag.last_modified,
        )?;
        tx.commit()?;

        self.notify(tag.id, EntityKind::Tag);
        Ok(tag)
    }

    /// Delete a tag, detaching it from all resources
    ///
    /// Idempotent: deleting an absent tag returns `Ok(false)`.
    pub fn delete_tag(&mut self, id: Uuid) -> StoreResult<bool> {
        let tag = match read_tag(&self.conn, id)? {
            Some(tag) => tag,
            None => return Ok(false),
        };
        let affected = tag.resources.clone();
        let deleted_at = next_timestamp(tag.last_modified);

        let tx = self.conn.transaction()?;
        // Junction rows go with the tag (FK cascade)
        tx.execute("DELETE FROM tags WHERE id = ?", [id.to_string()])?;
        write_tombstone(&tx, id, EntityKind::Tag, deleted_at)?;
        changelog::append(&tx, id, EntityKind::Tag, ChangeOp::Delete, None, deleted_at)?;
        tx.commit()?;

        self.notify(id, EntityKind::Tag);
        for resource_id in affected {
            self.notify(resource_id, EntityKind::Resource);
        }
        Ok(true)
    }

    /// Get a tag by ID
    pub fn get_tag(&self, id: Uuid) -> StoreResult<Option<Tag>> {
        read_tag(&self.conn, id)
    }

    /// Look up a tag by its name
    pub fn tag_by_name(&self, name: &str) -> StoreResult<Option<Tag>> {
        read_tag_by_name(&self.conn, name.trim())
    }

    /// All tags, ordered by name
    pub fn list_tags(&self) -> StoreResult<Vec<Tag>> {
        let mut stmt = self.conn.prepare("SELECT id FROM tags ORDER BY name ASC")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut tags = Vec::with_capacity(ids.len());
        for id_text in ids {
            let id = parse_uuid(&id_text)?;
            if let Some(tag) = read_tag(&self.conn, id)? {
                tags.push(tag);
            }
        }
        Ok(tags)
    }

    /// Number of tags
    pub fn tag_count(&self) -> StoreResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM tags", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    // ==================== Resource Operations ====================

    /// Create a new resource
    ///
    /// Every tag id must refer to an existing tag; a stale id fails the
    /// whole call with `NotFound` before anything is written.
    pub fn create_resource(
        &mut self,
        title: &str,
        content: &str,
        tags: &[Uuid],
    ) -> StoreResult<Resource> {
        let title = title.trim();
        if title.is_empty() {
            return Err(StoreError::Validation(
                "resource title must not be empty".into(),
            ));
        }
        self.require_tags_exist(tags)?;

        let mut resource = Resource::new(title);
        resource.content = content.to_string();
        for tag_id in tags {
            if !resource.tags.contains(tag_id) {
                resource.tags.push(*tag_id);
            }
        }
        let payload = serde_json::to_value(&resource)?;

        let tx = self.conn.transaction()?;
        write_resource(&tx, &resource)?;
        changelog::append(
            &tx,
            resource.id,
            EntityKind::Resource,
            ChangeOp::Create,
            Some(&payload),
            resource.last_modified,
        )?;
        tx.commit()?;

        self.notify(resource.id, EntityKind::Resource);
        Ok(resource)
    }

    /// Apply a partial update to a resource, returning the updated value
    pub fn update_resource(&mut self, id: Uuid, patch: ResourcePatch) -> StoreResult<Resource> {
        let mut resource = read_resource(&self.conn, id)?.ok_or(StoreError::NotFound {
            kind: EntityKind::Resource,
            id,
        })?;

        if let Some(title) = patch.title {
            let title = title.trim().to_string();
            if title.is_empty() {
                return Err(StoreError::Validation(
                    "resource title must not be empty".into(),
                ));
            }
            resource.title = title;
        }
        if let Some(content) = patch.content {
            resource.content = content;
        }
        if let Some(tags) = patch.tags {
            self.require_tags_exist(&tags)?;
            let mut deduped = Vec::with_capacity(tags.len());
            for tag_id in tags {
                if !deduped.contains(&tag_id) {
                    deduped.push(tag_id);
                }
            }
            resource.tags = deduped;
        }
        // Every committed update advances the clock, even an empty patch;
        // two change records must never share a timestamp
        resource.last_modified = next_timestamp(resource.last_modified);

        let payload = serde_json::to_value(&resource)?;
        let tx = self.conn.transaction()?;
        write_resource(&tx, &resource)?;
        changelog::append(
            &tx,
            resource.id,
            EntityKind::Resource,
            ChangeOp::Update,
            Some(&payload),
            resource.last_modified,
        )?;
        tx.commit()?;

        self.notify(resource.id, EntityKind::Resource);
        Ok(resource)
    }

    /// Delete a resource
    ///
    /// Idempotent: deleting an absent resource returns `Ok(false)`.
    pub fn delete_resource(&mut self, id: Uuid) -> StoreResult<bool> {
        let resource = match read_resource(&self.conn, id)? {
            Some(resource) => resource,
            None => return Ok(false),
        };
        let deleted_at = next_timestamp(resource.last_modified);

        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM resources WHERE id = ?", [id.to_string()])?;
        write_tombstone(&tx, id, EntityKind::Resource, deleted_at)?;
        changelog::append(
            &tx,
            id,
            EntityKind::Resource,
            ChangeOp::Delete,
            None,
            deleted_at,
        )?;
        tx.commit()?;

        self.notify(id, EntityKind::Resource);
        Ok(true)
    }

    /// Get a resource by ID
    pub fn get_resource(&self, id: Uuid) -> StoreResult<Option<Resource>> {
        read_resource(&self.conn, id)
    }

    /// All resources, newest first
    pub fn list_resources(&self) -> StoreResult<Vec<Resource>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM resources ORDER BY created_at DESC, id ASC")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut resources = Vec::with_capacity(ids.len());
        for id_text in ids {
            let id = parse_uuid(&id_text)?;
            if let Some(resource) = read_resource(&self.conn, id)? {
                resources.push(resource);
            }
        }
        Ok(resources)
    }

    /// Resources carrying the given tag, newest first
    pub fn resources_with_tag(&self, tag_id: Uuid) -> StoreResult<Vec<Resource>> {
        let mut stmt = self.conn.prepare(
            "SELECT r.id FROM resources r
             JOIN resource_tags rt ON rt.resource_id = r.id
             WHERE rt.tag_id = ?
             ORDER BY r.created_at DESC, r.id ASC",
        )?;
        let ids = stmt
            .query_map([tag_id.to_string()], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut resources = Vec::with_capacity(ids.len());
        for id_text in ids {
            let id = parse_uuid(&id_text)?;
            if let Some(resource) = read_resource(&self.conn, id)? {
                resources.push(resource);
            }
        }
        Ok(resources)
    }

    /// Number of resources
    pub fn resource_count(&self) -> StoreResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM resources", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Delete every entity of the given kind in one transaction
    ///
    /// Each deleted entity gets a tombstone and a change record, so the
    /// wipe propagates to other replicas like any other delete.
    pub fn delete_all(&mut self, kind: EntityKind) -> StoreResult<u64> {
        let mut detached: Vec<Uuid> = Vec::new();
        let (table, victims): (&str, Vec<(Uuid, DateTime<Utc>)>) = match kind {
            EntityKind::Tag => {
                let tags = self.list_tags()?;
                for tag in &tags {
                    for resource_id in &tag.resources {
                        if !detached.contains(resource_id) {
                            detached.push(*resource_id);
                        }
                    }
                }
                (
                    "tags",
                    tags.into_iter().map(|t| (t.id, t.last_modified)).collect(),
                )
            }
            EntityKind::Resource => (
                "resources",
                self.list_resources()?
                    .into_iter()
                    .map(|r| (r.id, r.last_modified))
                    .collect(),
            ),
        };

        let tx = self.conn.transaction()?;
        for (id, last_modified) in &victims {
            let deleted_at = next_timestamp(*last_modified);
            tx.execute(
                &format!("DELETE FROM {table} WHERE id = ?"),
                [id.to_string()],
            )?;
            write_tombstone(&tx, *id, kind, deleted_at)?;
            changelog::append(&tx, *id, kind, ChangeOp::Delete, None, deleted_at)?;
        }
        tx.commit()?;

        for (id, _) in &victims {
            self.notify(*id, kind);
        }
        // Wiping tags detaches them from resources via the junction cascade
        for resource_id in detached {
            self.notify(resource_id, EntityKind::Resource);
        }
        Ok(victims.len() as u64)
    }

    fn require_tags_exist(&self, tags: &[Uuid]) -> StoreResult<()> {
        for tag_id in tags {
            if read_tag(&self.conn, *tag_id)?.is_none() {
                return Err(StoreError::NotFound {
                    kind: EntityKind::Tag,
                    id: *tag_id,
                });
            }
        }
        Ok(())
    }

    // ==================== Change Log ====================

    /// Change records with `sequence > since`, ascending, up to `limit`
    pub fn changes_since(&self, since: u64, limit: usize) -> StoreResult<Vec<ChangeRecord>> {
        Ok(changelog::read_since(&self.conn, since, limit)?)
    }

    /// Highest change sequence ever assigned (survives pruning)
    pub fn latest_sequence(&self) -> StoreResult<u64> {
        Ok(changelog::max_sequence(&self.conn)?)
    }

    /// Highest change sequence the remote has confirmed
    pub fn last_acked(&self) -> StoreResult<u64> {
        match self.meta_value(META_LAST_ACKED)? {
            Some(text) => text
                .parse()
                .map_err(|_| bad_meta(META_LAST_ACKED, &text)),
            None => Ok(0),
        }
    }

    /// All change records not yet confirmed by the remote
    pub fn pending_changes(&self) -> StoreResult<Vec<ChangeRecord>> {
        let mut pending = Vec::new();
        let mut position = self.last_acked()?;
        loop {
            let batch = self.changes_since(position, 512)?;
            match batch.last() {
                Some(last) => position = last.sequence,
                None => break,
            }
            pending.extend(batch);
        }
        Ok(pending)
    }

    /// Number of retained change records
    pub fn change_log_len(&self) -> StoreResult<u64> {
        Ok(changelog::len(&self.conn)?)
    }

    /// Record that the remote confirmed everything up to `up_to`, and prune
    ///
    /// The acknowledgment always commits; a prune failure is logged and
    /// retried implicitly on the next ack.
    pub fn ack_pushed(&mut self, up_to: u64) -> StoreResult<()> {
        let current = self.last_acked()?;
        if up_to <= current {
            return Ok(());
        }

        let tx = self.conn.transaction()?;
        set_meta(&tx, META_LAST_ACKED, &up_to.to_string())?;
        match changelog::prune(&tx, up_to) {
            Ok(removed) => {
                tracing::debug!(up_to, removed, "pruned acknowledged changes");
            }
            Err(e) => {
                tracing::warn!(up_to, error = %e, "failed to prune change log");
            }
        }
        tx.commit()?;
        Ok(())
    }

    // ==================== Sync Support ====================

    /// Read a sync metadata value
    pub(crate) fn meta_value(&self, key: &str) -> StoreResult<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM sync_meta WHERE key = ?",
                [key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Write a sync metadata value
    pub(crate) fn set_meta_value(&mut self, key: &str, value: &str) -> StoreResult<()> {
        set_meta(&self.conn, key, value)?;
        Ok(())
    }

    /// The tombstone for an entity, if one is retained
    pub(crate) fn tombstone_for(&self, entity_id: Uuid) -> StoreResult<Option<Tombstone>> {
        let row = self
            .conn
            .query_row(
                "SELECT entity_kind, deleted_at FROM tombstones WHERE entity_id = ?",
                [entity_id.to_string()],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()?;

        match row {
            None => Ok(None),
            Some((kind_text, deleted_ms)) => Ok(Some(Tombstone {
                entity_id,
                entity_kind: parse_kind(&kind_text)?,
                deleted_at: decode_ts(deleted_ms)?,
            })),
        }
    }

    /// Drop the tombstone for an entity (resurrection)
    pub(crate) fn clear_tombstone(&mut self, entity_id: Uuid) -> StoreResult<()> {
        self.conn.execute(
            "DELETE FROM tombstones WHERE entity_id = ?",
            [entity_id.to_string()],
        )?;
        Ok(())
    }

    /// Remove tombstones deleted before the cutoff, returning how many
    pub(crate) fn prune_tombstones(&mut self, older_than: DateTime<Utc>) -> StoreResult<usize> {
        let removed = self.conn.execute(
            "DELETE FROM tombstones WHERE deleted_at < ?",
            [older_than.timestamp_millis()],
        )?;
        Ok(removed)
    }

    /// The `last_modified` of a live entity, if it exists
    pub(crate) fn last_modified_of(
        &self,
        entity_id: Uuid,
        kind: EntityKind,
    ) -> StoreResult<Option<DateTime<Utc>>> {
        let table = match kind {
            EntityKind::Tag => "tags",
            EntityKind::Resource => "resources",
        };
        let ms: Option<i64> = self
            .conn
            .query_row(
                &format!("SELECT last_modified FROM {table} WHERE id = ?"),
                [entity_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        ms.map(decode_ts).transpose()
    }

    /// Apply a tag arriving from a remote replica
    ///
    /// Writes the tag row as-is; membership stays owned by the resource
    /// side, so junction rows are untouched. No change record is appended.
    pub(crate) fn upsert_remote_tag(&mut self, tag: &Tag) -> StoreResult<()> {
        let tx = self.conn.transaction()?;
        write_tag(&tx, tag)?;
        tx.commit()?;
        self.notify(tag.id, EntityKind::Tag);
        Ok(())
    }

    /// Apply a resource arriving from a remote replica
    ///
    /// Tag references unknown to this replica are dropped silently; they
    /// reappear once the corresponding tag change arrives. No change record
    /// is appended.
    pub(crate) fn upsert_remote_resource(&mut self, resource: &Resource) -> StoreResult<()> {
        let mut known = resource.clone();
        let mut kept = Vec::with_capacity(known.tags.len());
        for tag_id in &known.tags {
            if read_tag(&self.conn, *tag_id)?.is_some() {
                kept.push(*tag_id);
            }
        }
        known.tags = kept;

        let tx = self.conn.transaction()?;
        write_resource(&tx, &known)?;
        tx.commit()?;
        self.notify(known.id, EntityKind::Resource);
        Ok(())
    }

    /// Apply a delete arriving from a remote replica
    ///
    /// Idempotent; records a tombstone either way so later stale updates
    /// for the entity are still suppressed. No change record is appended.
    pub(crate) fn delete_remote(
        &mut self,
        entity_id: Uuid,
        kind: EntityKind,
        deleted_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let table = match kind {
            EntityKind::Tag => "tags",
            EntityKind::Resource => "resources",
        };

        let tx = self.conn.transaction()?;
        tx.execute(
            &format!("DELETE FROM {table} WHERE id = ?"),
            [entity_id.to_string()],
        )?;
        write_tombstone(&tx, entity_id, kind, deleted_at)?;
        tx.commit()?;

        self.notify(entity_id, kind);
        Ok(())
    }
}

// ==================== Row Helpers ====================

fn load_or_create_replica_id(conn: &Connection) -> StoreResult<Uuid> {
    let existing: Option<String> = conn
        .query_row(
            "SELECT value FROM sync_meta WHERE key = ?",
            [META_REPLICA_ID],
            |row| row.get(0),
        )
        .optional()?;

    match existing {
        Some(text) => parse_uuid(&text),
        None => {
            let id = Uuid::new_v4();
            set_meta(conn, META_REPLICA_ID, &id.to_string())?;
            Ok(id)
        }
    }
}

fn set_meta(conn: &Connection, key: &str, value: &str) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO sync_meta (key, value) VALUES (?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )?;
    Ok(())
}

/// Upsert a tag row; `created_at` is preserved on conflict
fn write_tag(conn: &Connection, tag: &Tag) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO tags (id, name, created_at, last_modified) VALUES (?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
             name = excluded.name,
             last_modified = excluded.last_modified",
        params![
            tag.id.to_string(),
            tag.name,
            tag.created_at.timestamp_millis(),
            tag.last_modified.timestamp_millis(),
        ],
    )?;
    Ok(())
}

/// Upsert a resource row and replace its junction rows
///
/// An upsert (not INSERT OR REPLACE) so an existing row is never deleted
/// and re-inserted, which would cascade away the junction rows mid-write.
fn write_resource(conn: &Connection, resource: &Resource) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO resources (id, title, content, created_at, last_modified)
         VALUES (?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
             title = excluded.title,
             content = excluded.content,
             last_modified = excluded.last_modified",
        params![
            resource.id.to_string(),
            resource.title,
            resource.content,
            resource.created_at.timestamp_millis(),
            resource.last_modified.timestamp_millis(),
        ],
    )?;

    conn.execute(
        "DELETE FROM resource_tags WHERE resource_id = ?",
        [resource.id.to_string()],
    )?;
    for tag_id in &resource.tags {
        conn.execute(
            "INSERT INTO resource_tags (resource_id, tag_id) VALUES (?, ?)",
            params![resource.id.to_string(), tag_id.to_string()],
        )?;
    }
    Ok(())
}

fn write_tombstone(
    tx: &Transaction,
    entity_id: Uuid,
    kind: EntityKind,
    deleted_at: DateTime<Utc>,
) -> StoreResult<()> {
    tx.execute(
        "INSERT INTO tombstones (entity_id, entity_kind, deleted_at) VALUES (?, ?, ?)
         ON CONFLICT(entity_id) DO UPDATE SET
             entity_kind = excluded.entity_kind,
             deleted_at = excluded.deleted_at",
        params![
            entity_id.to_string(),
            kind.as_str(),
            deleted_at.timestamp_millis(),
        ],
    )?;
    Ok(())
}

fn read_tag(conn: &Connection, id: Uuid) -> StoreResult<Option<Tag>> {
    let row = conn
        .query_row(
            "SELECT name, created_at, last_modified FROM tags WHERE id = ?",
            [id.to_string()],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            },
        )
        .optional()?;

    let (name, created_ms, modified_ms) = match row {
        Some(row) => row,
        None => return Ok(None),
    };

    let mut stmt = conn.prepare(
        "SELECT resource_id FROM resource_tags WHERE tag_id = ? ORDER BY rowid ASC",
    )?;
    let resource_texts = stmt
        .query_map([id.to_string()], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    let mut resources = Vec::with_capacity(resource_texts.len());
    for text in resource_texts {
        resources.push(parse_uuid(&text)?);
    }

    Ok(Some(Tag {
        id,
        name,
        resources,
        created_at: decode_ts(created_ms)?,
        last_modified: decode_ts(modified_ms)?,
    }))
}

fn read_tag_by_name(conn: &Connection, name: &str) -> StoreResult<Option<Tag>> {
    let id_text: Option<String> = conn
        .query_row("SELECT id FROM tags WHERE name = ?", [name], |row| {
            row.get(0)
        })
        .optional()?;
    match id_text {
        Some(text) => read_tag(conn, parse_uuid(&text)?),
        None => Ok(None),
    }
}

fn read_resource(conn: &Connection, id: Uuid) -> StoreResult<Option<Resource>> {
    let row = conn
        .query_row(
            "SELECT title, content, created_at, last_modified FROM resources WHERE id = ?",
            [id.to_string()],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            },
        )
        .optional()?;

    let (title, content, created_ms, modified_ms) = match row {
        Some(row) => row,
        None => return Ok(None),
    };

    let mut stmt =
        conn.prepare("SELECT tag_id FROM resource_tags WHERE resource_id = ? ORDER BY rowid ASC")?;
    let tag_texts = stmt
        .query_map([id.to_string()], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    let mut tags = Vec::with_capacity(tag_texts.len());
    for text in tag_texts {
        tags.push(parse_uuid(&text)?);
    }

    Ok(Some(Resource {
        id,
        title,
        content,
        tags,
        created_at: decode_ts(created_ms)?,
        last_modified: decode_ts(modified_ms)?,
    }))
}

fn parse_uuid(text: &str) -> StoreResult<Uuid> {
    Uuid::parse_str(text).map_err(|e| {
        StoreError::Storage(StorageError::Serialization(format!("bad uuid: {e}")))
    })
}

fn parse_kind(text: &str) -> StoreResult<EntityKind> {
    EntityKind::parse(text).ok_or_else(|| {
        StoreError::Storage(StorageError::Serialization(format!(
            "bad entity kind: {text}"
        )))
    })
}

fn decode_ts(ms: i64) -> StoreResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| {
        StoreError::Storage(StorageError::Serialization(format!("bad timestamp: {ms}")))
    })
}

fn bad_meta(key: &str, value: &str) -> StoreError {
    StoreError::Storage(StorageError::Serialization(format!(
        "bad sync_meta value for {key}: {value}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn memory_store() -> RecordStore {
        RecordStore::open_in_memory(Config::default()).unwrap()
    }

    #[test]
    fn test_create_and_get_tag() {
        let mut store = memory_store();

        let tag = store.create_tag("rust").unwrap();
        let fetched = store.get_tag(tag.id).unwrap().unwrap();
        assert_eq!(fetched.name, "rust");
        assert!(fetched.resources.is_empty());
    }

    #[test]
    fn test_create_tag_rejects_empty_name() {
        let mut store = memory_store();
        let err = store.create_tag("   ").unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }

    #[test]
    fn test_create_tag_rejects_duplicate_name() {
        let mut store = memory_store();
        store.create_tag("rust").unwrap();
        let err = store.create_tag("rust").unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }

    #[test]
    fn test_update_tag_rename() {
        let mut store = memory_store();
        let tag = store.create_tag("old").unwrap();

        let updated = store
            .update_tag(
                tag.id,
                TagPatch {
                    name: Some("new".to_string()),
                },
            )
            .unwrap();
        assert_eq!(updated.name, "new");
        assert!(updated.last_modified > tag.last_modified);
        assert!(store.tag_by_name("old").unwrap().is_none());
        assert!(store.tag_by_name("new").unwrap().is_some());
    }

    #[test]
    fn test_update_tag_rename_to_own_name_is_allowed() {
        let mut store = memory_store();
        let tag = store.create_tag("same").unwrap();
        store
            .update_tag(
                tag.id,
                TagPatch {
                    name: Some("same".to_string()),
                },
            )
            .unwrap();
    }

    #[test]
    fn test_update_missing_tag_is_not_found() {
        let mut store = memory_store();
        let err = store
            .update_tag(Uuid::new_v4(), TagPatch::default())
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::NotFound {
                kind: EntityKind::Tag,
                ..
            }
        ));
    }

    #[test]
    fn test_create_resource_with_tags() {
        let mut store = memory_store();
        let tag = store.create_tag("rust").unwrap();

        let resource = store
            .create_resource("Notes", "body", &[tag.id])
            .unwrap();
        assert_eq!(resource.tags, vec![tag.id]);

        // Tag hydrates its membership from the junction table
        let tag = store.get_tag(tag.id).unwrap().unwrap();
        assert_eq!(tag.resources, vec![resource.id]);
    }

    #[test]
    fn test_create_resource_with_stale_tag_fails() {
        let mut store = memory_store();
        let stale = Uuid::new_v4();
        let err = store
            .create_resource("Notes", "", &[stale])
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::NotFound {
                kind: EntityKind::Tag,
                id
            } if id == stale
        ));
        assert_eq!(store.resource_count().unwrap(), 0);
    }

    #[test]
    fn test_timestamps_survive_storage_round_trip() {
        let mut store = memory_store();
        let resource = store.create_resource("Notes", "body", &[]).unwrap();

        // The stored row must compare equal to the in-memory value; a
        // precision mismatch here would skew last-writer-wins decisions
        let fetched = store.get_resource(resource.id).unwrap().unwrap();
        assert_eq!(fetched.last_modified, resource.last_modified);
        assert_eq!(fetched, resource);
    }

    #[test]
    fn test_update_resource() {
        let mut store = memory_store();
        let tag = store.create_tag("rust").unwrap();
        let resource = store.create_resource("Notes", "body", &[]).unwrap();

        let updated = store
            .update_resource(
                resource.id,
                ResourcePatch {
                    title: Some("Renamed".to_string()),
                    content: Some("new body".to_string()),
                    tags: Some(vec![tag.id]),
                },
            )
            .unwrap();
        assert_eq!(updated.title, "Renamed");
        assert_eq!(updated.content, "new body");
        assert_eq!(updated.tags, vec![tag.id]);
        assert!(updated.last_modified > resource.last_modified);
    }

    #[test]
    fn test_empty_patch_update_still_bumps_last_modified() {
        let mut store = memory_store();
        let tag = store.create_tag("rust").unwrap();
        let resource = store.create_resource("Notes", "", &[]).unwrap();

        let updated_tag = store.update_tag(tag.id, TagPatch::default()).unwrap();
        assert!(updated_tag.last_modified > tag.last_modified);

        let updated = store
            .update_resource(resource.id, ResourcePatch::default())
            .unwrap();
        assert!(updated.last_modified > resource.last_modified);

        // Each record gets its own timestamp, so log order and
        // last-writer-wins order agree
        let changes = store.changes_since(0, 10).unwrap();
        assert_eq!(changes.len(), 4);
        assert!(changes[3].timestamp > changes[1].timestamp);
        assert_eq!(changes[3].op, ChangeOp::Update);
    }

    #[test]
    fn test_delete_resource_is_idempotent() {
        let mut store = memory_store();
        let resource = store.create_resource("Notes", "", &[]).unwrap();

        assert!(store.delete_resource(resource.id).unwrap());
        assert!(!store.delete_resource(resource.id).unwrap());
        assert!(store.get_resource(resource.id).unwrap().is_none());

        // A tombstone is retained
        let tombstone = store.tombstone_for(resource.id).unwrap().unwrap();
        assert_eq!(tombstone.entity_kind, EntityKind::Resource);
        assert!(tombstone.deleted_at > resource.last_modified);
    }

    #[test]
    fn test_delete_tag_detaches_resources() {
        let mut store = memory_store();
        let tag = store.create_tag("rust").unwrap();
        let resource = store.create_resource("Notes", "", &[tag.id]).unwrap();

        assert!(store.delete_tag(tag.id).unwrap());

        let resource = store.get_resource(resource.id).unwrap().unwrap();
        assert!(resource.tags.is_empty());
    }

    #[test]
    fn test_list_tags_ordered_by_name() {
        let mut store = memory_store();
        store.create_tag("zig").unwrap();
        store.create_tag("ada").unwrap();
        store.create_tag("rust").unwrap();

        let names: Vec<_> = store
            .list_tags()
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, vec!["ada", "rust", "zig"]);
    }

    #[test]
    fn test_resources_with_tag() {
        let mut store = memory_store();
        let rust = store.create_tag("rust").unwrap();
        let other = store.create_tag("other").unwrap();

        let tagged = store.create_resource("Tagged", "", &[rust.id]).unwrap();
        store.create_resource("Other", "", &[other.id]).unwrap();

        let found = store.resources_with_tag(rust.id).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, tagged.id);
    }

    #[test]
    fn test_mutations_append_change_records() {
        let mut store = memory_store();
        let tag = store.create_tag("rust").unwrap();
        let resource = store.create_resource("Notes", "", &[]).unwrap();
        store.delete_resource(resource.id).unwrap();

        let changes = store.changes_since(0, 100).unwrap();
        assert_eq!(changes.len(), 3);
        assert_eq!(changes[0].op, ChangeOp::Create);
        assert_eq!(changes[0].entity_id, tag.id);
        assert_eq!(changes[2].op, ChangeOp::Delete);
        assert_eq!(changes[2].entity_id, resource.id);
        assert!(changes[2].payload.is_none());

        // Sequences are strictly increasing
        assert!(changes.windows(2).all(|w| w[0].sequence < w[1].sequence));
    }

    #[test]
    fn test_change_payload_snapshots_entity() {
        let mut store = memory_store();
        let resource = store.create_resource("Notes", "body", &[]).unwrap();

        let changes = store.changes_since(0, 10).unwrap();
        let payload = changes[0].payload.clone().unwrap();
        let snapshot: Resource = serde_json::from_value(payload).unwrap();
        assert_eq!(snapshot, resource);
    }

    #[test]
    fn test_ack_pushed_prunes_and_is_monotonic() {
        let mut store = memory_store();
        store.create_tag("one").unwrap();
        store.create_tag("two").unwrap();
        store.create_tag("three").unwrap();

        store.ack_pushed(2).unwrap();
        assert_eq!(store.last_acked().unwrap(), 2);
        assert_eq!(store.change_log_len().unwrap(), 1);

        // A stale ack is a no-op
        store.ack_pushed(1).unwrap();
        assert_eq!(store.last_acked().unwrap(), 2);

        let pending = store.pending_changes().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].sequence, 3);
    }

    #[test]
    fn test_delete_all_resources() {
        let mut store = memory_store();
        let r1 = store.create_resource("One", "", &[]).unwrap();
        let r2 = store.create_resource("Two", "", &[]).unwrap();

        let removed = store.delete_all(EntityKind::Resource).unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.resource_count().unwrap(), 0);
        assert!(store.tombstone_for(r1.id).unwrap().is_some());
        assert!(store.tombstone_for(r2.id).unwrap().is_some());
    }

    #[test]
    fn test_delete_all_tags_notifies_detached_resources() {
        let mut store = memory_store();
        let tag = store.create_tag("rust").unwrap();
        let resource = store.create_resource("Notes", "", &[tag.id]).unwrap();

        let mut rx = store.subscribe();
        store.delete_all(EntityKind::Tag).unwrap();

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert!(events.contains(&EntityEvent {
            id: tag.id,
            kind: EntityKind::Tag
        }));
        // The resource lost a tag, so its observers must hear about it
        assert!(events.contains(&EntityEvent {
            id: resource.id,
            kind: EntityKind::Resource
        }));
    }

    #[test]
    fn test_delete_all_tags_then_stale_reference_fails() {
        let mut store = memory_store();
        let tag = store.create_tag("rust").unwrap();
        store.delete_all(EntityKind::Tag).unwrap();

        let err = store.create_resource("Notes", "", &[tag.id]).unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[test]
    fn test_replica_id_is_stable_across_reopens() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config {
            data_dir: temp_dir.path().to_path_buf(),
            ..Config::default()
        };

        let first = RecordStore::open(config.clone()).unwrap().replica_id();
        let second = RecordStore::open(config).unwrap().replica_id();
        assert_eq!(first, second);
    }

    #[test]
    fn test_data_persists_across_reopens() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config {
            data_dir: temp_dir.path().to_path_buf(),
            ..Config::default()
        };

        let resource_id;
        {
            let mut store = RecordStore::open(config.clone()).unwrap();
            let tag = store.create_tag("rust").unwrap();
            resource_id = store
                .create_resource("Notes", "body", &[tag.id])
                .unwrap()
                .id;
        }

        let store = RecordStore::open(config).unwrap();
        let resource = store.get_resource(resource_id).unwrap().unwrap();
        assert_eq!(resource.title, "Notes");
        assert_eq!(resource.tags.len(), 1);
        assert_eq!(store.latest_sequence().unwrap(), 2);
    }

    #[test]
    fn test_subscribe_receives_events() {
        let mut store = memory_store();
        let mut rx = store.subscribe();

        let tag = store.create_tag("rust").unwrap();
        let event = rx.try_recv().unwrap();
        assert_eq!(
            event,
            EntityEvent {
                id: tag.id,
                kind: EntityKind::Tag
            }
        );
    }

    #[test]
    fn test_remote_upsert_skips_change_log() {
        let mut store = memory_store();
        let tag = Tag::new("remote");
        store.upsert_remote_tag(&tag).unwrap();

        assert!(store.get_tag(tag.id).unwrap().is_some());
        assert_eq!(store.latest_sequence().unwrap(), 0);
    }

    #[test]
    fn test_remote_resource_drops_unknown_tags() {
        let mut store = memory_store();
        let known = store.create_tag("known").unwrap();

        let mut resource = Resource::new("Remote");
        resource.tags = vec![known.id, Uuid::new_v4()];
        store.upsert_remote_resource(&resource).unwrap();

        let stored = store.get_resource(resource.id).unwrap().unwrap();
        assert_eq!(stored.tags, vec![known.id]);
    }

    #[test]
    fn test_remote_delete_records_tombstone() {
        let mut store = memory_store();
        let resource = store.create_resource("Notes", "", &[]).unwrap();
        let before = store.latest_sequence().unwrap();

        let deleted_at = Utc::now();
        store
            .delete_remote(resource.id, EntityKind::Resource, deleted_at)
            .unwrap();

        assert!(store.get_resource(resource.id).unwrap().is_none());
        assert!(store.tombstone_for(resource.id).unwrap().is_some());
        // Remote deletes never echo into the local log
        assert_eq!(store.latest_sequence().unwrap(), before);
    }

    #[test]
    fn test_prune_tombstones() {
        let mut store = memory_store();
        let resource = store.create_resource("Notes", "", &[]).unwrap();
        store.delete_resource(resource.id).unwrap();

        let removed = store
            .prune_tombstones(Utc::now() + chrono::Duration::days(1))
            .unwrap();
        assert_eq!(removed, 1);
        assert!(store.tombstone_for(resource.id).unwrap().is_none());
    }
}
