//! Append-only change log
//!
//! Every local mutation appends one immutable [`ChangeRecord`] in the same
//! SQLite transaction that wrote the entity, so a change is durable before
//! the mutation is acknowledged. Sequence numbers come from the table's
//! AUTOINCREMENT counter: strictly increasing and gap-free for committed
//! mutations, and authoritative for local ordering.
//!
//! Records are pruned only after the sync engine confirms remote receipt.
//! Changes applied *from* the remote are never appended here (re-pushing
//! them would echo).

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreResult;
use crate::models::EntityKind;
use crate::storage::{StorageError, StorageResult};
use crate::store::RecordStore;

/// The kind of mutation a change record describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOp {
    Create,
    Update,
    Delete,
}

impl ChangeOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeOp::Create => "create",
            ChangeOp::Update => "update",
            ChangeOp::Delete => "delete",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "create" => Some(ChangeOp::Create),
            "update" => Some(ChangeOp::Update),
            "delete" => Some(ChangeOp::Delete),
            _ => None,
        }
    }
}

impl std::fmt::Display for ChangeOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable entry in the change log
///
/// `payload` carries the full entity snapshot for create/update and is
/// absent for delete. `timestamp` is the entity's `last_modified` at the
/// time of the mutation (the deletion time for deletes), which is what
/// last-writer-wins resolution compares.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub sequence: u64,
    pub entity_id: Uuid,
    pub entity_kind: EntityKind,
    pub op: ChangeOp,
    pub payload: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

/// Append a record, returning its assigned sequence number
///
/// Callers run this inside the transaction that performs the mutation.
pub(crate) fn append(
    conn: &Connection,
    entity_id: Uuid,
    entity_kind: EntityKind,
    op: ChangeOp,
    payload: Option<&serde_json::Value>,
    timestamp: DateTime<Utc>,
) -> StorageResult<u64> {
    let payload_text = payload.map(serde_json::to_string).transpose()?;
    conn.execute(
        "INSERT INTO change_log (entity_id, entity_kind, op, payload, ts) VALUES (?, ?, ?, ?, ?)",
        params![
            entity_id.to_string(),
            entity_kind.as_str(),
            op.as_str(),
            payload_text,
            timestamp.timestamp_millis(),
        ],
    )?;
    Ok(conn.last_insert_rowid() as u64)
}

/// Read up to `limit` records with `sequence > since`, ascending
pub(crate) fn read_since(
    conn: &Connection,
    since: u64,
    limit: usize,
) -> StorageResult<Vec<ChangeRecord>> {
    let mut stmt = conn.prepare(
        "SELECT seq, entity_id, entity_kind, op, payload, ts
         FROM change_log WHERE seq > ? ORDER BY seq ASC LIMIT ?",
    )?;

    let rows = stmt.query_map(params![since as i64, limit as i64], map_row)?;

    let mut records = Vec::new();
    for row in rows {
        records.push(decode_row(row?)?);
    }
    Ok(records)
}

/// Delete records with `sequence <= up_to`, returning how many were removed
pub(crate) fn prune(conn: &Connection, up_to: u64) -> StorageResult<usize> {
    let removed = conn.execute("DELETE FROM change_log WHERE seq <= ?", [up_to as i64])?;
    Ok(removed)
}

/// Highest assigned sequence number, or 0 if the log was never written
///
/// Reads the AUTOINCREMENT counter rather than MAX(seq) so the value
/// survives pruning.
pub(crate) fn max_sequence(conn: &Connection) -> StorageResult<u64> {
    let counter: Option<i64> = conn
        .query_row(
            "SELECT seq FROM sqlite_sequence WHERE name = 'change_log'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    Ok(counter.unwrap_or(0) as u64)
}

/// Number of records currently retained
pub(crate) fn len(conn: &Connection) -> StorageResult<u64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM change_log", [], |row| row.get(0))?;
    Ok(count as u64)
}

struct RawRow {
    seq: i64,
    entity_id: String,
    entity_kind: String,
    op: String,
    payload: Option<String>,
    ts: i64,
}

fn map_row(row: &Row) -> rusqlite::Result<RawRow> {
    Ok(RawRow {
        seq: row.get(0)?,
        entity_id: row.get(1)?,
        entity_kind: row.get(2)?,
        op: row.get(3)?,
        payload: row.get(4)?,
        ts: row.get(5)?,
    })
}

fn decode_row(raw: RawRow) -> StorageResult<ChangeRecord> {
    let entity_id = Uuid::parse_str(&raw.entity_id)
        .map_err(|e| StorageError::Serialization(format!("bad entity id: {e}")))?;
    let entity_kind = EntityKind::parse(&raw.entity_kind)
        .ok_or_else(|| StorageError::Serialization(format!("bad entity kind: {}", raw.entity_kind)))?;
    let op = ChangeOp::parse(&raw.op)
        .ok_or_else(|| StorageError::Serialization(format!("bad change op: {}", raw.op)))?;
    let payload = raw
        .payload
        .map(|text| serde_json::from_str(&text))
        .transpose()?;
    let timestamp = DateTime::from_timestamp_millis(raw.ts)
        .ok_or_else(|| StorageError::Serialization(format!("bad timestamp: {}", raw.ts)))?;

    Ok(ChangeRecord {
        sequence: raw.seq as u64,
        entity_id,
        entity_kind,
        op,
        payload,
        timestamp,
    })
}

/// Restartable snapshot cursor over the change log
///
/// Pages through records in batches without holding any lock across
/// batches; records appended while iterating are simply seen by later
/// batches (or by the next cycle, if the caller bounds its read).
#[derive(Debug, Clone)]
pub struct ChangeCursor {
    position: u64,
    batch_size: usize,
}

impl ChangeCursor {
    /// Start reading after the given sequence number
    pub fn new(since: u64) -> Self {
        Self {
            position: since,
            batch_size: 256,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Sequence number of the last record returned so far
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Fetch the next batch, advancing the cursor; empty when exhausted
    pub fn next_batch(&mut self, store: &RecordStore) -> StoreResult<Vec<ChangeRecord>> {
        let batch = store.changes_since(self.position, self.batch_size)?;
        if let Some(last) = batch.last() {
            self.position = last.sequence;
        }
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::open_memory;

    fn sample(conn: &Connection, op: ChangeOp) -> u64 {
        append(
            conn,
            Uuid::new_v4(),
            EntityKind::Resource,
            op,
            None,
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn test_append_assigns_increasing_sequences() {
        let conn = open_memory().unwrap();

        let s1 = sample(&conn, ChangeOp::Create);
        let s2 = sample(&conn, ChangeOp::Update);
        let s3 = sample(&conn, ChangeOp::Delete);

        assert_eq!(s2, s1 + 1);
        assert_eq!(s3, s2 + 1);
        assert_eq!(max_sequence(&conn).unwrap(), s3);
    }

    #[test]
    fn test_read_since_orders_and_filters() {
        let conn = open_memory().unwrap();
        let s1 = sample(&conn, ChangeOp::Create);
        let _s2 = sample(&conn, ChangeOp::Update);
        let s3 = sample(&conn, ChangeOp::Delete);

        let all = read_since(&conn, 0, 100).unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.windows(2).all(|w| w[0].sequence < w[1].sequence));

        let later = read_since(&conn, s1, 100).unwrap();
        assert_eq!(later.len(), 2);
        assert_eq!(later.last().unwrap().sequence, s3);
    }

    #[test]
    fn test_read_since_respects_limit() {
        let conn = open_memory().unwrap();
        for _ in 0..5 {
            sample(&conn, ChangeOp::Create);
        }

        let page = read_since(&conn, 0, 2).unwrap();
        assert_eq!(page.len(), 2);
    }

    #[test]
    fn test_payload_round_trip() {
        let conn = open_memory().unwrap();
        let payload = serde_json::json!({"title": "Notes", "content": "body"});
        let id = Uuid::new_v4();

        append(
            &conn,
            id,
            EntityKind::Resource,
            ChangeOp::Create,
            Some(&payload),
            Utc::now(),
        )
        .unwrap();

        let records = read_since(&conn, 0, 10).unwrap();
        assert_eq!(records[0].entity_id, id);
        assert_eq!(records[0].payload, Some(payload));
    }

    #[test]
    fn test_prune_keeps_later_records() {
        let conn = open_memory().unwrap();
        let s1 = sample(&conn, ChangeOp::Create);
        let _s2 = sample(&conn, ChangeOp::Update);
        let s3 = sample(&conn, ChangeOp::Delete);

        let removed = prune(&conn, s1 + 1).unwrap();
        assert_eq!(removed, 2);

        let remaining = read_since(&conn, 0, 100).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].sequence, s3);
        assert_eq!(len(&conn).unwrap(), 1);
    }

    #[test]
    fn test_sequences_survive_prune() {
        let conn = open_memory().unwrap();
        let s1 = sample(&conn, ChangeOp::Create);
        prune(&conn, s1).unwrap();

        // New appends continue after the pruned range; numbers never reuse
        let s2 = sample(&conn, ChangeOp::Create);
        assert_eq!(s2, s1 + 1);
        assert_eq!(max_sequence(&conn).unwrap(), s2);
    }

    #[test]
    fn test_change_op_parse() {
        assert_eq!(ChangeOp::parse("create"), Some(ChangeOp::Create));
        assert_eq!(ChangeOp::parse("update"), Some(ChangeOp::Update));
        assert_eq!(ChangeOp::parse("delete"), Some(ChangeOp::Delete));
        assert_eq!(ChangeOp::parse("upsert"), None);
    }
}
