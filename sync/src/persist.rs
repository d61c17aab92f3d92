//! SQLite-backed durable storage for pending mutations.
//!
//! One row per identifier holding its single collapsed pending mutation,
//! plus a monotonic counter that orders writes across process restarts.
//! Every write happens inside a transaction: a crash at any point leaves
//! either the previous or the new row, never a partial one.

use std::path::Path;

use loft_engine::{CollapsedMutation, Identifier, SequenceNumber, Timestamp};
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

/// Errors from the persistence layer.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("payload codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Result type for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// The durable representation of one identifier's pending mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedRow {
    pub identifier: Identifier,
    pub seq: SequenceNumber,
    pub created_at: Timestamp,
    pub mutation: CollapsedMutation,
}

/// SQLite store mapping each identifier to its single pending row.
pub struct PendingStore {
    conn: Connection,
}

impl PendingStore {
    /// Opens or creates a store at `path`.
    ///
    /// Enables WAL mode and sets `synchronous=NORMAL`.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let conn = Connection::open(path)?;
        Self::init_connection(conn)
    }

    /// Opens an in-memory store.
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_connection(conn)
    }

    fn init_connection(conn: Connection) -> StorageResult<Self> {
        conn.execute_batch(include_str!("schema.sql"))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Ok(Self { conn })
    }

    /// Replaces the identifier's pending row with `mutation` inside one
    /// transaction, bumping the monotonic counter. Returns the sequence
    /// number assigned to the new row.
    pub fn upsert(
        &mut self,
        identifier: &str,
        mutation: &CollapsedMutation,
    ) -> StorageResult<SequenceNumber> {
        let payload = serde_json::to_vec(mutation)?;
        let tx = self.conn.transaction()?;

        let seq: i64 = tx.query_row("SELECT next_seq FROM counter WHERE id = 0", [], |row| {
            row.get(0)
        })?;
        tx.execute("UPDATE counter SET next_seq = ?1 WHERE id = 0", [seq + 1])?;
        tx.execute(
            "INSERT INTO pending (identifier, seq, created_at, payload) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(identifier) DO UPDATE SET
                 seq = excluded.seq,
                 created_at = excluded.created_at,
                 payload = excluded.payload",
            params![identifier, seq, mutation.created_at as i64, payload],
        )?;

        tx.commit()?;
        Ok(seq as SequenceNumber)
    }

    /// Deletes the identifier's row only if it still carries `seq`.
    ///
    /// Returns `false` when the row was superseded by a newer write (or
    /// already gone); the caller must leave the newer row alone.
    pub fn remove_if_seq(&mut self, identifier: &str, seq: SequenceNumber) -> StorageResult<bool> {
        let deleted = self.conn.execute(
            "DELETE FROM pending WHERE identifier = ?1 AND seq = ?2",
            params![identifier, seq as i64],
        )?;
        Ok(deleted > 0)
    }

    /// Reads the identifier's pending row, if any.
    pub fn get(&self, identifier: &str) -> StorageResult<Option<PersistedRow>> {
        let row = self
            .conn
            .query_row(
                "SELECT seq, created_at, payload FROM pending WHERE identifier = ?1",
                params![identifier],
                |row| {
                    let seq: i64 = row.get(0)?;
                    let created_at: i64 = row.get(1)?;
                    let payload: Vec<u8> = row.get(2)?;
                    Ok((seq, created_at, payload))
                },
            )
            .optional()?;

        let Some((seq, created_at, payload)) = row else {
            return Ok(None);
        };

        let mutation: CollapsedMutation = serde_json::from_slice(&payload)?;
        Ok(Some(PersistedRow {
            identifier: identifier.to_string(),
            seq: seq as SequenceNumber,
            created_at: created_at as Timestamp,
            mutation,
        }))
    }

    /// Loads every pending row, ordered by sequence number. Used at
    /// process start to resume interrupted syncs.
    pub fn load_all(&self) -> StorageResult<Vec<PersistedRow>> {
        let mut stmt = self
            .conn
            .prepare("SELECT identifier, seq, created_at, payload FROM pending ORDER BY seq ASC")?;

        let rows = stmt.query_map([], |row| {
            let identifier: String = row.get(0)?;
            let seq: i64 = row.get(1)?;
            let created_at: i64 = row.get(2)?;
            let payload: Vec<u8> = row.get(3)?;
            Ok((identifier, seq, created_at, payload))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (identifier, seq, created_at, payload) = row?;
            let mutation: CollapsedMutation = serde_json::from_slice(&payload)?;
            out.push(PersistedRow {
                identifier,
                seq: seq as SequenceNumber,
                created_at: created_at as Timestamp,
                mutation,
            });
        }
        Ok(out)
    }
}
