//! Pending-mutation store.
//!
//! Owns the per-identifier mutation queue: every append collapses the
//! incoming mutation with whatever is already pending and replaces the
//! persisted row in the same transaction. Confirmation of a sent
//! mutation only clears the row when nothing newer was appended while
//! the network call was in flight.
//!
//! Mutations for different identifiers are fully independent; each
//! identifier is guarded by its own lock so independent identifiers make
//! progress concurrently while a single identifier never has two
//! in-flight mutating operations.

use std::sync::{Arc, Mutex as StdMutex, MutexGuard};

use dashmap::DashMap;
use loft_engine::{collapse, CollapsedMutation, Identifier, Mutation, SequenceNumber};
use tokio::sync::Mutex as AsyncMutex;

use crate::persist::{PendingStore, StorageResult};

/// An owned view of one identifier's pending mutation at a point in time.
///
/// The sequence number doubles as the staleness check in
/// [`MutationStore::confirm_sent`] and as the source of the idempotency
/// token sent to the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingSnapshot {
    pub identifier: Identifier,
    pub mutation: CollapsedMutation,
    pub seq: SequenceNumber,
}

impl PendingSnapshot {
    /// Token the backend uses to recognize duplicate retries of the same
    /// logical mutation.
    pub fn idempotency_token(&self) -> String {
        format!("{}:{}", self.identifier, self.seq)
    }
}

/// Result of confirming a sent mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmOutcome {
    /// The sent mutation was current and has been removed.
    Cleared,
    /// A newer append happened while the send was in flight; the newer
    /// mutation stays pending and needs another sync.
    Superseded,
}

/// Durable per-identifier mutation queue with collapse on append.
pub struct MutationStore {
    db: StdMutex<PendingStore>,
    locks: DashMap<Identifier, Arc<AsyncMutex<()>>>,
}

impl MutationStore {
    /// Wrap a persistence layer.
    pub fn new(db: PendingStore) -> Self {
        Self {
            db: StdMutex::new(db),
            locks: DashMap::new(),
        }
    }

    fn lock_for(&self, identifier: &str) -> Arc<AsyncMutex<()>> {
        self.locks
            .entry(identifier.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    // Drops the identifier's lock entry once nobody holds or waits on
    // it, so the map does not grow one entry per identifier ever seen.
    // The count is the map's own reference plus the caller's clone.
    fn prune_lock(&self, identifier: &str) {
        self.locks
            .remove_if(identifier, |_, lock| Arc::strong_count(lock) <= 2);
    }

    // The db mutex is held only for the duration of one short
    // transaction; a poisoned lock still wraps a consistent connection.
    fn db(&self) -> MutexGuard<'_, PendingStore> {
        self.db.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Persist `mutation` collapsed with anything already pending for
    /// the identifier, replacing the old row in the same transaction.
    ///
    /// Returns the updated snapshot, or `None` when the collapse
    /// annihilated everything (the row is cleared and no sync is
    /// needed).
    pub async fn append(
        &self,
        identifier: &str,
        mutation: Mutation,
    ) -> StorageResult<Option<PendingSnapshot>> {
        let lock = self.lock_for(identifier);
        let result = {
            let _guard = lock.lock().await;
            self.append_locked(identifier, mutation)
        };
        self.prune_lock(identifier);
        result
    }

    fn append_locked(
        &self,
        identifier: &str,
        mutation: Mutation,
    ) -> StorageResult<Option<PendingSnapshot>> {
        let mut db = self.db();
        let pending = db.get(identifier)?;
        let collapsed = collapse(pending.as_ref().map(|row| &row.mutation), &mutation);

        if collapsed.is_empty() {
            if let Some(row) = pending {
                db.remove_if_seq(identifier, row.seq)?;
                tracing::debug!(identifier, "pending mutation annihilated by collapse");
            }
            return Ok(None);
        }

        let seq = db.upsert(identifier, &collapsed)?;
        tracing::debug!(identifier, seq, ops = collapsed.len(), "appended mutation");

        Ok(Some(PendingSnapshot {
            identifier: identifier.to_string(),
            mutation: collapsed,
            seq,
        }))
    }

    /// Current pending mutation for the identifier without consuming it.
    pub async fn peek(&self, identifier: &str) -> StorageResult<Option<PendingSnapshot>> {
        let row = self.db().get(identifier)?;
        Ok(row.map(|row| PendingSnapshot {
            identifier: row.identifier,
            mutation: row.mutation,
            seq: row.seq,
        }))
    }

    /// Remove the persisted mutation only if it is unchanged since
    /// `sent` was taken.
    pub async fn confirm_sent(&self, sent: &PendingSnapshot) -> StorageResult<ConfirmOutcome> {
        let lock = self.lock_for(&sent.identifier);
        let removed = {
            let _guard = lock.lock().await;
            self.db().remove_if_seq(&sent.identifier, sent.seq)
        };
        self.prune_lock(&sent.identifier);

        if removed? {
            Ok(ConfirmOutcome::Cleared)
        } else {
            tracing::debug!(identifier = %sent.identifier, seq = sent.seq, "confirm superseded");
            Ok(ConfirmOutcome::Superseded)
        }
    }

    /// Drop a mutation instance after an unrecoverable failure. Guarded
    /// by the snapshot's sequence number so a newer append survives.
    pub async fn discard(&self, sent: &PendingSnapshot) -> StorageResult<bool> {
        let lock = self.lock_for(&sent.identifier);
        let result = {
            let _guard = lock.lock().await;
            self.db().remove_if_seq(&sent.identifier, sent.seq)
        };
        self.prune_lock(&sent.identifier);
        result
    }

    /// All pending mutations, for process-start resume.
    pub async fn load_all_pending(&self) -> StorageResult<Vec<PendingSnapshot>> {
        let rows = self.db().load_all()?;
        Ok(rows
            .into_iter()
            .map(|row| PendingSnapshot {
                identifier: row.identifier,
                mutation: row.mutation,
                seq: row.seq,
            })
            .collect())
    }
}
