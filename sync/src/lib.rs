//! # Loft Sync
//!
//! Durable mutation sync for the Loft audience-engagement SDK.
//!
//! This crate reliably propagates accumulating local state changes
//! (attribute and tag-group mutations keyed by a channel or named-user
//! identifier) to a remote service despite intermittent connectivity and
//! backend faults:
//!
//! - [`MutationStore`] owns the per-identifier pending queue, collapsing
//!   every append with what is already pending (via `loft-engine`) and
//!   persisting the result through [`PendingStore`], a transactional
//!   SQLite layer that survives process restarts.
//! - [`TaskScheduler`] serializes background sync work per identifier,
//!   parks tasks on unmet preconditions (network reachability), and
//!   retries retryable failures with bounded exponential backoff.
//! - [`ApiClient`] builds one "apply mutation" request per attempt and
//!   classifies the result as success, retryable, or unrecoverable.
//!
//! [`SyncEngine`] ties the pieces together for embedding hosts.
//!
//! Delivery is exactly-once-effective: the idempotency token derived
//! from the persisted sequence number lets the backend recognize retries
//! of the same logical mutation, and a confirmation is applied only if
//! no newer append happened while the send was in flight.

pub mod api;
pub mod config;
pub mod error;
pub mod persist;
pub mod scheduler;
pub mod store;

pub use api::{ApiClient, MutationApi, Outcome};
pub use config::{ConfigError, SyncConfig};
pub use error::{Result, SyncError};
pub use persist::{PendingStore, PersistedRow, StorageError};
pub use scheduler::{Backoff, ConflictPolicy, SyncEvent, TaskRequest, TaskScheduler};
pub use store::{ConfirmOutcome, MutationStore, PendingSnapshot};

use std::sync::Arc;

use loft_engine::{JsonPredicate, Mutation};
use tokio::sync::{mpsc, watch};

/// The automation-and-sync core, wired together.
///
/// An external rule engine evaluates trigger conditions through
/// [`SyncEngine::evaluate`]; a match records a state change through
/// [`SyncEngine::record_mutation`], which persists, collapses, and
/// schedules delivery for the owning identifier.
pub struct SyncEngine {
    store: Arc<MutationStore>,
    scheduler: TaskScheduler,
    reachable: watch::Sender<bool>,
}

impl SyncEngine {
    /// Wire a store and an API implementation together.
    ///
    /// Returns the engine and the stream of sync events (completions and
    /// unrecoverable failures) for the host to observe.
    pub fn new(
        config: SyncConfig,
        db: PendingStore,
        api: Arc<dyn MutationApi>,
    ) -> (Self, mpsc::UnboundedReceiver<SyncEvent>) {
        let store = Arc::new(MutationStore::new(db));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        // Assume reachable until the host reports otherwise
        let (reachable_tx, reachable_rx) = watch::channel(true);
        let scheduler = TaskScheduler::new(
            Arc::clone(&store),
            api,
            config,
            reachable_rx,
            events_tx,
        );

        (
            Self {
                store,
                scheduler,
                reachable: reachable_tx,
            },
            events_rx,
        )
    }

    /// Wire the engine to the HTTP [`ApiClient`] described by `config`.
    pub fn with_http(
        config: SyncConfig,
        db: PendingStore,
    ) -> Result<(Self, mpsc::UnboundedReceiver<SyncEvent>)> {
        let api = Arc::new(ApiClient::new(&config)?);
        Ok(Self::new(config, db, api))
    }

    /// Evaluate a trigger condition against an event payload.
    ///
    /// Pure and total; never fails on malformed input.
    pub fn evaluate(predicate: &JsonPredicate, event: &serde_json::Value) -> bool {
        predicate.matches(event)
    }

    /// Record a local state change for an identifier.
    ///
    /// The mutation is persisted and collapsed with anything already
    /// pending; a sync task is enqueued unless the collapse annihilated
    /// everything. Network failures are handled internally and never
    /// surface here.
    pub async fn record_mutation(
        &self,
        identifier: &str,
        mutation: Mutation,
    ) -> Result<()> {
        if let Some(snapshot) = self.store.append(identifier, mutation).await? {
            tracing::debug!(identifier, seq = snapshot.seq, "scheduling sync");
            self.scheduler.enqueue(TaskRequest::sync(identifier));
        }
        Ok(())
    }

    /// Resume interrupted syncs after a process restart.
    ///
    /// Enqueues one sync task per identifier with a persisted pending
    /// mutation; returns how many were resumed.
    pub async fn resume(&self) -> Result<usize> {
        let pending = self.store.load_all_pending().await?;
        let count = pending.len();
        for snapshot in pending {
            self.scheduler.enqueue(TaskRequest::sync(snapshot.identifier));
        }
        if count > 0 {
            tracing::info!(count, "resumed pending syncs");
        }
        Ok(count)
    }

    /// Feed the external connectivity signal. Parked tasks re-check
    /// promptly when reachability is regained.
    pub fn set_reachable(&self, reachable: bool) {
        let _ = self.reachable.send(reachable);
    }

    /// Direct access to the mutation store.
    pub fn store(&self) -> &Arc<MutationStore> {
        &self.store
    }

    /// Whether an identifier has queued or running sync work.
    pub fn has_work(&self, identifier: &str) -> bool {
        self.scheduler.has_work(identifier)
    }

    /// Cancel in-flight work. Pending mutations stay persisted and
    /// resume on the next start.
    pub fn shutdown(&self) {
        self.scheduler.shutdown();
    }
}
