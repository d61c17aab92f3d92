//! Background task scheduler.
//!
//! Accepts task requests keyed by identity, serializes execution per
//! identity, applies exponential backoff with jitter, and drives the
//! store → network → confirm cycle to completion or terminal failure.
//!
//! # State machine per identity
//!
//! `Idle → Queued → Running → { Idle, Queued (retry), Idle (unrecoverable,
//! mutation dropped) }`. Two instances of one identity's task never run
//! simultaneously: a driver task is spawned only on the Idle → Queued
//! transition and is the sole consumer of that identity's queue. An
//! `enqueue` against a Running identity cancels the now-stale in-flight
//! send and marks the identity for re-run instead of running
//! concurrently.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use rand::Rng;
use tokio::sync::{mpsc, watch, Semaphore};

use crate::api::{MutationApi, Outcome};
use crate::config::SyncConfig;
use crate::store::{ConfirmOutcome, MutationStore};

/// What to do when a task with the same identity is already queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// Replace the queued request with this one.
    Replace,
    /// Keep the queued request and drop this one.
    Keep,
}

/// A request to run background sync work for one identity.
#[derive(Debug, Clone)]
pub struct TaskRequest {
    /// Task identity; one sync queue per identifier
    pub id: String,
    /// Conflict policy against an already-queued request
    pub policy: ConflictPolicy,
    /// Delay before the first attempt
    pub initial_delay: Duration,
    /// Park until the network-reachable signal holds
    pub requires_network: bool,
}

impl TaskRequest {
    /// Standard sync request for an identifier: run as soon as the
    /// network is reachable, keep any already-queued request.
    pub fn sync(identifier: impl Into<String>) -> Self {
        Self {
            id: identifier.into(),
            policy: ConflictPolicy::Keep,
            initial_delay: Duration::ZERO,
            requires_network: true,
        }
    }
}

/// Events surfaced upward for observability.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// A pending mutation was delivered and cleared.
    Synced { identifier: String },
    /// A mutation was dropped after an unrecoverable failure. Emitted
    /// exactly once per dropped mutation instance.
    SyncFailed { identifier: String, reason: String },
}

/// Exponential backoff with jitter.
///
/// The jittered delay grows strictly between consecutive failures until
/// it reaches the ceiling, and resets to the minimum on any success.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    min: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        // A zero base would never double away from zero
        let min = min.max(Duration::from_millis(1));
        Self {
            base: min,
            min,
            max,
        }
    }

    /// Next retry delay. Doubles the base each call; the jitter factor
    /// stays below the doubling factor so successive delays strictly
    /// grow until the ceiling.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.base;
        self.base = (self.base * 2).min(self.max);
        let jitter = rand::thread_rng().gen_range(1.0..1.5);
        base.mul_f64(jitter).min(self.max)
    }

    pub fn reset(&mut self) {
        self.base = self.min;
    }
}

#[derive(Debug)]
enum Status {
    Idle,
    Queued(TaskRequest),
    Running {
        rerun: bool,
        /// Cancels the in-flight send when the attempt is superseded or
        /// the scheduler shuts down
        attempt_cancel: watch::Sender<bool>,
    },
}

#[derive(Debug)]
struct IdentityState {
    status: Status,
    backoff: Backoff,
}

/// What the driver does after one attempt.
enum Next {
    /// Done; return to idle unless a re-run was requested.
    Idle,
    /// Retryable failure; requeue after the backoff delay.
    Retry(Duration),
    /// Attempt superseded by a newer append; requeue immediately.
    Rerun,
}

/// Serializes and retries background sync work.
///
/// Cheap to clone; all clones share one state arena.
#[derive(Clone)]
pub struct TaskScheduler {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<MutationStore>,
    api: Arc<dyn MutationApi>,
    config: SyncConfig,
    states: DashMap<String, IdentityState>,
    reachable: watch::Receiver<bool>,
    cancel: watch::Sender<bool>,
    events: mpsc::UnboundedSender<SyncEvent>,
    permits: Arc<Semaphore>,
}

impl TaskScheduler {
    /// Create a scheduler driving `store` through `api`.
    ///
    /// `reachable` is the external connectivity signal; parked tasks are
    /// re-checked when it changes and at most every `poll_interval`.
    pub fn new(
        store: Arc<MutationStore>,
        api: Arc<dyn MutationApi>,
        config: SyncConfig,
        reachable: watch::Receiver<bool>,
        events: mpsc::UnboundedSender<SyncEvent>,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_syncs));
        let (cancel, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                store,
                api,
                config,
                states: DashMap::new(),
                reachable,
                cancel,
                events,
                permits,
            }),
        }
    }

    /// Queue background work for a task identity.
    pub fn enqueue(&self, request: TaskRequest) {
        let id = request.id.clone();
        let mut spawn = false;
        {
            let mut entry = self
                .inner
                .states
                .entry(id.clone())
                .or_insert_with(|| IdentityState {
                    status: Status::Idle,
                    backoff: Backoff::new(
                        self.inner.config.backoff_min,
                        self.inner.config.backoff_max,
                    ),
                });
            let state = entry.value_mut();
            match &mut state.status {
                Status::Idle => {
                    state.status = Status::Queued(request);
                    spawn = true;
                }
                Status::Queued(existing) => match request.policy {
                    ConflictPolicy::Replace => *existing = request,
                    ConflictPolicy::Keep => {}
                },
                Status::Running {
                    rerun,
                    attempt_cancel,
                } => {
                    // Never run two instances concurrently; cancel the
                    // now-stale in-flight send and re-run on completion
                    *rerun = true;
                    let _ = attempt_cancel.send(true);
                }
            }
        }

        if spawn {
            tracing::debug!(id, "task queued");
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move { drive(inner, id).await });
        }
    }

    /// Whether the identity has queued or running work.
    pub fn has_work(&self, id: &str) -> bool {
        self.inner
            .states
            .get(id)
            .map(|state| !matches!(state.status, Status::Idle))
            .unwrap_or(false)
    }

    /// Stop all drivers and cancel in-flight sends. Pending mutations
    /// stay persisted and resume on the next start.
    pub fn shutdown(&self) {
        tracing::info!("scheduler shutting down");
        let _ = self.inner.cancel.send(true);
        for entry in self.inner.states.iter() {
            if let Status::Running { attempt_cancel, .. } = &entry.status {
                let _ = attempt_cancel.send(true);
            }
        }
    }
}

async fn drive(inner: Arc<Inner>, id: String) {
    loop {
        let Some(request) = inner.queued_request(&id) else {
            break;
        };

        if !inner.wait_until_runnable(&request).await {
            // Shutdown while waiting; leave the queued request behind
            break;
        }

        let Some(attempt_cancel) = inner.start_running(&id) else {
            break;
        };

        // Bounded worker pool across identifiers
        let permit = match Arc::clone(&inner.permits).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };
        let next = inner.run_attempt(&id, attempt_cancel).await;
        drop(permit);

        if !inner.finish(&id, next) {
            break;
        }
    }
}

impl Inner {
    fn queued_request(&self, id: &str) -> Option<TaskRequest> {
        let state = self.states.get(id)?;
        match &state.status {
            Status::Queued(request) => Some(request.clone()),
            _ => None,
        }
    }

    /// Wait out the request's delay and preconditions. Returns `false`
    /// on shutdown.
    async fn wait_until_runnable(&self, request: &TaskRequest) -> bool {
        let mut cancel = self.cancel.subscribe();

        if !request.initial_delay.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(request.initial_delay) => {}
                _ = cancel.wait_for(|c| *c) => return false,
            }
        }

        if request.requires_network {
            let mut reachable = self.reachable.clone();
            let mut signal_alive = true;
            loop {
                if *reachable.borrow_and_update() {
                    break;
                }
                tracing::debug!(id = %request.id, "task parked awaiting network");
                if signal_alive {
                    tokio::select! {
                        changed = reachable.changed() => {
                            if changed.is_err() {
                                // Signal source gone; fall back to polling
                                signal_alive = false;
                            }
                        }
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                        _ = cancel.wait_for(|c| *c) => return false,
                    }
                } else {
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                        _ = cancel.wait_for(|c| *c) => return false,
                    }
                }
            }
        }

        let cancelled = *cancel.borrow();
        !cancelled
    }

    /// Transition Queued → Running. Returns the receiver for the
    /// attempt-scoped cancel signal, or `None` when the task was
    /// replaced underneath the driver.
    fn start_running(&self, id: &str) -> Option<watch::Receiver<bool>> {
        let mut entry = self.states.get_mut(id)?;
        let state = entry.value_mut();
        if matches!(state.status, Status::Queued(_)) {
            let (attempt_cancel, attempt_rx) = watch::channel(false);
            state.status = Status::Running {
                rerun: false,
                attempt_cancel,
            };
            Some(attempt_rx)
        } else {
            None
        }
    }

    /// One sync attempt: peek, send, confirm.
    async fn run_attempt(&self, id: &str, attempt_cancel: watch::Receiver<bool>) -> Next {
        let snapshot = match self.store.peek(id).await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                // Nothing pending; the queue was cleared or collapsed away
                self.reset_backoff(id);
                return Next::Idle;
            }
            Err(err) => {
                tracing::error!(identifier = id, %err, "failed to read pending mutation");
                return Next::Retry(self.next_backoff(id));
            }
        };

        match self.api.send(&snapshot, attempt_cancel.clone()).await {
            Outcome::Success => match self.store.confirm_sent(&snapshot).await {
                Ok(ConfirmOutcome::Cleared) => {
                    tracing::info!(identifier = id, seq = snapshot.seq, "mutation synced");
                    self.emit(SyncEvent::Synced {
                        identifier: id.to_string(),
                    });
                    self.reset_backoff(id);
                    Next::Idle
                }
                Ok(ConfirmOutcome::Superseded) => {
                    // Implicit success for this attempt; the newer
                    // pending state needs its own sync
                    self.reset_backoff(id);
                    Next::Rerun
                }
                Err(err) => {
                    tracing::error!(identifier = id, %err, "failed to confirm sent mutation");
                    Next::Retry(self.next_backoff(id))
                }
            },
            Outcome::Retryable(reason) => {
                let superseded = *attempt_cancel.borrow() && !*self.cancel.borrow();
                if superseded {
                    // Cancelled because a newer append landed mid-flight;
                    // resync the fresh payload straight away
                    tracing::debug!(identifier = id, "in-flight send superseded");
                    Next::Rerun
                } else {
                    tracing::warn!(identifier = id, %reason, "retryable sync failure");
                    Next::Retry(self.next_backoff(id))
                }
            }
            Outcome::Unrecoverable(reason) => {
                tracing::error!(identifier = id, %reason, "unrecoverable sync failure, dropping mutation");
                if let Err(err) = self.store.discard(&snapshot).await {
                    tracing::error!(identifier = id, %err, "failed to discard mutation");
                }
                self.emit(SyncEvent::SyncFailed {
                    identifier: id.to_string(),
                    reason,
                });
                self.reset_backoff(id);
                Next::Idle
            }
        }
    }

    /// Apply the attempt result to the state machine. Returns whether
    /// the driver loop continues.
    fn finish(&self, id: &str, next: Next) -> bool {
        if *self.cancel.borrow() {
            return false;
        }
        let Some(mut entry) = self.states.get_mut(id) else {
            return false;
        };
        let state = entry.value_mut();
        let rerun_requested = matches!(state.status, Status::Running { rerun: true, .. });

        match next {
            Next::Retry(delay) => {
                state.status = Status::Queued(TaskRequest {
                    id: id.to_string(),
                    policy: ConflictPolicy::Keep,
                    initial_delay: delay,
                    requires_network: true,
                });
                true
            }
            Next::Rerun => {
                state.status = Status::Queued(TaskRequest::sync(id));
                true
            }
            Next::Idle => {
                if rerun_requested {
                    state.status = Status::Queued(TaskRequest::sync(id));
                    true
                } else {
                    state.status = Status::Idle;
                    drop(entry);
                    // Quiescent identities leave the arena so a long-lived
                    // host does not accumulate one entry per identifier
                    // ever seen
                    self.states
                        .remove_if(id, |_, state| matches!(state.status, Status::Idle));
                    false
                }
            }
        }
    }

    fn next_backoff(&self, id: &str) -> Duration {
        self.states
            .get_mut(id)
            .map(|mut state| state.backoff.next_delay())
            .unwrap_or(self.config.backoff_min)
    }

    fn reset_backoff(&self, id: &str) {
        if let Some(mut state) = self.states.get_mut(id) {
            state.backoff.reset();
        }
    }

    fn emit(&self, event: SyncEvent) {
        // Receiver may have been dropped; events are best-effort
        let _ = self.events.send(event);
    }
}
