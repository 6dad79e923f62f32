//! Auto-save coordinator.
//!
//! Coalesces bursts of state changes into as few writes as possible:
//!
//! - each session has a bounded queue of pending states (oldest dropped)
//! - at most one write per session is in flight
//! - a drain persists only the newest pending state and discards the rest
//! - transient store failures are retried with exponential backoff
//! - a state that fails validation is refused and never queued
//!
//! A state queued while a write is in flight is picked up once that write
//! finishes, whichever caller was holding the drain lock.
//!
//! States are stamped with the schema version when they are drained, so
//! `lastModified` is the time of the write, not of the enqueue.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use dashmap::DashMap;
use storyloom_domain::{GameState, SessionKey, VersionedState};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use super::events::{EngineEvent, SaveStatus};
use super::validation::{validate, ValidationError};
use super::versioning::StateVersioner;
use crate::infrastructure::ports::{ClockPort, SessionStore, StoreError};
use crate::infrastructure::retry::RetryConfig;

/// Default number of pending states kept per session.
pub const DEFAULT_QUEUE_CAPACITY: usize = 16;

const NEVER_SAVED: i64 = i64::MIN;

#[derive(Debug, Clone)]
pub struct SaveQueueConfig {
    pub capacity: usize,
    pub retry: RetryConfig,
    /// Minimum time between automatic saves
    pub autosave_interval: Duration,
}

impl Default for SaveQueueConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_QUEUE_CAPACITY,
            retry: RetryConfig {
                max_retries: 3,
                base_delay_ms: 250,
                max_delay_ms: 5000,
                jitter_factor: 0.2,
            },
            autosave_interval: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SaveError {
    #[error("Save failed after {attempts} attempt(s): {last_error}")]
    Exhausted { attempts: u32, last_error: StoreError },

    #[error("Store rejected the save: {0}")]
    Rejected(StoreError),

    #[error("Save cancelled by shutdown")]
    Cancelled,

    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

struct SessionSlot {
    pending: Mutex<VecDeque<GameState>>,
    /// Held for the whole duration of a drain
    drain_lock: tokio::sync::Mutex<()>,
    in_flight: AtomicBool,
    /// Unix millis of the last successful write
    last_saved_ms: AtomicI64,
    /// States ever enqueued; only changed with `pending` locked
    enqueued: AtomicU64,
    /// Value of `enqueued` when a drain last took from the queue
    taken: AtomicU64,
}

impl Default for SessionSlot {
    fn default() -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
            drain_lock: tokio::sync::Mutex::new(()),
            in_flight: AtomicBool::new(false),
            last_saved_ms: AtomicI64::new(NEVER_SAVED),
            enqueued: AtomicU64::new(0),
            taken: AtomicU64::new(0),
        }
    }
}

impl SessionSlot {
    fn pending(&self) -> MutexGuard<'_, VecDeque<GameState>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Newest pending state; everything older is superseded.
    fn take_latest(&self) -> Option<GameState> {
        let mut pending = self.pending();
        self.taken.store(self.enqueued.load(Ordering::Acquire), Ordering::Release);
        let latest = pending.pop_back();
        pending.clear();
        latest
    }

    /// Drop everything pending in favour of a state saved directly.
    fn supersede_pending(&self) {
        let mut pending = self.pending();
        self.taken.store(self.enqueued.load(Ordering::Acquire), Ordering::Release);
        pending.clear();
    }

    /// Something was enqueued since the last drain took from the queue.
    fn has_untaken(&self) -> bool {
        let _pending = self.pending();
        self.enqueued.load(Ordering::Acquire) > self.taken.load(Ordering::Acquire)
    }

    /// Put a state that failed to save back, unless something newer arrived.
    fn restore(&self, state: GameState) {
        let mut pending = self.pending();
        if pending.is_empty() {
            pending.push_back(state);
        }
    }
}

pub struct SaveQueue {
    store: Arc<dyn SessionStore>,
    versioner: StateVersioner,
    clock: Arc<dyn ClockPort>,
    config: SaveQueueConfig,
    slots: DashMap<SessionKey, Arc<SessionSlot>>,
    events: broadcast::Sender<EngineEvent>,
    shutdown: CancellationToken,
}

impl SaveQueue {
    pub fn new(
        store: Arc<dyn SessionStore>,
        clock: Arc<dyn ClockPort>,
        config: SaveQueueConfig,
        events: broadcast::Sender<EngineEvent>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            store,
            versioner: StateVersioner::new(clock.clone()),
            clock,
            config,
            slots: DashMap::new(),
            events,
            shutdown,
        }
    }

    fn slot(&self, key: &SessionKey) -> Arc<SessionSlot> {
        self.slots.entry(key.clone()).or_default().clone()
    }

    fn emit(&self, status: SaveStatus) {
        // No subscribers is fine
        let _ = self.events.send(EngineEvent::Save(status));
    }

    /// Refuse states that would make the session unresumable once stored.
    fn check(&self, key: &SessionKey, state: &GameState) -> Result<(), ValidationError> {
        let result = validate(state).into_result();
        if let Err(e) = &result {
            tracing::warn!(session_key = %key, error = %e, "Refusing to save invalid state");
            self.emit(SaveStatus::Failed {
                session_key: key.clone(),
                error: SaveError::Invalid(e.clone()),
            });
        }
        result
    }

    /// Queue a state for saving and kick off a background drain.
    ///
    /// An invalid state is refused and the queue is left as it was.
    pub fn enqueue(self: &Arc<Self>, state: GameState, key: &SessionKey) -> Result<(), ValidationError> {
        self.check(key, &state)?;

        let slot = self.slot(key);
        let pending = {
            let mut pending = slot.pending();
            if pending.len() >= self.config.capacity.max(1) {
                pending.pop_front();
                tracing::debug!(session_key = %key, "Save queue full, dropped oldest pending state");
            }
            pending.push_back(state);
            slot.enqueued.fetch_add(1, Ordering::AcqRel);
            pending.len()
        };
        self.emit(SaveStatus::Queued {
            session_key: key.clone(),
            pending,
        });

        let queue = Arc::clone(self);
        let key = key.clone();
        tokio::spawn(async move {
            let slot = queue.slot(&key);
            queue.settle(&slot, &key).await;
        });
        Ok(())
    }

    /// Drain whatever was enqueued since the last drain took from the queue.
    ///
    /// Gives up as soon as someone else holds the lock: every lock holder
    /// comes back here after releasing it, so the newest state is never
    /// stranded.
    async fn settle(&self, slot: &SessionSlot, key: &SessionKey) -> Option<Result<VersionedState, SaveError>> {
        let mut outcome = None;
        while slot.has_untaken() {
            let Ok(guard) = slot.drain_lock.try_lock() else {
                break;
            };
            if let Some(result) = self.drain_locked(slot, key).await {
                outcome = Some(result);
            }
            drop(guard);
        }
        outcome
    }

    /// Wait for any in-flight save, then persist the newest pending state.
    ///
    /// `Ok(None)` means there was nothing to save.
    pub async fn flush(&self, key: &SessionKey) -> Result<Option<VersionedState>, SaveError> {
        let slot = self.slot(key);
        let outcome = {
            let _guard = slot.drain_lock.lock().await;
            self.drain_locked(&slot, key).await
        };
        let later = self.settle(&slot, key).await;
        later.or(outcome).transpose()
    }

    /// Save `state` right away, superseding anything still pending.
    ///
    /// States enqueued while this write is in flight are saved after it.
    pub async fn save_now(&self, state: GameState, key: &SessionKey) -> Result<VersionedState, SaveError> {
        self.check(key, &state)?;

        let slot = self.slot(key);
        let result = {
            let _guard = slot.drain_lock.lock().await;
            slot.supersede_pending();
            self.persist_state(&slot, key, state).await
        };
        self.settle(&slot, key).await;
        result
    }

    /// Persist the newest pending state, again while newer ones keep
    /// arriving. Caller must hold `drain_lock`.
    async fn drain_locked(
        &self,
        slot: &SessionSlot,
        key: &SessionKey,
    ) -> Option<Result<VersionedState, SaveError>> {
        let mut outcome = None;
        while let Some(state) = slot.take_latest() {
            let result = self.persist_state(slot, key, state).await;
            let cancelled = matches!(result, Err(SaveError::Cancelled));
            outcome = Some(result);
            // A failed state is only requeued when nothing newer arrived,
            // so this never retries the same state back to back.
            if cancelled || !slot.has_untaken() {
                break;
            }
        }
        outcome
    }

    async fn persist_state(
        &self,
        slot: &SessionSlot,
        key: &SessionKey,
        state: GameState,
    ) -> Result<VersionedState, SaveError> {
        let record = self.versioner.stamp(&state);

        slot.in_flight.store(true, Ordering::Release);
        let result = self.persist_with_retry(key, &record).await;
        slot.in_flight.store(false, Ordering::Release);

        match result {
            Ok(()) => {
                slot.last_saved_ms
                    .store(self.clock.now().timestamp_millis(), Ordering::Release);
                tracing::info!(
                    session_key = %key,
                    history = record.state.history.len(),
                    last_modified = %record.last_modified,
                    "Session saved"
                );
                self.emit(SaveStatus::Saved {
                    session_key: key.clone(),
                    last_modified: record.last_modified.clone(),
                });
                Ok(record)
            }
            Err(e) => {
                tracing::error!(session_key = %key, error = %e, "Session save failed");
                slot.restore(state);
                self.emit(SaveStatus::Failed {
                    session_key: key.clone(),
                    error: e.clone(),
                });
                Err(e)
            }
        }
    }

    async fn persist_with_retry(&self, key: &SessionKey, record: &VersionedState) -> Result<(), SaveError> {
        let max_retries = self.config.retry.max_retries;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let error = match self.store.persist(key, record).await {
                Ok(()) => {
                    if attempt > 1 {
                        tracing::info!(session_key = %key, attempt, "Save succeeded after retry");
                    }
                    return Ok(());
                }
                Err(e) => e,
            };

            if !error.is_retryable() {
                return Err(SaveError::Rejected(error));
            }
            if attempt > max_retries {
                return Err(SaveError::Exhausted {
                    attempts: attempt,
                    last_error: error,
                });
            }

            let delay = self.config.retry.delay_for(attempt);
            tracing::warn!(
                session_key = %key,
                attempt,
                max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Save failed, retrying after delay"
            );

            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    tracing::info!(session_key = %key, "Save retry interrupted by shutdown");
                    return Err(SaveError::Cancelled);
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// True if the session was never saved, or the autosave interval has
    /// passed since its last successful save.
    pub fn should_auto_save(&self, key: &SessionKey) -> bool {
        let Some(slot) = self.slots.get(key) else {
            return true;
        };
        let last = slot.last_saved_ms.load(Ordering::Acquire);
        if last == NEVER_SAVED {
            return true;
        }
        let elapsed = self.clock.now().timestamp_millis().saturating_sub(last);
        elapsed >= self.config.autosave_interval.as_millis() as i64
    }

    pub fn is_saving(&self, key: &SessionKey) -> bool {
        self.slots
            .get(key)
            .is_some_and(|slot| slot.in_flight.load(Ordering::Acquire))
    }

    pub fn pending_count(&self, key: &SessionKey) -> usize {
        self.slots.get(key).map_or(0, |slot| slot.pending().len())
    }
}
