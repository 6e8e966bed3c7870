use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, warn};

use crate::config::Config;
use crate::event::{Event, Fields};
use crate::flush_gate::{FlushGate, FlushPermit};
use crate::metadata::MetadataManager;
use crate::probe::RuntimeProbe;
use crate::queue::EventQueue;
use crate::retry;
use crate::store::{EventStore, StoreError};
use crate::transport::{Disposition, Transport};

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("dispatcher has not been initialized")]
    NotInitialized,

    #[error("init() called while initialization is already in progress")]
    InitInProgress,

    #[error("dispatcher is disposed; call init() to start a new lifecycle")]
    Disposed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Uninitialized,
    Initializing,
    Running,
    Disposed,
}

/// Mutable state behind the single state mutex. Queue, lifecycle, and
/// task handles live together so there is no lock ordering to get wrong.
/// The lock is never held across an `.await`.
struct DispatchState {
    lifecycle: Lifecycle,
    queue: EventQueue,
    /// Scheduled and auto flushes are suppressed until this instant while
    /// a retry backoff is pending. Explicit `flush()` calls ignore it.
    backoff_until: Option<Instant>,
    gate: FlushGate,
    cancel: CancellationToken,
    tasks: TaskTracker,
}

impl DispatchState {
    fn new() -> Self {
        Self {
            lifecycle: Lifecycle::Uninitialized,
            queue: EventQueue::new(None),
            backoff_until: None,
            gate: FlushGate::new(),
            cancel: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }
    }

    fn in_backoff(&self) -> bool {
        self.backoff_until.is_some_and(|until| Instant::now() < until)
    }
}

/// Core event pipeline: enqueue, scheduled/auto/manual flush, batching,
/// retry with backoff, and persistence sync.
///
/// Cheap to clone; background tasks hold clones. Must be driven from
/// within a tokio runtime.
pub struct Dispatcher<T, S, P> {
    transport: Arc<T>,
    store: Arc<S>,
    probe: Arc<P>,
    metadata: Arc<MetadataManager>,
    config: Arc<Config>,
    state: Arc<Mutex<DispatchState>>,
    /// Serializes persistence writes. Each writer snapshots the queue
    /// after acquiring, so the last writer wins and no stale snapshot
    /// can overwrite a newer one.
    save_lock: Arc<tokio::sync::Mutex<()>>,
}

impl<T, S, P> Clone for Dispatcher<T, S, P> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            store: Arc::clone(&self.store),
            probe: Arc::clone(&self.probe),
            metadata: Arc::clone(&self.metadata),
            config: Arc::clone(&self.config),
            state: Arc::clone(&self.state),
            save_lock: Arc::clone(&self.save_lock),
        }
    }
}

impl<T: Transport, S: EventStore, P: RuntimeProbe> Dispatcher<T, S, P> {
    pub fn new(
        config: Config,
        transport: T,
        store: S,
        probe: Arc<P>,
        metadata: Arc<MetadataManager>,
    ) -> Self {
        Self {
            transport: Arc::new(transport),
            store: Arc::new(store),
            probe,
            metadata,
            config: Arc::new(config),
            state: Arc::new(Mutex::new(DispatchState::new())),
            save_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// Load the persisted slot, start the flush timer, and transition to
    /// running. Idempotent while running; legal again after dispose.
    pub async fn init(&self) -> Result<(), LifecycleError> {
        {
            let mut state = self.state.lock().unwrap();
            match state.lifecycle {
                Lifecycle::Running => return Ok(()),
                Lifecycle::Initializing => return Err(LifecycleError::InitInProgress),
                Lifecycle::Uninitialized | Lifecycle::Disposed => {
                    state.lifecycle = Lifecycle::Initializing;
                }
            }
        }

        let loaded = match self.store.load().await {
            Ok(events) => events,
            Err(e) => {
                error!(error = %e, "failed to load persisted events, starting empty");
                Vec::new()
            }
        };
        if !loaded.is_empty() {
            debug!(count = loaded.len(), "restored persisted events");
        }

        if let Some(max) = self.config.max_buffer_size
            && max < self.config.max_batch_size
        {
            warn!(
                max_buffer_size = max,
                max_batch_size = self.config.max_batch_size,
                "buffer capacity is below the batch size, batches will never fill"
            );
        }

        let (cancel, tasks) = {
            let mut state = self.state.lock().unwrap();
            if state.lifecycle != Lifecycle::Initializing {
                // dispose() won the race while we were loading.
                return Err(LifecycleError::Disposed);
            }
            let mut queue = EventQueue::new(self.config.max_buffer_size);
            for event in loaded {
                queue.push(event);
            }
            state.queue = queue;
            state.backoff_until = None;
            state.gate = FlushGate::new();
            state.cancel = CancellationToken::new();
            state.tasks = TaskTracker::new();
            state.lifecycle = Lifecycle::Running;
            (state.cancel.clone(), state.tasks.clone())
        };

        let dispatcher = self.clone();
        tasks.spawn(async move { dispatcher.run_timer(cancel).await });
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().unwrap().lifecycle == Lifecycle::Running
    }

    /// Number of events currently buffered.
    pub fn pending(&self) -> usize {
        self.state.lock().unwrap().queue.len()
    }

    /// Snapshot ambient context, stamp the event, and buffer it.
    ///
    /// Non-blocking: persistence sync and any triggered flush run on
    /// background tasks, never on the caller's stack.
    pub fn enqueue(
        &self,
        name: impl Into<String>,
        payload: Option<Fields>,
        metadata_overrides: Option<Fields>,
    ) -> Result<(), LifecycleError> {
        let event = self.build_event(name.into(), payload, metadata_overrides);

        let should_flush = {
            let mut state = self.state.lock().unwrap();
            match state.lifecycle {
                Lifecycle::Running => {}
                Lifecycle::Disposed => return Err(LifecycleError::Disposed),
                Lifecycle::Uninitialized | Lifecycle::Initializing => {
                    return Err(LifecycleError::NotInitialized);
                }
            }
            state.queue.push(event);
            state.queue.len() >= self.config.max_batch_size && !state.in_backoff()
        };

        self.schedule_save();
        if should_flush {
            self.schedule_flush();
        }
        Ok(())
    }

    /// Run one flush cycle: take a batch, persist the remainder, send,
    /// classify. Concurrent callers serialize on the gate; a caller that
    /// finds the queue already drained returns without a transport call.
    pub async fn flush(&self) -> Result<(), LifecycleError> {
        let gate = {
            let state = self.state.lock().unwrap();
            match state.lifecycle {
                Lifecycle::Running => state.gate.clone(),
                Lifecycle::Disposed => return Err(LifecycleError::Disposed),
                // Nothing buffered yet; pre-init flush succeeds as a no-op.
                Lifecycle::Uninitialized | Lifecycle::Initializing => return Ok(()),
            }
        };
        match gate.acquire().await {
            Ok(permit) => {
                self.flush_with(permit).await;
                Ok(())
            }
            // Gate closed while waiting: dispose drained the in-flight
            // flush we were queued behind.
            Err(_) => Ok(()),
        }
    }

    /// Stop timers, drain the in-flight flush, and clear the queue in
    /// memory only. The persisted slot is left intact so pending events
    /// survive process exit. Idempotent; `init()` starts a fresh
    /// lifecycle afterwards.
    pub async fn dispose(&self) {
        let (gate, cancel, tasks, was_running) = {
            let mut state = self.state.lock().unwrap();
            if state.lifecycle == Lifecycle::Disposed {
                return;
            }
            let was_running = state.lifecycle == Lifecycle::Running;
            state.lifecycle = Lifecycle::Disposed;
            (
                state.gate.clone(),
                state.cancel.clone(),
                state.tasks.clone(),
                was_running,
            )
        };

        cancel.cancel();

        // Drain an in-flight flush; its outcome is still honored for
        // persistence. New cycles observe the disposed lifecycle and
        // no-op, so this resolves promptly.
        if let Ok(permit) = gate.acquire().await {
            drop(permit);
        }
        gate.close();

        tasks.close();
        tasks.wait().await;

        // Final authoritative save: scheduled background saves skip once
        // disposed, so the slot must be brought up to date here before
        // the queue is dropped from memory. Never from a pre-init
        // dispose, where the slot may hold a previous lifecycle's
        // events and the queue is still empty.
        if was_running {
            self.persist_queue().await;
        }

        let mut state = self.state.lock().unwrap();
        state.queue.clear();
        state.backoff_until = None;
    }

    fn build_event(
        &self,
        name: String,
        payload: Option<Fields>,
        metadata_overrides: Option<Fields>,
    ) -> Event {
        let mut metadata = self.metadata.snapshot();
        if let Some(overrides) = metadata_overrides {
            for (key, value) in overrides {
                metadata.insert(key, value);
            }
        }
        Event {
            name,
            payload,
            issued_at: epoch_millis(),
            session_id: self.probe.session_id(),
            metadata,
            platform: self.probe.platform(),
            attempts: 0,
        }
    }

    async fn run_timer(self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.flush_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick fires after a full period, not immediately.
        interval.reset();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = interval.tick() => {
                    if self.state.lock().unwrap().in_backoff() {
                        continue;
                    }
                    if let Err(e) = self.flush().await {
                        debug!(error = %e, "scheduled flush skipped");
                    }
                }
            }
        }
    }

    /// Spawn a background flush, elided when one is already in flight.
    /// The running flush re-checks the batch threshold when it finishes.
    fn schedule_flush(&self) {
        let (gate, tasks) = {
            let state = self.state.lock().unwrap();
            (state.gate.clone(), state.tasks.clone())
        };
        let Some(permit) = gate.try_acquire() else {
            return;
        };
        let dispatcher = self.clone();
        tasks.spawn(async move { dispatcher.flush_with(permit).await });
    }

    async fn flush_with(&self, permit: FlushPermit) {
        let more = self.run_cycle().await;
        drop(permit);
        if more {
            self.schedule_flush();
        }
    }

    /// One end-to-end delivery attempt, called with the gate held.
    /// Returns whether another full batch is ready to go.
    async fn run_cycle(&self) -> bool {
        let batch = {
            let mut state = self.state.lock().unwrap();
            if state.lifecycle != Lifecycle::Running {
                return false;
            }
            state.queue.take_batch(self.config.max_batch_size)
        };
        if batch.is_empty() {
            return false;
        }

        // Persist the remainder before sending: a crash mid-flight can
        // only duplicate the batch, never lose it.
        self.persist_queue().await;

        let headers = [(
            self.config.api_key_header.clone(),
            self.config.api_key.clone(),
        )];
        let result = self
            .transport
            .send(&batch, &self.config.endpoint, &headers)
            .await;

        match result {
            Ok(resp) => match resp.disposition() {
                Disposition::Accepted => {
                    debug!(count = batch.len(), status = resp.status, "batch delivered");
                    let mut state = self.state.lock().unwrap();
                    state.backoff_until = None;
                    state.queue.len() >= self.config.max_batch_size
                }
                Disposition::Rejected => {
                    // Terminal: the persisted slot already excludes it.
                    warn!(
                        count = batch.len(),
                        status = resp.status,
                        "collector rejected batch, dropping"
                    );
                    false
                }
                Disposition::Retryable => {
                    debug!(status = resp.status, "collector unavailable, will retry");
                    self.requeue(batch).await;
                    false
                }
            },
            Err(e) => {
                debug!(error = %e, "transport failed, will retry");
                self.requeue(batch).await;
                false
            }
        }
    }

    /// Put a failed batch back at the queue head, drop events that have
    /// exhausted their retry budget, and schedule the backed-off retry.
    async fn requeue(&self, mut batch: Vec<Event>) {
        for event in &mut batch {
            event.attempts += 1;
        }
        let before = batch.len();
        let survivors: Vec<Event> = batch
            .into_iter()
            .filter(|event| event.attempts <= self.config.max_retries)
            .collect();
        let exhausted = before - survivors.len();
        if exhausted > 0 {
            warn!(
                dropped = exhausted,
                max_retries = self.config.max_retries,
                "dropping events after exhausting retries"
            );
        }
        if survivors.is_empty() {
            // The persisted slot already equals the remaining queue.
            return;
        }

        let retry_index = survivors
            .iter()
            .map(|event| event.attempts)
            .max()
            .unwrap_or(1)
            .saturating_sub(1);
        {
            let mut state = self.state.lock().unwrap();
            state.queue.prepend(survivors);
        }
        self.persist_queue().await;
        self.schedule_retry(retry_index);
    }

    fn schedule_retry(&self, retry_index: u32) {
        let delay = retry::backoff_delay(retry_index);
        let (cancel, tasks) = {
            let mut state = self.state.lock().unwrap();
            if state.lifecycle == Lifecycle::Disposed {
                return;
            }
            state.backoff_until = Some(Instant::now() + delay);
            (state.cancel.clone(), state.tasks.clone())
        };
        debug!(
            delay_ms = delay.as_millis() as u64,
            retry = retry_index,
            "retry scheduled"
        );

        let dispatcher = self.clone();
        tasks.spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    dispatcher.state.lock().unwrap().backoff_until = None;
                    if let Err(e) = dispatcher.flush().await {
                        debug!(error = %e, "retry flush skipped");
                    }
                }
            }
        });
    }

    /// Background persistence sync for enqueue-path mutations. Skipped
    /// once disposed so a late save cannot overwrite the slot after the
    /// queue has been cleared.
    fn schedule_save(&self) {
        let tasks = self.state.lock().unwrap().tasks.clone();
        let dispatcher = self.clone();
        tasks.spawn(async move {
            if dispatcher.state.lock().unwrap().lifecycle == Lifecycle::Disposed {
                return;
            }
            dispatcher.persist_queue().await;
        });
    }

    /// Write the current queue to the store. Quota reductions and store
    /// failures are absorbed here: the in-memory queue stays
    /// authoritative either way.
    async fn persist_queue(&self) {
        let _guard = self.save_lock.lock().await;
        let snapshot = self.state.lock().unwrap().queue.snapshot();
        match self.store.save(&snapshot).await {
            Ok(()) => {}
            Err(StoreError::QuotaExceeded { saved, dropped }) => {
                warn!(saved, dropped, "store quota exceeded, persisted a reduced set");
            }
            Err(e) => {
                error!(error = %e, "failed to persist pending events");
            }
        }
    }
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
