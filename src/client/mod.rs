use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::debug;

use crate::config::Config;
use crate::dispatcher::{Dispatcher, LifecycleError};
use crate::event::Fields;
use crate::metadata::MetadataManager;
use crate::probe::RuntimeProbe;
use crate::store::EventStore;
use crate::transport::Transport;

struct DeferredTrack {
    name: String,
    payload: Option<Fields>,
    metadata: Option<Fields>,
}

/// Public SDK surface: thin parameter marshalling over the dispatcher.
///
/// `track` never fails: calls made before `init()` completes (or after
/// `dispose()`) are buffered in arrival order and replayed once the
/// dispatcher is running. Construct with a [`Config`] from
/// [`Config::builder`], which validates synchronously.
pub struct Client<T, S, P> {
    dispatcher: Dispatcher<T, S, P>,
    metadata: Arc<MetadataManager>,
    probe: Arc<P>,
    /// `Some` while tracks are being deferred; `None` once replayed.
    deferred: Mutex<Option<Vec<DeferredTrack>>>,
}

impl<T: Transport, S: EventStore, P: RuntimeProbe> Client<T, S, P> {
    pub fn new(config: Config, transport: T, store: S, probe: P) -> Self {
        let metadata = Arc::new(MetadataManager::new());
        let probe = Arc::new(probe);
        let dispatcher = Dispatcher::new(
            config,
            transport,
            store,
            Arc::clone(&probe),
            Arc::clone(&metadata),
        );
        Self {
            dispatcher,
            metadata,
            probe,
            deferred: Mutex::new(Some(Vec::new())),
        }
    }

    /// Bring the dispatcher up and replay deferred tracks in the order
    /// they arrived. Idempotent while running; legal again after
    /// dispose.
    pub async fn init(&self) -> Result<(), LifecycleError> {
        self.dispatcher.init().await?;

        let deferred = self.deferred.lock().unwrap().take();
        if let Some(ops) = deferred {
            for op in ops {
                if let Err(e) = self.dispatcher.enqueue(op.name, op.payload, op.metadata) {
                    debug!(error = %e, "dropping deferred event");
                }
            }
        }
        Ok(())
    }

    /// Record an event. Non-blocking; deferred while the dispatcher is
    /// not running.
    pub fn track(
        &self,
        name: impl Into<String>,
        payload: Option<Fields>,
        metadata: Option<Fields>,
    ) {
        let name = name.into();
        {
            let mut deferred = self.deferred.lock().unwrap();
            if deferred.is_some() || !self.dispatcher.is_running() {
                deferred
                    .get_or_insert_with(Vec::new)
                    .push(DeferredTrack { name, payload, metadata });
                return;
            }
        }
        if let Err(e) = self.dispatcher.enqueue(name, payload, metadata) {
            debug!(error = %e, "dropping tracked event");
        }
    }

    pub fn set_metadata(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.metadata.set(key, value);
    }

    /// Point-in-time copy of the global metadata map.
    pub fn metadata(&self) -> Fields {
        self.metadata.snapshot()
    }

    pub fn session_id(&self) -> Option<String> {
        self.probe.session_id()
    }

    /// Completes when one flush cycle finishes. A no-op success before
    /// `init()`.
    pub async fn flush(&self) -> Result<(), LifecycleError> {
        self.dispatcher.flush().await
    }

    /// Stop timers and drain in-flight work. Pending events stay in the
    /// store; tracks arriving afterwards are deferred for the next
    /// `init()`.
    pub async fn dispose(&self) {
        self.dispatcher.dispose().await;
        let mut deferred = self.deferred.lock().unwrap();
        if deferred.is_none() {
            *deferred = Some(Vec::new());
        }
    }

    /// Number of events currently buffered in memory.
    pub fn pending(&self) -> usize {
        self.dispatcher.pending()
    }
}
