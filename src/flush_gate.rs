use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Debug, Error)]
#[error("flush gate is closed")]
pub struct GateClosed;

/// Single-owner exclusion around the flush cycle.
///
/// A one-permit semaphore: `acquire` suspends until ownership is granted,
/// ownership is released when the returned [`FlushPermit`] drops, and
/// `close` rejects all further acquisitions (an already-granted permit
/// stays valid until dropped). Not re-entrant.
#[derive(Debug, Clone)]
pub struct FlushGate {
    sem: Arc<Semaphore>,
}

/// Proof of gate ownership. Dropping it releases the gate.
#[derive(Debug)]
pub struct FlushPermit {
    _permit: OwnedSemaphorePermit,
}

impl FlushGate {
    pub fn new() -> Self {
        Self {
            sem: Arc::new(Semaphore::new(1)),
        }
    }

    /// Suspend until ownership is granted. Fails once the gate is closed,
    /// including callers already waiting at close time.
    pub async fn acquire(&self) -> Result<FlushPermit, GateClosed> {
        self.sem
            .clone()
            .acquire_owned()
            .await
            .map(|permit| FlushPermit { _permit: permit })
            .map_err(|_| GateClosed)
    }

    /// Take ownership if the gate is free right now. Returns `None` when
    /// held by someone else or closed.
    pub fn try_acquire(&self) -> Option<FlushPermit> {
        self.sem
            .clone()
            .try_acquire_owned()
            .ok()
            .map(|permit| FlushPermit { _permit: permit })
    }

    /// Permanently reject further acquisitions. Used on dispose; a fresh
    /// gate is installed on re-init.
    pub fn close(&self) {
        self.sem.close();
    }
}

impl Default for FlushGate {
    fn default() -> Self {
        Self::new()
    }
}
