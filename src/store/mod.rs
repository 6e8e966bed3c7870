use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;

use crate::event::Event;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The adapter ran out of room and wrote a reduced set, dropping the
    /// oldest events first. Informational: the save itself succeeded.
    #[error("store quota exceeded: saved {saved} events, dropped {dropped}")]
    QuotaExceeded { saved: usize, dropped: usize },

    #[error("store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("store serialization failed: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Key-addressed storage for the pending-event slot.
///
/// One SDK instance owns one logical slot. `save` atomically replaces the
/// slot; partial writes are forbidden. All operations are idempotent and
/// the adapter serializes its own writes.
pub trait EventStore: Send + Sync + 'static {
    fn save(&self, events: &[Event]) -> impl Future<Output = Result<(), StoreError>> + Send;
    fn load(&self) -> impl Future<Output = Result<Vec<Event>, StoreError>> + Send;
    fn clear(&self) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// Durable slot backed by a single JSON file.
///
/// Writes go through a temp file and rename, so a crash mid-save leaves
/// the previous slot intact. An optional byte quota sheds the oldest
/// events on save and reports the drop via `StoreError::QuotaExceeded`.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
    max_bytes: Option<usize>,
    io_lock: Arc<AsyncMutex<()>>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_bytes: None,
            io_lock: Arc::new(AsyncMutex::new(())),
        }
    }

    /// Cap the serialized slot size. Saves over the cap drop oldest
    /// events until the rest fits.
    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = Some(max_bytes);
        self
    }

    fn tmp_path(&self) -> PathBuf {
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        PathBuf::from(tmp)
    }
}

impl EventStore for FileStore {
    async fn save(&self, events: &[Event]) -> Result<(), StoreError> {
        let _guard = self.io_lock.lock().await;

        let mut kept = events;
        let mut body = serde_json::to_vec(kept)?;
        let mut dropped = 0;
        if let Some(max) = self.max_bytes {
            while body.len() > max && !kept.is_empty() {
                kept = &kept[1..];
                dropped += 1;
                body = serde_json::to_vec(kept)?;
            }
        }

        let tmp = self.tmp_path();
        tokio::fs::write(&tmp, &body).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        if dropped > 0 {
            return Err(StoreError::QuotaExceeded {
                saved: kept.len(),
                dropped,
            });
        }
        Ok(())
    }

    async fn load(&self) -> Result<Vec<Event>, StoreError> {
        let _guard = self.io_lock.lock().await;
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let _guard = self.io_lock.lock().await;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-process slot. No durability across restarts; for tests and
/// embedders that opt out of persistence.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    slot: Arc<Mutex<Vec<Event>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current slot contents, for inspection.
    pub fn events(&self) -> Vec<Event> {
        self.slot.lock().unwrap().clone()
    }
}

impl EventStore for MemoryStore {
    async fn save(&self, events: &[Event]) -> Result<(), StoreError> {
        *self.slot.lock().unwrap() = events.to_vec();
        Ok(())
    }

    async fn load(&self) -> Result<Vec<Event>, StoreError> {
        Ok(self.slot.lock().unwrap().clone())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.slot.lock().unwrap().clear();
        Ok(())
    }
}
