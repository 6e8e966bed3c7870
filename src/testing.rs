use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use url::Url;

use crate::config::{Config, ConfigBuilder};
use crate::event::Event;
use crate::store::{EventStore, MemoryStore, StoreError};
use crate::transport::{Transport, TransportError, TransportResponse};

pub fn test_config() -> ConfigBuilder {
    Config::builder("test-key", "https://ingest.example.com/v1/events")
}

#[derive(Default)]
struct RecordingState {
    statuses: Mutex<VecDeque<u16>>,
    batches: Mutex<Vec<Vec<Event>>>,
    headers: Mutex<Vec<Vec<(String, String)>>>,
}

/// Transport that records every batch and replies with scripted
/// statuses, 200 once the script runs out. Clones share state.
#[derive(Clone, Default)]
pub struct RecordingTransport {
    state: Arc<RecordingState>,
    delay: Option<Duration>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_statuses(statuses: impl IntoIterator<Item = u16>) -> Self {
        let transport = Self::default();
        transport.state.statuses.lock().unwrap().extend(statuses);
        transport
    }

    /// Sleep before answering, to widen race windows under a paused
    /// clock.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn push_status(&self, status: u16) {
        self.state.statuses.lock().unwrap().push_back(status);
    }

    pub fn calls(&self) -> usize {
        self.state.batches.lock().unwrap().len()
    }

    pub fn sent(&self) -> Vec<Vec<Event>> {
        self.state.batches.lock().unwrap().clone()
    }

    pub fn sent_names(&self) -> Vec<Vec<String>> {
        self.sent()
            .into_iter()
            .map(|batch| batch.into_iter().map(|event| event.name).collect())
            .collect()
    }

    pub fn last_headers(&self) -> Vec<(String, String)> {
        self.state
            .headers
            .lock()
            .unwrap()
            .last()
            .cloned()
            .unwrap_or_default()
    }
}

impl Transport for RecordingTransport {
    async fn send(
        &self,
        batch: &[Event],
        _endpoint: &Url,
        headers: &[(String, String)],
    ) -> Result<TransportResponse, TransportError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.state.batches.lock().unwrap().push(batch.to_vec());
        self.state.headers.lock().unwrap().push(headers.to_vec());
        let status = self
            .state
            .statuses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(200);
        Ok(TransportResponse { status, data: None })
    }
}

/// Transport that never reaches a collector.
#[derive(Clone, Default)]
pub struct FailingTransport {
    calls: Arc<Mutex<usize>>,
}

impl FailingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

impl Transport for FailingTransport {
    async fn send(
        &self,
        _batch: &[Event],
        _endpoint: &Url,
        _headers: &[(String, String)],
    ) -> Result<TransportResponse, TransportError> {
        *self.calls.lock().unwrap() += 1;
        Err(TransportError::Unavailable("connection refused".into()))
    }
}

/// Store whose `load` takes a while, to hold the dispatcher in the
/// initializing state.
#[derive(Clone)]
pub struct SlowStore {
    inner: MemoryStore,
    delay: Duration,
}

impl SlowStore {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: MemoryStore::new(),
            delay,
        }
    }
}

impl EventStore for SlowStore {
    async fn save(&self, events: &[Event]) -> Result<(), StoreError> {
        self.inner.save(events).await
    }

    async fn load(&self) -> Result<Vec<Event>, StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.load().await
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.inner.clear().await
    }
}

/// Store with an event-count quota: over-quota saves keep the newest
/// events and report the drop, like a real quota-bounded adapter.
#[derive(Clone)]
pub struct QuotaStore {
    inner: MemoryStore,
    max_events: usize,
}

impl QuotaStore {
    pub fn new(max_events: usize) -> Self {
        Self {
            inner: MemoryStore::new(),
            max_events,
        }
    }

    pub fn events(&self) -> Vec<Event> {
        self.inner.events()
    }
}

impl EventStore for QuotaStore {
    async fn save(&self, events: &[Event]) -> Result<(), StoreError> {
        if events.len() > self.max_events {
            let dropped = events.len() - self.max_events;
            self.inner.save(&events[dropped..]).await?;
            return Err(StoreError::QuotaExceeded {
                saved: self.max_events,
                dropped,
            });
        }
        self.inner.save(events).await
    }

    async fn load(&self) -> Result<Vec<Event>, StoreError> {
        self.inner.load().await
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.inner.clear().await
    }
}
