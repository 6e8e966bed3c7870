use std::sync::RwLock;

use serde_json::Value;

use crate::event::Fields;

/// Thread-safe global metadata map.
///
/// Readers get owned copies, so no caller can observe a torn state or
/// mutate the shared map through a returned reference.
#[derive(Debug, Default)]
pub struct MetadataManager {
    entries: RwLock<Fields>,
}

impl MetadataManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a single entry.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.entries
            .write()
            .unwrap()
            .insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries.read().unwrap().get(key).cloned()
    }

    /// Coherent point-in-time copy of all entries.
    pub fn snapshot(&self) -> Fields {
        self.entries.read().unwrap().clone()
    }

    pub fn clear(&self) {
        self.entries.write().unwrap().clear();
    }
}
