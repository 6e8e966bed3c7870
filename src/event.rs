use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// JSON object used for event payloads and metadata snapshots.
pub type Fields = Map<String, Value>;

/// Platform fingerprint captured into each event at enqueue time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Platform {
    Web {
        browser: String,
        device: String,
        os: String,
    },
    Native {
        device: String,
        os: String,
    },
    Server,
}

/// A single tracked event.
///
/// Immutable once built: `issued_at`, `session_id`, `platform`, and
/// `metadata` are snapshots taken at the instant of enqueue, so later
/// metadata mutations never retroactively change a queued event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Fields>,
    /// Milliseconds since the Unix epoch, stamped at enqueue.
    pub issued_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Fields,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
    /// Delivery attempt counter. Persisted so the retry bound survives a
    /// process restart; stripped from the wire form (see `transport`).
    #[serde(default)]
    pub attempts: u32,
}
