use std::time::Duration;

use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use url::Url;

use crate::event::{Event, Fields, Platform};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("batch could not be serialized: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("transport unavailable: {0}")]
    Unavailable(String),
}

/// Response of a completed transport call.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    /// Collector response body, when it parses as JSON.
    pub data: Option<Value>,
}

/// How a completed transport call should be handled. Derived from the
/// status alone: 2xx accepted, 4xx terminal, everything else retryable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Accepted,
    Rejected,
    Retryable,
}

impl TransportResponse {
    pub fn disposition(&self) -> Disposition {
        match self.status {
            200..=299 => Disposition::Accepted,
            400..=499 => Disposition::Rejected,
            _ => Disposition::Retryable,
        }
    }
}

/// Abstraction over delivering a batch of events to a collector.
///
/// The returned future must be `Send` because the dispatcher calls
/// `send()` from spawned flush tasks.
pub trait Transport: Send + Sync + 'static {
    fn send(
        &self,
        batch: &[Event],
        endpoint: &Url,
        headers: &[(String, String)],
    ) -> impl Future<Output = Result<TransportResponse, TransportError>> + Send;
}

/// Wire form of an event: the persisted record minus internal fields.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireEvent<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload: Option<&'a Fields>,
    issued_at: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Fields::is_empty")]
    metadata: &'a Fields,
    #[serde(skip_serializing_if = "Option::is_none")]
    platform: Option<&'a Platform>,
}

fn wire_batch(batch: &[Event]) -> Vec<WireEvent<'_>> {
    batch
        .iter()
        .map(|event| WireEvent {
            name: &event.name,
            payload: event.payload.as_ref(),
            issued_at: event.issued_at,
            session_id: event.session_id.as_deref(),
            metadata: &event.metadata,
            platform: event.platform.as_ref(),
        })
        .collect()
}

/// HTTP transport: JSON batches POSTed with the configured headers.
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// The request timeout is this adapter's contract; the dispatcher
    /// imposes none of its own.
    pub fn new(timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .expect("failed to build HTTP client");
        Self { client }
    }
}

impl Transport for HttpTransport {
    async fn send(
        &self,
        batch: &[Event],
        endpoint: &Url,
        headers: &[(String, String)],
    ) -> Result<TransportResponse, TransportError> {
        let body = serde_json::to_vec(&wire_batch(batch))?;

        let mut req = self
            .client
            .post(endpoint.clone())
            .header("content-type", "application/json");
        for (k, v) in headers {
            req = req.header(k, v);
        }

        let resp = req.body(body).send().await?;
        let status = resp.status().as_u16();
        let data = resp
            .bytes()
            .await
            .ok()
            .filter(|bytes| !bytes.is_empty())
            .and_then(|bytes| serde_json::from_slice(&bytes).ok());

        Ok(TransportResponse { status, data })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::event::Fields;

    fn event() -> Event {
        let mut metadata = Fields::new();
        metadata.insert("plan".into(), json!("pro"));
        Event {
            name: "page_view".into(),
            payload: None,
            issued_at: 1_700_000_000_000,
            session_id: Some("s-1".into()),
            metadata,
            platform: Some(Platform::Server),
            attempts: 2,
        }
    }

    #[test]
    fn wire_form_strips_attempts() {
        let value = serde_json::to_value(wire_batch(&[event()])).unwrap();
        let first = &value[0];
        assert!(first.get("attempts").is_none(), "attempts must not go over the wire");
        assert_eq!(first["name"], "page_view");
        assert_eq!(first["issuedAt"], 1_700_000_000_000u64);
        assert_eq!(first["sessionId"], "s-1");
        assert_eq!(first["metadata"]["plan"], "pro");
    }

    #[test]
    fn wire_form_omits_absent_fields() {
        let mut event = event();
        event.payload = None;
        event.session_id = None;
        event.platform = None;
        event.metadata = Fields::new();
        let value = serde_json::to_value(wire_batch(&[event])).unwrap();
        let first = &value[0];
        assert!(first.get("payload").is_none());
        assert!(first.get("sessionId").is_none());
        assert!(first.get("platform").is_none());
        assert!(first.get("metadata").is_none());
    }

    #[test]
    fn classifies_status_families() {
        let resp = |status| TransportResponse { status, data: None };
        assert_eq!(resp(200).disposition(), Disposition::Accepted);
        assert_eq!(resp(204).disposition(), Disposition::Accepted);
        assert_eq!(resp(400).disposition(), Disposition::Rejected);
        assert_eq!(resp(404).disposition(), Disposition::Rejected);
        assert_eq!(resp(500).disposition(), Disposition::Retryable);
        assert_eq!(resp(503).disposition(), Disposition::Retryable);
        // Unexpected families are retried rather than dropped.
        assert_eq!(resp(302).disposition(), Disposition::Retryable);
    }
}
