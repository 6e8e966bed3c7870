#![allow(dead_code)]

use std::collections::VecDeque;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use serde_json::Value;
use tokio::net::TcpListener;
use url::Url;

use beacon::{Event, Transport, TransportError, TransportResponse};

pub fn install_crypto_provider() {
    let _ = rustls::crypto::ring::default_provider().install_default();
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

#[derive(Debug)]
pub struct ReceivedRequest {
    pub method: String,
    pub headers: Vec<(String, String)>,
    pub body: Value,
}

impl ReceivedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Default)]
pub struct ServerState {
    pub requests: Mutex<Vec<ReceivedRequest>>,
    pub statuses: Mutex<VecDeque<u16>>,
}

/// Minimal in-process ingest endpoint: records every request and answers
/// with scripted statuses (200 once the script runs out).
pub struct IngestServer {
    pub url: Url,
    pub state: Arc<ServerState>,
}

impl IngestServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ingest listener");
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(ServerState::default());

        let accept_state = Arc::clone(&state);
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let state = Arc::clone(&accept_state);
                tokio::spawn(async move {
                    let service = service_fn(move |req| handle(req, Arc::clone(&state)));
                    let _ = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await;
                });
            }
        });

        Self {
            url: Url::parse(&format!("http://{addr}/v1/events")).unwrap(),
            state,
        }
    }

    pub fn push_status(&self, status: u16) {
        self.state.statuses.lock().unwrap().push_back(status);
    }

    pub fn request_count(&self) -> usize {
        self.state.requests.lock().unwrap().len()
    }
}

async fn handle(
    req: Request<hyper::body::Incoming>,
    state: Arc<ServerState>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let method = req.method().to_string();
    let headers = req
        .headers()
        .iter()
        .map(|(k, v)| {
            (
                k.as_str().to_owned(),
                v.to_str().unwrap_or_default().to_owned(),
            )
        })
        .collect();
    let bytes = req
        .into_body()
        .collect()
        .await
        .map(|b| b.to_bytes())
        .unwrap_or_default();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);

    state
        .requests
        .lock()
        .unwrap()
        .push(ReceivedRequest { method, headers, body });

    let status = state.statuses.lock().unwrap().pop_front().unwrap_or(200);
    Ok(Response::builder()
        .status(status)
        .body(Full::new(Bytes::from_static(b"{}")))
        .unwrap())
}

#[derive(Default)]
struct CapturingState {
    statuses: Mutex<VecDeque<u16>>,
    batches: Mutex<Vec<Vec<Event>>>,
}

/// In-process transport with scripted statuses, for driving the client
/// without a network. Clones share state.
#[derive(Clone, Default)]
pub struct CapturingTransport {
    state: Arc<CapturingState>,
}

impl CapturingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_statuses(statuses: impl IntoIterator<Item = u16>) -> Self {
        let transport = Self::default();
        transport.state.statuses.lock().unwrap().extend(statuses);
        transport
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
}

impl Transport for CapturingTransport {
    async fn send(
        &self,
        batch: &[Event],
        _endpoint: &Url,
        _headers: &[(String, String)],
    ) -> Result<TransportResponse, TransportError> {
        self.state.batches.lock().unwrap().push(batch.to_vec());
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

/// Poll `cond` until it holds, panicking after a few seconds.
pub async fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for: {what}");
}
