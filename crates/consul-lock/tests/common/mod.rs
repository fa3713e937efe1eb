#![allow(dead_code)]

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, put};
use consul_lock::{
    BackendConfig, KvBackend, KvEntry, SessionCreated, SessionId, SessionRequest, WatchIndex,
};
use consul_lock_core::MemoryBackend;
use serde::Deserialize;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::AsyncWrite;
use tokio::task::JoinHandle;

#[derive(Default)]
struct Faults {
    status: Option<u16>,
    empty_reads: bool,
}

#[derive(Clone)]
struct Agent {
    backend: Arc<MemoryBackend>,
    faults: Arc<Mutex<Faults>>,
    requests: Arc<Mutex<Vec<String>>>,
}

impl Agent {
    /// Record the request; answers with the injected status when one is set
    fn intercept(&self, method: Method, uri: &Uri) -> Option<Response> {
        self.requests.lock().unwrap().push(format!("{method} {uri}"));
        let status = self.faults.lock().unwrap().status?;
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        Some((status, "injected failure").into_response())
    }
}

/// In-process stand-in for a Consul agent's KV and session endpoints
pub struct FakeConsul {
    addr: SocketAddr,
    agent: Agent,
    server: JoinHandle<()>,
}

impl FakeConsul {
    pub async fn start() -> Self {
        Self::with_backend(MemoryBackend::new()).await
    }

    pub async fn with_backend(backend: MemoryBackend) -> Self {
        let agent = Agent {
            backend: Arc::new(backend),
            faults: Default::default(),
            requests: Default::default(),
        };
        let router = Router::new()
            .route(
                "/v1/kv/{*key}",
                get(read_key).put(acquire_key).delete(delete_key),
            )
            .route("/v1/session/create", put(create_session))
            .route("/v1/session/destroy/{id}", put(destroy_session))
            .with_state(agent.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                tracing::error!(error = %e, "fake consul shut down with error");
            }
        });

        Self {
            addr,
            agent,
            server,
        }
    }

    pub fn address(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn backend_config(&self) -> BackendConfig {
        BackendConfig::builder()
            .address(self.address())
            .build()
            .unwrap()
    }

    pub fn backend(&self) -> &MemoryBackend {
        &self.agent.backend
    }

    /// Answer every request with `status`
    pub fn fail_with(&self, status: u16) {
        self.agent.faults.lock().unwrap().status = Some(status);
    }

    /// Answer key reads with `200 []`
    pub fn empty_reads(&self) {
        self.agent.faults.lock().unwrap().empty_reads = true;
    }

    /// `"<METHOD> <path>?<query>"` for every request received so far
    pub fn requests(&self) -> Vec<String> {
        self.agent.requests.lock().unwrap().clone()
    }
}

impl Drop for FakeConsul {
    fn drop(&mut self) {
        self.server.abort();
    }
}

/// Address nothing listens on
pub async fn unreachable_address() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

#[derive(Deserialize)]
struct ReadQuery {
    index: Option<u64>,
    wait: Option<String>,
}

#[derive(Deserialize)]
struct AcquireQuery {
    acquire: String,
}

fn parse_wait(wait: &str) -> Duration {
    if let Some(ms) = wait.strip_suffix("ms") {
        Duration::from_millis(ms.parse().unwrap_or(0))
    } else if let Some(secs) = wait.strip_suffix('s') {
        Duration::from_secs(secs.parse().unwrap_or(0))
    } else {
        Duration::ZERO
    }
}

async fn read_key(
    State(agent): State<Agent>,
    Path(key): Path<String>,
    Query(query): Query<ReadQuery>,
    uri: Uri,
) -> Response {
    if let Some(response) = agent.intercept(Method::GET, &uri) {
        return response;
    }

    let index = query.index.map(WatchIndex::at).unwrap_or(WatchIndex::NONE);
    let wait = query.wait.as_deref().map(parse_wait).unwrap_or_default();
    let read = match agent.backend.read(&key, index, wait).await {
        Ok(read) => read,
        Err(e) => return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    };

    let mut headers = HeaderMap::new();
    if let Some(index) = read.index {
        headers.insert("X-Consul-Index", HeaderValue::from(index));
    }

    if agent.faults.lock().unwrap().empty_reads {
        return (headers, Json(Vec::<KvEntry>::new())).into_response();
    }
    match read.entry {
        Some(entry) => (headers, Json(vec![entry])).into_response(),
        None => (StatusCode::NOT_FOUND, headers).into_response(),
    }
}

async fn acquire_key(
    State(agent): State<Agent>,
    Path(key): Path<String>,
    Query(query): Query<AcquireQuery>,
    uri: Uri,
) -> Response {
    if let Some(response) = agent.intercept(Method::PUT, &uri) {
        return response;
    }
    match agent.backend.acquire(&key, &SessionId::new(query.acquire)).await {
        Ok(acquired) => Json(acquired).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn delete_key(State(agent): State<Agent>, Path(key): Path<String>, uri: Uri) -> Response {
    if let Some(response) = agent.intercept(Method::DELETE, &uri) {
        return response;
    }
    match agent.backend.delete(&key).await {
        Ok(deleted) => Json(deleted).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn create_session(State(agent): State<Agent>, uri: Uri, body: Bytes) -> Response {
    if let Some(response) = agent.intercept(Method::PUT, &uri) {
        return response;
    }
    let request = if body.is_empty() {
        None
    } else {
        match serde_json::from_slice::<SessionRequest>(&body) {
            Ok(request) => Some(request),
            Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
        }
    };

    match agent.backend.create_session(request.as_ref()).await {
        Ok(id) => Json(SessionCreated {
            id: id.as_str().to_string(),
        })
        .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn destroy_session(State(agent): State<Agent>, Path(id): Path<String>, uri: Uri) -> Response {
    if let Some(response) = agent.intercept(Method::PUT, &uri) {
        return response;
    }
    match agent.backend.destroy_session(&SessionId::new(id)).await {
        Ok(destroyed) => Json(destroyed).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

/// Cloneable in-memory sink for relayed output
#[derive(Clone, Default)]
pub struct Capture(Arc<Mutex<Vec<u8>>>);

impl Capture {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl AsyncWrite for Capture {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
