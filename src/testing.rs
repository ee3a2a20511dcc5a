//! In-process fake of the workflow backend for client and router tests.

use crate::client::WorkflowClient;
use crate::config::Config;
use crate::storage::{StorageKey, Store};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::Json;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const API_PREFIX: &str = "/api/v1";

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub authorization: Option<String>,
    pub body: Value,
}

#[derive(Clone, Default)]
struct Shared {
    responses: Arc<Mutex<HashMap<String, (StatusCode, Value)>>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    delay: Arc<Mutex<Option<Duration>>>,
}

pub struct FakeBackend {
    addr: SocketAddr,
    shared: Shared,
}

impl FakeBackend {
    pub async fn start() -> Self {
        let shared = Shared::default();
        let app = axum::Router::new()
            .fallback(handle)
            .with_state(shared.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, shared }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}{}", self.addr, API_PREFIX)
    }

    /// Canned response for a path relative to the API prefix
    pub fn respond(&self, path: &str, status: StatusCode, body: Value) {
        self.shared
            .responses
            .lock()
            .unwrap()
            .insert(path.to_string(), (status, body));
    }

    /// Hold every response for `delay` before answering
    pub fn delay(&self, delay: Duration) {
        *self.shared.delay.lock().unwrap() = Some(delay);
    }

    pub fn hits(&self) -> usize {
        self.shared.requests.lock().unwrap().len()
    }

    pub fn last_request(&self) -> Option<RecordedRequest> {
        self.shared.requests.lock().unwrap().last().cloned()
    }
}

async fn handle(
    State(shared): State<Shared>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    let path = uri
        .path()
        .strip_prefix(API_PREFIX)
        .unwrap_or(uri.path())
        .to_string();

    shared.requests.lock().unwrap().push(RecordedRequest {
        method: method.to_string(),
        path: path.clone(),
        query: uri.query().map(str::to_string),
        authorization: headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        body: serde_json::from_slice(&body).unwrap_or(Value::Null),
    });

    let delay = *shared.delay.lock().unwrap();
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }

    let canned = shared.responses.lock().unwrap().get(&path).cloned();
    match canned {
        Some((status, body)) => (status, Json(body)),
        None => (StatusCode::NOT_FOUND, Json(json!({"detail": "Not Found"}))),
    }
}

/// A client pointed at `backend`, optionally already logged in
pub fn client_for(backend: &FakeBackend, token: Option<&str>) -> WorkflowClient {
    let store = Store::temporary().unwrap();
    if let Some(token) = token {
        store.set(StorageKey::Jwt, &token).unwrap();
    }
    let mut config = Config::default();
    config.api.base_url = backend.base_url();
    WorkflowClient::new(&config, store).unwrap()
}
