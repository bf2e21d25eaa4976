use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use persona_relay::{app, build_state, AppConfig, UpstreamConfig};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Tracks environment variable mutations and restores originals on drop.
#[allow(dead_code)]
pub struct EnvGuard {
    originals: HashMap<String, Option<String>>,
}

#[allow(dead_code)]
impl EnvGuard {
    pub fn new() -> Self {
        Self {
            originals: HashMap::new(),
        }
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.capture(key);
        std::env::set_var(key, value);
    }

    pub fn set_many(&mut self, entries: &[(&str, &str)]) {
        for (key, value) in entries {
            self.set(key, value);
        }
    }

    pub fn remove(&mut self, key: &str) {
        self.capture(key);
        std::env::remove_var(key);
    }

    fn capture(&mut self, key: &str) {
        if self.originals.contains_key(key) {
            return;
        }
        let original = std::env::var(key).ok();
        self.originals.insert(key.to_string(), original);
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, original) in self.originals.drain() {
            match original {
                Some(value) => std::env::set_var(&key, value),
                None => std::env::remove_var(&key),
            }
        }
    }
}

/// What a stub completion endpoint answers with.
#[allow(dead_code)]
#[derive(Clone)]
pub enum StubReply {
    /// 200 with `choices[0].message.content` set to the given text.
    Content(String),
    /// Arbitrary status and raw body.
    Raw(StatusCode, String),
    /// Never answers within any sane timeout.
    Hang,
}

/// Requests seen by a stub upstream.
#[allow(dead_code)]
#[derive(Clone, Default)]
pub struct StubLog {
    pub hits: Arc<AtomicUsize>,
    pub bodies: Arc<Mutex<Vec<serde_json::Value>>>,
    pub auth_headers: Arc<Mutex<Vec<String>>>,
}

#[allow(dead_code)]
impl StubLog {
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn last_body(&self) -> Option<serde_json::Value> {
        self.bodies.lock().unwrap().last().cloned()
    }

    pub fn last_auth(&self) -> Option<String> {
        self.auth_headers.lock().unwrap().last().cloned()
    }
}

#[derive(Clone)]
struct StubState {
    reply: StubReply,
    log: StubLog,
}

async fn stub_completion(
    State(stub): State<StubState>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> axum::response::Response {
    stub.log.hits.fetch_add(1, Ordering::SeqCst);
    stub.log.bodies.lock().unwrap().push(body);
    if let Some(auth) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
        stub.log.auth_headers.lock().unwrap().push(auth.to_string());
    }
    match stub.reply {
        StubReply::Content(text) => Json(serde_json::json!({
            "id": "chatcmpl-stub",
            "object": "chat.completion",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": text}}]
        }))
        .into_response(),
        StubReply::Raw(status, body) => (status, body).into_response(),
        StubReply::Hang => {
            tokio::time::sleep(std::time::Duration::from_secs(120)).await;
            StatusCode::OK.into_response()
        }
    }
}

/// Spin up a stub completion endpoint. Returns its full URL and request log.
#[allow(dead_code)]
pub async fn start_stub_upstream(reply: StubReply) -> (String, StubLog, JoinHandle<()>) {
    let log = StubLog::default();
    let router = Router::new()
        .route("/v1/chat/completions", post(stub_completion))
        .with_state(StubState {
            reply,
            log: log.clone(),
        });
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (format!("http://{}/v1/chat/completions", addr), log, handle)
}

/// Configuration pointing at `url` with a test credential.
#[allow(dead_code)]
pub fn config_for(url: &str) -> AppConfig {
    AppConfig {
        upstream: UpstreamConfig {
            url: url.to_string(),
            api_key: Some("test-key".to_string()),
            timeout_ms: 2_000,
            ..UpstreamConfig::default()
        },
        ..AppConfig::default()
    }
}

/// Serve the relay on a real socket, with peer addresses available to the
/// rate limiter.
#[allow(dead_code)]
pub async fn spawn_relay(config: AppConfig) -> (String, JoinHandle<()>) {
    let state = build_state(config).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = app(state);
    let handle = tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
    (format!("http://{}", addr), handle)
}
