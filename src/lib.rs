//! Core library for the persona relay. This module wires the validator,
//! rate limiter, upstream client and normalizer into an axum router and
//! holds the state shared by every request.
//!
//! The only state that survives a request is the rate limiter's counter
//! store; everything else is built per request and dropped with it.

mod config;
pub mod docs;
pub mod error;
pub mod normalize;
pub mod rate_limit;
pub mod sanitize;
pub mod upstream;
pub mod util;
pub mod validate;

pub use config::{AppConfig, RateLimitConfig, UpstreamConfig};
pub use error::{ErrorResponse, RelayError};
pub use normalize::{NormalizedResponse, Normalizer, PERSONA_PREFIX};

use std::any::Any;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::rejection::{BytesRejection, FailedToBufferBody, QueryRejection};
use axum::extract::{ConnectInfo, DefaultBodyLimit, Query, Request, State};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::set_header::SetResponseHeaderLayer;

use crate::rate_limit::{client_key, InMemoryStore, RateLimiter};
use crate::upstream::{UpstreamClient, UpstreamPayload};
use crate::validate::{sanitized_text, ChatRequest, Message};

/// Headers attached to every response, whatever the route or outcome.
const BASELINE_HEADERS: [(HeaderName, &str); 7] = [
    (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
    (header::ACCESS_CONTROL_ALLOW_METHODS, "GET, POST, OPTIONS"),
    (
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        "Content-Type, Authorization",
    ),
    (header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
    (header::X_FRAME_OPTIONS, "DENY"),
    (header::X_XSS_PROTECTION, "1; mode=block"),
    (
        header::STRICT_TRANSPORT_SECURITY,
        "max-age=31536000; includeSubDomains",
    ),
];

/// Internal application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub upstream: UpstreamClient,
    pub upstream_config: Arc<UpstreamConfig>,
    pub limiter: RateLimiter,
    /// Backing store of `limiter`, kept so `main` can sweep it.
    pub store: Arc<InMemoryStore>,
    pub normalizer: Normalizer,
    pub trust_forwarded: bool,
    /// Maximum accepted raw request body size in bytes (None => axum default)
    pub max_request_bytes: Option<usize>,
    pub docs_html: Arc<str>,
}

/// Build state from an explicit configuration.
pub fn build_state(config: AppConfig) -> Result<AppState, Box<dyn std::error::Error>> {
    let AppConfig {
        upstream,
        rate_limit,
        strip_tags,
        max_request_bytes,
    } = config;

    if upstream.api_key.is_none() {
        tracing::warn!("RELAY_API_KEY not set; chat routes will answer 500 until it is configured");
    }
    let client = UpstreamClient::new(&upstream)?;
    let store = Arc::new(InMemoryStore::new());
    let limiter = RateLimiter::new(store.clone(), &rate_limit);
    let docs_html = docs::render(
        env!("CARGO_PKG_VERSION"),
        rate_limit.limit,
        rate_limit.window_secs,
    );

    Ok(AppState {
        upstream: client,
        upstream_config: Arc::new(upstream),
        limiter,
        store,
        normalizer: Normalizer::new(strip_tags),
        trust_forwarded: rate_limit.trust_forwarded,
        max_request_bytes,
        docs_html: docs_html.into(),
    })
}

/// Build state from environment variables. See `AppConfig::from_env` for
/// the variables read.
pub async fn build_state_from_env() -> Result<AppState, Box<dyn std::error::Error>> {
    let config = AppConfig::from_env().map_err(|e| -> Box<dyn std::error::Error> { e.into() })?;
    tracing::debug!(?config, "loaded configuration");
    build_state(config)
}

/// Build the Axum router and attach handlers. The router holds a copy
/// of the `AppState` for each invocation.
pub fn app(state: AppState) -> Router {
    let max_request_bytes = state.max_request_bytes;

    let router = Router::new()
        .route(
            "/",
            get(docs_handler)
                .post(structured_chat_handler)
                .fallback(not_found_handler),
        )
        .route("/docs", get(docs_handler).fallback(not_found_handler))
        .route("/health", get(health_handler).fallback(not_found_handler))
        .route("/chat", get(chat_handler).fallback(not_found_handler))
        .route(
            "/api/chat",
            get(api_chat_query_handler)
                .post(api_chat_body_handler)
                .fallback(method_not_allowed_handler),
        )
        .fallback(not_found_handler);

    let router = if let Some(limit) = max_request_bytes {
        router.layer(DefaultBodyLimit::max(limit))
    } else {
        router
    };

    with_outer_layers(router).with_state(state)
}

/// Preflight handling, panic recovery and the baseline headers. The header
/// layers sit outermost so every response carries them, including 204
/// preflights and recovered panics.
fn with_outer_layers<S>(router: Router<S>) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    let mut router = router
        .layer(middleware::from_fn(preflight))
        .layer(CatchPanicLayer::custom(panic_response));
    for (name, value) in BASELINE_HEADERS {
        router = router.layer(SetResponseHeaderLayer::overriding(
            name,
            HeaderValue::from_static(value),
        ));
    }
    router
}

/// `OPTIONS` on any path is answered here; the baseline header layers add
/// the CORS headers on the way out.
async fn preflight(req: Request, next: Next) -> Response {
    if req.method() == Method::OPTIONS {
        return StatusCode::NO_CONTENT.into_response();
    }
    next.run(req).await
}

fn panic_response(_panic: Box<dyn Any + Send + 'static>) -> Response {
    tracing::error!("handler panicked");
    RelayError::Internal { details: None }.into_response()
}

#[derive(Debug, Deserialize)]
struct ChatQuery {
    msg: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiChatQuery {
    message: Option<String>,
}

/// Identify the caller and charge one request against its quota, then make
/// sure the relay can reach upstream at all.
async fn admit(
    state: &AppState,
    headers: &HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
) -> Result<String, RelayError> {
    let client = client_key(
        headers,
        peer.map(|ConnectInfo(addr)| addr.ip()),
        state.trust_forwarded,
    );
    // The admission's write-back task is detached here.
    state.limiter.check(&client).await?;
    state.upstream.ensure_credential()?;
    Ok(client)
}

/// Sanitize, forward upstream and normalize the reply.
async fn relay(
    state: &AppState,
    route: &'static str,
    client: &str,
    request: ChatRequest,
) -> Result<Json<NormalizedResponse>, RelayError> {
    let payload = match request {
        ChatRequest::Simple { message } => {
            UpstreamPayload::single(&state.upstream_config, sanitized_text(&message)?)
        }
        ChatRequest::Structured(mut chat) => {
            chat.messages = chat
                .messages
                .into_iter()
                .map(Message::sanitized)
                .collect::<Result<Vec<_>, _>>()?;
            UpstreamPayload::conversation(&state.upstream_config, chat)
        }
    };

    let start = Instant::now();
    let completion = state.upstream.complete(&payload).await?;
    let normalized = state.normalizer.normalize(&completion.response);
    tracing::info!(
        route,
        client = %client,
        model = %payload.model,
        messages = payload.messages.len(),
        upstream_status = completion.status.as_u16(),
        latency_ms = start.elapsed().as_millis() as u64,
        "relayed chat request"
    );
    Ok(Json(normalized))
}

/// Handler for `GET /chat?msg=...`.
async fn chat_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
    query: Result<Query<ChatQuery>, QueryRejection>,
) -> Result<Json<NormalizedResponse>, RelayError> {
    let client = admit(&state, &headers, peer).await?;
    let msg = query.ok().and_then(|Query(q)| q.msg);
    let request = validate::query_message(msg.as_deref(), "msg", "/chat?msg=Hello")?;
    relay(&state, "/chat", &client, request).await
}

/// Handler for `GET /api/chat?message=...`.
async fn api_chat_query_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
    query: Result<Query<ApiChatQuery>, QueryRejection>,
) -> Result<Json<NormalizedResponse>, RelayError> {
    let client = admit(&state, &headers, peer).await?;
    let message = query.ok().and_then(|Query(q)| q.message);
    let request =
        validate::query_message(message.as_deref(), "message", "/api/chat?message=Hello")?;
    relay(&state, "/api/chat", &client, request).await
}

/// Handler for `POST /api/chat` with a `{ "message": ... }` body.
async fn api_chat_body_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<NormalizedResponse>, RelayError> {
    let client = admit(&state, &headers, peer).await?;
    let body = body.map_err(|rejection| body_rejection(&state, rejection))?;
    let request = validate::simple_body(&body)?;
    relay(&state, "/api/chat", &client, request).await
}

/// Handler for `POST /` with a full `{ model, messages, ... }` body.
async fn structured_chat_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<NormalizedResponse>, RelayError> {
    let client = admit(&state, &headers, peer).await?;
    let body = body.map_err(|rejection| body_rejection(&state, rejection))?;
    let request = validate::structured_body(&body)?;
    relay(&state, "/", &client, request).await
}

fn body_rejection(state: &AppState, rejection: BytesRejection) -> RelayError {
    match rejection {
        BytesRejection::FailedToBufferBody(FailedToBufferBody::LengthLimitError(_)) => {
            tracing::warn!(limit = ?state.max_request_bytes, "request body exceeded configured limit");
            RelayError::PayloadTooLarge {
                limit: state.max_request_bytes,
            }
        }
        other => {
            tracing::warn!(error = %other, "failed to read request body");
            RelayError::Internal {
                details: Some("failed to read request body".into()),
            }
        }
    }
}

/// Static documentation for `/` and `/docs`.
async fn docs_handler(State(state): State<AppState>) -> Html<String> {
    Html(state.docs_html.to_string())
}

/// Simple liveness endpoint.
async fn health_handler() -> Response {
    let json = serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
    });
    (StatusCode::OK, Json(json)).into_response()
}

async fn not_found_handler() -> RelayError {
    RelayError::NotFound
}

async fn method_not_allowed_handler() -> RelayError {
    RelayError::MethodNotAllowed
}
