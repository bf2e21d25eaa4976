#[path = "common/mod.rs"]
mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use common::{config_for, start_stub_upstream, StubReply};
use http_body_util::BodyExt;
use persona_relay::{app, build_state, AppConfig, UpstreamConfig};
use tower::ServiceExt; // for oneshot

fn offline_app() -> Router {
    // Points at a closed port; these tests never reach upstream.
    app(build_state(config_for("http://127.0.0.1:9/v1/chat/completions")).unwrap())
}

async fn send(app: Router, req: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
    let resp = app.oneshot(req).await.unwrap();
    let status = resp.status();
    let headers = resp.headers().clone();
    let body = resp.into_body().collect().await.unwrap().to_bytes().to_vec();
    (status, headers, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn json(body: &[u8]) -> serde_json::Value {
    serde_json::from_slice(body).expect("body is JSON")
}

fn assert_baseline_headers(headers: &axum::http::HeaderMap) {
    assert_eq!(headers.get("access-control-allow-origin").unwrap(), "*");
    assert_eq!(
        headers.get("access-control-allow-methods").unwrap(),
        "GET, POST, OPTIONS"
    );
    assert_eq!(headers.get("x-content-type-options").unwrap(), "nosniff");
    assert_eq!(headers.get("x-frame-options").unwrap(), "DENY");
    assert_eq!(headers.get("x-xss-protection").unwrap(), "1; mode=block");
    assert!(headers
        .get("strict-transport-security")
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("max-age="));
}

#[tokio::test]
async fn health_reports_status_timestamp_and_version() {
    let (status, headers, body) = send(offline_app(), get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_baseline_headers(&headers);
    let v = json(&body);
    assert_eq!(v["status"], "healthy");
    assert_eq!(v["version"], env!("CARGO_PKG_VERSION"));
    let ts = v["timestamp"].as_str().unwrap();
    assert!(chrono::DateTime::parse_from_rfc3339(ts).is_ok());
}

#[tokio::test]
async fn docs_are_served_on_root_and_docs() {
    for uri in ["/", "/docs"] {
        let (status, headers, body) = send(offline_app(), get(uri)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(headers
            .get(header::CONTENT_TYPE)
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("text/html"));
        assert_baseline_headers(&headers);
        assert!(String::from_utf8(body).unwrap().contains("/chat?msg="));
    }
}

#[tokio::test]
async fn options_on_any_path_is_no_content() {
    for uri in ["/", "/chat", "/api/chat", "/does/not/exist"] {
        let req = Request::builder()
            .method("OPTIONS")
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        let (status, headers, body) = send(offline_app(), req).await;
        assert_eq!(status, StatusCode::NO_CONTENT, "OPTIONS {uri}");
        assert_baseline_headers(&headers);
        assert!(body.is_empty());
    }
}

#[tokio::test]
async fn unknown_routes_are_json_404() {
    let cases = [
        get("/nope"),
        post_json("/health", "{}"),
        post_json("/chat", r#"{"message":"hi"}"#),
        Request::builder()
            .method("DELETE")
            .uri("/")
            .body(Body::empty())
            .unwrap(),
    ];
    for req in cases {
        let (status, headers, body) = send(offline_app(), req).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_baseline_headers(&headers);
        assert_eq!(json(&body)["error"], "Not Found");
    }
}

#[tokio::test]
async fn unsupported_method_on_api_chat_is_405() {
    let req = Request::builder()
        .method("PUT")
        .uri("/api/chat")
        .body(Body::empty())
        .unwrap();
    let (status, _, body) = send(offline_app(), req).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(json(&body)["error"], "Method not allowed");
}

#[tokio::test]
async fn missing_or_empty_msg_is_400_with_example() {
    for uri in ["/chat", "/chat?msg=", "/chat?msg=%20%20"] {
        let (status, headers, body) = send(offline_app(), get(uri)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "GET {uri}");
        assert_baseline_headers(&headers);
        let v = json(&body);
        assert_eq!(v["error"], "Missing or empty 'msg' parameter");
        assert_eq!(v["example"], "/chat?msg=Hello");
    }
}

#[tokio::test]
async fn msg_over_4000_chars_is_400_too_long() {
    let uri = format!("/chat?msg={}", "a".repeat(4001));
    let (status, _, body) = send(offline_app(), get(&uri)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json(&body)["error"].as_str().unwrap().contains("too long"));
}

#[tokio::test]
async fn body_messages_over_4000_chars_are_400_too_long() {
    let long = "a".repeat(4001);
    let cases = [
        ("/api/chat", serde_json::json!({"message": long})),
        (
            "/",
            serde_json::json!({"model": "m", "messages": [{"role": "user", "content": long}]}),
        ),
    ];
    for (uri, body) in cases {
        let (status, _, body) = send(offline_app(), post_json(uri, &body.to_string())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "POST {uri}");
        assert!(json(&body)["error"].as_str().unwrap().contains("too long"));
    }
}

#[tokio::test]
async fn malformed_json_is_reported_explicitly() {
    for uri in ["/", "/api/chat"] {
        let (status, _, body) = send(offline_app(), post_json(uri, "{\"model\": ")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json(&body)["error"], "Invalid JSON in request body");
    }
}

#[tokio::test]
async fn structured_shape_errors_are_400() {
    let (status, _, body) = send(
        offline_app(),
        post_json("/", r#"{"model":"m","messages":[]}"#),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json(&body)["error"], "'messages' array cannot be empty");
}

#[tokio::test]
async fn oversized_body_is_413() {
    let mut config = config_for("http://127.0.0.1:9/v1/chat/completions");
    config.max_request_bytes = Some(64);
    let app = app(build_state(config).unwrap());
    let body = serde_json::json!({"message": "x".repeat(500)}).to_string();
    let (status, _, body) = send(app, post_json("/api/chat", &body)).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(json(&body)["error"], "Request too large");
}

#[tokio::test]
async fn missing_credential_is_500_without_upstream_call() {
    let (url, log, handle) = start_stub_upstream(StubReply::Content("unused".into())).await;
    let config = AppConfig {
        upstream: UpstreamConfig {
            url,
            api_key: None,
            ..UpstreamConfig::default()
        },
        ..AppConfig::default()
    };
    let app = app(build_state(config).unwrap());

    let requests = [
        get("/chat?msg=hello"),
        get("/api/chat?message=hello"),
        post_json("/api/chat", r#"{"message":"hello"}"#),
        post_json(
            "/",
            r#"{"model":"m","messages":[{"role":"user","content":"hello"}]}"#,
        ),
    ];
    for req in requests {
        let (status, headers, body) = send(app.clone(), req).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_baseline_headers(&headers);
        assert_eq!(json(&body)["error"], "Missing upstream credential");
    }
    assert_eq!(log.hits(), 0, "no upstream call may be attempted");
    handle.abort();
}
