//! Integration tests for the relay server
//!
//! These tests run the relay with the real hyper client against a throwaway upstream bound to
//! a loopback port, so the transport, timeout and header handling are exercised end-to-end.

use axum::Router;
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use cb_relay::client::{HyperClient, PoolSettings, create_hyper_client};
use cb_relay::credentials::{API_KEY_ENV_VAR, CredentialResolver, CredentialSource};
use cb_relay::upstream::UpstreamConfig;
use cb_relay::{AppState, RELAY_PATH, build_router};
use serde_json::json;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tower::util::ServiceExt; // for oneshot()

#[derive(Clone, Default)]
struct Recorded {
    requests: Arc<Mutex<Vec<(HeaderMap, Bytes)>>>,
}

async fn spawn_upstream(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

fn relay_state(upstream: SocketAddr, timeout: Duration) -> AppState<HyperClient> {
    let upstream = UpstreamConfig::builder()
        .url(format!("http://{upstream}/v1/responses").parse().unwrap())
        .timeout(timeout)
        .build();
    let credentials =
        CredentialResolver::new(vec![CredentialSource::Env(API_KEY_ENV_VAR.to_string())]);
    AppState::with_client(
        create_hyper_client(PoolSettings::default()),
        upstream,
        credentials,
    )
    .with_env(HashMap::from([(
        API_KEY_ENV_VAR.to_string(),
        "sk-integration".to_string(),
    )]))
}

fn relay_request(body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(RELAY_PATH)
        .header("origin", "https://app.custodybuddy.com")
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

async fn body_bytes(response: Response) -> Bytes {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_request_reaches_upstream_with_credential_and_defaults() {
    let recorded = Recorded::default();
    let upstream = Router::new()
        .route(
            "/v1/responses",
            post(
                |State(recorded): State<Recorded>, headers: HeaderMap, body: Bytes| async move {
                    recorded.requests.lock().unwrap().push((headers, body));
                    (StatusCode::OK, r#"{"id":"resp_1","status":"completed"}"#)
                },
            ),
        )
        .with_state(recorded.clone());
    let addr = spawn_upstream(upstream).await;

    let app = build_router(relay_state(addr, Duration::from_secs(5)));
    let response = app
        .oneshot(relay_request(json!({"input": "Summarise this"})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["access-control-allow-origin"],
        "https://app.custodybuddy.com"
    );
    assert_eq!(
        body_bytes(response).await,
        r#"{"id":"resp_1","status":"completed"}"#
    );

    let requests = recorded.requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    let (headers, body) = &requests[0];
    assert_eq!(headers["authorization"], "Bearer sk-integration");
    assert_eq!(headers["content-type"], "application/json");
    assert!(!headers.contains_key("origin"));

    let forwarded: serde_json::Value = serde_json::from_slice(body).unwrap();
    assert_eq!(
        forwarded,
        json!({"input": "Summarise this", "response_format": {"type": "json_object"}})
    );
}

#[tokio::test]
async fn test_upstream_error_status_and_headers_pass_through() {
    let upstream = Router::new().route(
        "/v1/responses",
        post(|| async {
            (
                StatusCode::TOO_MANY_REQUESTS,
                [
                    ("x-request-id", "req_429"),
                    ("x-ratelimit-remaining-requests", "0"),
                    ("x-ratelimit-reset-requests", "20ms"),
                    ("set-cookie", "__cf_bm=abc; HttpOnly"),
                ],
                r#"{"error":{"message":"Rate limit reached","code":"rate_limit_exceeded"}}"#,
            )
                .into_response()
        }),
    );
    let addr = spawn_upstream(upstream).await;

    let app = build_router(relay_state(addr, Duration::from_secs(5)));
    let response = app.oneshot(relay_request(json!({}))).await.unwrap();

    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let headers = response.headers().clone();
    assert_eq!(headers["x-upstream-request-id"], "req_429");
    assert_eq!(headers["x-ratelimit-remaining-requests"], "0");
    assert_eq!(headers["x-ratelimit-reset-requests"], "20ms");
    assert!(!headers.contains_key("set-cookie"));
    assert!(!headers.contains_key("x-request-id"));
    assert_eq!(headers["content-type"], "application/json; charset=utf-8");

    assert_eq!(
        body_bytes(response).await,
        r#"{"error":{"message":"Rate limit reached","code":"rate_limit_exceeded"}}"#
    );
}

#[tokio::test]
async fn test_unreachable_upstream_returns_502() {
    // Bind then drop, leaving a port nothing listens on.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let app = build_router(relay_state(addr, Duration::from_secs(5)));
    let response = app.oneshot(relay_request(json!({}))).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(body["error"], "Upstream request failed");
    assert!(!body["detail"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn test_slow_upstream_times_out_with_502() {
    let upstream = Router::new().route(
        "/v1/responses",
        post(|| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            "{}"
        }),
    );
    let addr = spawn_upstream(upstream).await;

    let app = build_router(relay_state(addr, Duration::from_millis(200)));
    let response = app.oneshot(relay_request(json!({}))).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert!(body["detail"].as_str().unwrap().contains("timed out"));
}

#[tokio::test]
async fn test_credential_read_from_secret_file_on_disk() {
    let root = tempfile::tempdir().unwrap();
    let base_dir = root.path().join("site/public_html/api");
    std::fs::create_dir_all(&base_dir).unwrap();
    let secure_dir = root.path().join("site/secure");
    std::fs::create_dir_all(&secure_dir).unwrap();
    std::fs::write(
        secure_dir.join("cb_keys.json"),
        r#"{"CB_OPENAI_KEY": "sk-from-disk"}"#,
    )
    .unwrap();

    let recorded = Recorded::default();
    let upstream = Router::new()
        .route(
            "/v1/responses",
            post(
                |State(recorded): State<Recorded>, headers: HeaderMap, body: Bytes| async move {
                    recorded.requests.lock().unwrap().push((headers, body));
                    "{}"
                },
            ),
        )
        .with_state(recorded.clone());
    let addr = spawn_upstream(upstream).await;

    let state = AppState::with_client(
        create_hyper_client(PoolSettings::default()),
        UpstreamConfig::builder()
            .url(format!("http://{addr}/v1/responses").parse().unwrap())
            .build(),
        CredentialResolver::standard(&base_dir, None),
    )
    .with_env(HashMap::<String, String>::new());

    let response = build_router(state)
        .oneshot(relay_request(json!({"model": "gpt-4o-mini"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let requests = recorded.requests.lock().unwrap();
    assert_eq!(requests[0].0["authorization"], "Bearer sk-from-disk");
}

#[tokio::test]
async fn test_missing_secret_files_on_disk_return_500() {
    let root = tempfile::tempdir().unwrap();
    let base_dir = root.path().join("site/public_html/api");
    std::fs::create_dir_all(&base_dir).unwrap();

    let state = AppState::with_client(
        create_hyper_client(PoolSettings::default()),
        UpstreamConfig::default(),
        CredentialResolver::standard(&base_dir, None),
    )
    .with_env(HashMap::<String, String>::new());

    let response = build_router(state)
        .oneshot(relay_request(json!({})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let text = String::from_utf8(body_bytes(response).await.to_vec()).unwrap();
    assert_eq!(text, r#"{"error":"Server API key not configured."}"#);
}
