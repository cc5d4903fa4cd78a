//! Integration tests for the HTTP upstream client.
//!
//! Each test runs an in-process axum server standing in for the upstream
//! platform and points the client at it.

use axum::extract::{Path, Query};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use blox_core::{Method, RequestDescriptor, ResourceCategory, UpstreamClient, UpstreamResult};
use blox_upstream::{Credentials, HttpUpstreamClient, SecretString, UpstreamConfig};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

async fn get_user(Path(id): Path<u64>) -> impl IntoResponse {
    if id == 404 {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({"errors": [{"code": 3, "message": "The user id is invalid."}]})),
        );
    }
    (
        StatusCode::OK,
        Json(json!({"id": id, "name": "Roblox", "displayName": "Roblox"})),
    )
}

async fn busy() -> impl IntoResponse {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        [("retry-after", "2")],
        Json(json!({"message": "Service Unavailable"})),
    )
}

async fn slow() -> Json<Value> {
    tokio::time::sleep(Duration::from_secs(2)).await;
    Json(json!({}))
}

async fn garbage() -> &'static str {
    "definitely not json"
}

async fn search(Query(params): Query<HashMap<String, String>>) -> Json<Value> {
    Json(json!({"params": params}))
}

async fn presence(headers: HeaderMap, Json(body): Json<Value>) -> Json<Value> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    Json(json!({
        "contentType": header("content-type"),
        "cookie": header("cookie"),
        "userAgent": header("user-agent"),
        "body": body,
    }))
}

async fn spawn_upstream() -> SocketAddr {
    let app = Router::new()
        .route("/v1/users/:id", get(get_user))
        .route("/v1/busy", get(busy))
        .route("/v1/slow", get(slow))
        .route("/v1/garbage", get(garbage))
        .route("/v1/search/items", get(search))
        .route("/v1/presence/users", post(presence));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn client_for(addr: SocketAddr) -> HttpUpstreamClient {
    let config = UpstreamConfig::new("test-upstream")
        .with_base_url_for_all(format!("http://{addr}"))
        .with_timeout(Duration::from_millis(300));
    HttpUpstreamClient::new(config).unwrap()
}

fn descriptor_for(template: &str) -> RequestDescriptor {
    RequestDescriptor::builder(ResourceCategory::Users, template)
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_success_returns_payload() {
    let client = client_for(spawn_upstream().await);
    let descriptor = RequestDescriptor::builder(ResourceCategory::Users, "/v1/users/{userId}")
        .path_param("userId", 1)
        .build()
        .unwrap();

    match client.call(&descriptor).await {
        UpstreamResult::Success { payload, status } => {
            assert_eq!(status, 200);
            assert_eq!(payload["id"], 1);
            assert_eq!(payload["name"], "Roblox");
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn test_not_found_is_permanent_with_upstream_message() {
    let client = client_for(spawn_upstream().await);

    let result = client.call(&descriptor_for("/v1/users/404")).await;

    assert_eq!(
        result,
        UpstreamResult::permanent("The user id is invalid.", 404)
    );
}

#[tokio::test]
async fn test_service_unavailable_is_transient_with_retry_after() {
    let client = client_for(spawn_upstream().await);

    match client.call(&descriptor_for("/v1/busy")).await {
        UpstreamResult::TransientFailure {
            message,
            status,
            retry_after,
        } => {
            assert_eq!(message, "Service Unavailable");
            assert_eq!(status, Some(503));
            assert_eq!(retry_after, Some(Duration::from_secs(2)));
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn test_slow_upstream_times_out() {
    let client = client_for(spawn_upstream().await);

    let result = client.call(&descriptor_for("/v1/slow")).await;

    assert_eq!(
        result,
        UpstreamResult::Timeout {
            after: Duration::from_millis(300)
        }
    );
}

#[tokio::test]
async fn test_invalid_json_is_permanent_bad_gateway() {
    let client = client_for(spawn_upstream().await);

    let result = client.call(&descriptor_for("/v1/garbage")).await;

    assert!(matches!(
        result,
        UpstreamResult::PermanentFailure { status: 502, .. }
    ));
}

#[tokio::test]
async fn test_query_parameters_are_sent() {
    let client = client_for(spawn_upstream().await);
    let descriptor = RequestDescriptor::builder(ResourceCategory::Catalog, "/v1/search/items")
        .query("keyword", "red hat")
        .query("limit", 10)
        .build()
        .unwrap();

    match client.call(&descriptor).await {
        UpstreamResult::Success { payload, .. } => {
            assert_eq!(payload["params"]["keyword"], "red hat");
            assert_eq!(payload["params"]["limit"], "10");
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn test_post_sends_json_body_headers_and_cookie() {
    let addr = spawn_upstream().await;
    let config = UpstreamConfig::new("test-upstream")
        .with_base_url_for_all(format!("http://{addr}"))
        .with_credentials(Credentials::SessionCookie(SecretString::new(
            "cookie-value".to_string(),
        )));
    let client = HttpUpstreamClient::new(config).unwrap();

    let descriptor = RequestDescriptor::builder(ResourceCategory::Presence, "/v1/presence/users")
        .method(Method::POST)
        .json_body(json!({"userIds": [1, 2]}))
        .build()
        .unwrap();

    match client.call(&descriptor).await {
        UpstreamResult::Success { payload, .. } => {
            assert_eq!(payload["contentType"], "application/json");
            assert_eq!(payload["cookie"], ".ROBLOSECURITY=cookie-value");
            assert!(payload["userAgent"]
                .as_str()
                .unwrap()
                .starts_with("blox-gateway/"));
            assert_eq!(payload["body"], json!({"userIds": [1, 2]}));
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn test_refused_connection_is_unreachable() {
    // Bind then drop to get a port nothing listens on
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = client_for(addr);
    let result = client.call(&descriptor_for("/v1/users/1")).await;

    assert!(matches!(
        result,
        UpstreamResult::TransientFailure { status: None, .. }
    ));
    assert_eq!(result.kind(), "unreachable");
}
