//! HTTP surface tests against a stub upstream.

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    response::Response,
    Router,
};
use blox_config::GatewayConfig;
use blox_core::{RequestDescriptor, UpstreamClient, UpstreamResult};
use blox_gateway::Gateway;
use blox_resilience::{RateLimiter, RateLimiterConfig, RetryConfig, RetryController};
use blox_server::{create_router, AppState};
use blox_telemetry::{Metrics, MetricsConfig};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::ServiceExt;

/// Echoes the upstream path, answers 404 for `/v1/users/404` and sleeps
/// `delay` before every answer
struct EchoUpstream {
    seen: Mutex<Vec<RequestDescriptor>>,
    delay: Duration,
}

impl EchoUpstream {
    fn new() -> Arc<Self> {
        Self::slow(Duration::ZERO)
    }

    fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            seen: Mutex::new(Vec::new()),
            delay,
        })
    }

    fn seen(&self) -> Vec<RequestDescriptor> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl UpstreamClient for EchoUpstream {
    fn id(&self) -> &str {
        "echo"
    }

    async fn call(&self, descriptor: &RequestDescriptor) -> UpstreamResult {
        self.seen.lock().unwrap().push(descriptor.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if descriptor.path() == "/v1/users/404" {
            return UpstreamResult::permanent("The user id is invalid.", 404);
        }
        UpstreamResult::success(json!({
            "path": descriptor.path(),
            "query": descriptor.query(),
            "body": descriptor.body(),
        }))
    }
}

fn no_backoff() -> RetryController {
    RetryController::new(RetryConfig {
        base_delay: Duration::ZERO,
        max_delay: Duration::ZERO,
        jitter_ratio: 0.0,
        ..RetryConfig::default()
    })
}

fn app_with(upstream: Arc<EchoUpstream>, config: GatewayConfig) -> Router {
    let gateway = Gateway::builder(upstream)
        .retry(no_backoff())
        .metrics(Arc::new(Metrics::new(&MetricsConfig::default()).unwrap()))
        .build();
    create_router(AppState::new(gateway, config))
}

fn app(upstream: Arc<EchoUpstream>) -> Router {
    app_with(upstream, GatewayConfig::default())
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> Response {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    app.clone().oneshot(request).await.unwrap()
}

async fn json_body(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn user_lookup_renders_success_envelope() {
    let upstream = EchoUpstream::new();
    let app = app(upstream.clone());

    let response = send(&app, Method::GET, "/api/users/156", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));

    let body = json_body(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["path"], "/v1/users/156");
    assert!(body["error"].is_null());
}

#[tokio::test]
async fn repeated_get_served_from_cache() {
    let upstream = EchoUpstream::new();
    let app = app(upstream.clone());

    for _ in 0..3 {
        let response = send(&app, Method::GET, "/api/groups/7/roles", None).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    assert_eq!(upstream.seen().len(), 1);
}

#[tokio::test]
async fn upstream_not_found_passes_through_as_error_envelope() {
    let app = app(EchoUpstream::new());

    let response = send(&app, Method::GET, "/api/users/404", None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let body = json_body(response).await;
    assert_eq!(body["success"], false);
    assert!(body["data"].is_null());
    assert_eq!(body["error"]["code"], "upstream_permanent_error");
    assert_eq!(body["error"]["status"], 404);
}

#[tokio::test]
async fn invalid_id_rejected_before_upstream() {
    let upstream = EchoUpstream::new();
    let app = app(upstream.clone());

    for uri in ["/api/users/abc", "/api/users/0", "/api/badges/-1"] {
        let response = send(&app, Method::GET, uri, None).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
        assert_eq!(json_body(response).await["error"]["code"], "invalid_request");
    }

    assert!(upstream.seen().is_empty());
}

#[tokio::test]
async fn game_lookup_uses_universe_query() {
    let upstream = EchoUpstream::new();
    let app = app(upstream.clone());

    let body = json_body(send(&app, Method::GET, "/api/games/1818", None).await).await;

    assert_eq!(body["data"]["path"], "/v1/games");
    assert_eq!(body["data"]["query"]["universeIds"], "1818");
}

#[tokio::test]
async fn batch_users_posts_ids_and_caches() {
    let upstream = EchoUpstream::new();
    let app = app(upstream.clone());
    let request = json!({"userIds": [1, 156]});

    let first = send(&app, Method::POST, "/api/users", Some(request.clone())).await;
    assert_eq!(first.status(), StatusCode::OK);
    let body = json_body(first).await;
    assert_eq!(body["data"]["body"]["userIds"], json!([1, 156]));
    assert_eq!(body["data"]["body"]["excludeBannedUsers"], false);

    send(&app, Method::POST, "/api/users", Some(request)).await;
    assert_eq!(upstream.seen().len(), 1);
    assert_eq!(upstream.seen()[0].method(), &Method::POST);
}

#[tokio::test]
async fn batch_users_validates_ids() {
    let upstream = EchoUpstream::new();
    let app = app(upstream.clone());
    let too_many: Vec<u64> = (1..=101).collect();

    for request in [
        json!({"userIds": []}),
        json!({"userIds": too_many}),
        json!({"ids": [1]}),
    ] {
        let response = send(&app, Method::POST, "/api/users", Some(request)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    assert!(upstream.seen().is_empty());
}

#[tokio::test]
async fn search_requires_keyword() {
    let upstream = EchoUpstream::new();
    let app = app(upstream.clone());

    let missing = send(&app, Method::GET, "/api/users/search", None).await;
    assert_eq!(missing.status(), StatusCode::BAD_REQUEST);

    let blank = send(&app, Method::GET, "/api/users/search?keyword=%20", None).await;
    assert_eq!(blank.status(), StatusCode::BAD_REQUEST);

    let ok = send(&app, Method::GET, "/api/users/search?keyword=builderman", None).await;
    let body = json_body(ok).await;
    assert_eq!(body["data"]["query"]["keyword"], "builderman");
    assert_eq!(body["data"]["query"]["limit"], "10");
}

#[tokio::test]
async fn proxy_forwards_path_and_query() {
    let upstream = EchoUpstream::new();
    let app = app(upstream.clone());

    let response = send(
        &app,
        Method::GET,
        "/api/proxy/thumbnails/v1/users/avatar-headshot?userIds=1&size=48x48",
        None,
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["data"]["path"], "/v1/users/avatar-headshot");
    assert_eq!(body["data"]["query"]["size"], "48x48");
}

#[tokio::test]
async fn proxy_rejects_unknown_category_and_traversal() {
    let upstream = EchoUpstream::new();
    let app = app(upstream.clone());

    let unknown = send(&app, Method::GET, "/api/proxy/weather/v1/today", None).await;
    assert_eq!(unknown.status(), StatusCode::BAD_REQUEST);

    let traversal = send(&app, Method::GET, "/api/proxy/users/v1/../admin", None).await;
    assert_eq!(traversal.status(), StatusCode::BAD_REQUEST);

    assert!(upstream.seen().is_empty());
}

#[tokio::test]
async fn cache_administration() {
    let upstream = EchoUpstream::new();
    let app = app(upstream.clone());

    send(&app, Method::GET, "/api/users/1", None).await;
    send(&app, Method::GET, "/api/users/2", None).await;
    send(&app, Method::GET, "/api/groups/3", None).await;

    let stats = json_body(send(&app, Method::GET, "/api/cache/stats", None).await).await;
    assert_eq!(stats["data"]["entries"], 3);
    assert_eq!(stats["data"]["misses"], 3);

    let empty = send(&app, Method::POST, "/api/cache/invalidate", Some(json!({}))).await;
    assert_eq!(empty.status(), StatusCode::BAD_REQUEST);

    let removed = send(
        &app,
        Method::POST,
        "/api/cache/invalidate",
        Some(json!({"category": "users"})),
    )
    .await;
    assert_eq!(json_body(removed).await["data"]["removed"], 2);

    let cleared = send(&app, Method::DELETE, "/api/cache", None).await;
    assert_eq!(json_body(cleared).await["data"]["removed"], 1);

    send(&app, Method::GET, "/api/users/1", None).await;
    assert_eq!(upstream.seen().len(), 4);
}

#[tokio::test]
async fn rate_limit_status_and_rejection() {
    let upstream = EchoUpstream::new();
    let gateway = Gateway::builder(upstream.clone())
        .rate_limiter(RateLimiter::new(
            "test",
            RateLimiterConfig::new(1, Duration::from_secs(60)),
            Duration::ZERO,
        ))
        .retry(no_backoff())
        .build();
    let app = create_router(AppState::new(gateway, GatewayConfig::default()));

    assert_eq!(
        send(&app, Method::GET, "/api/badges/1", None).await.status(),
        StatusCode::OK
    );
    let limited = send(&app, Method::GET, "/api/badges/2", None).await;
    assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(json_body(limited).await["error"]["code"], "rate_limit_exceeded");

    let status = json_body(send(&app, Method::GET, "/api/rate-limits", None).await).await;
    assert_eq!(status["data"]["enabled"], true);
    assert_eq!(status["data"]["buckets"].as_array().map(Vec::len), Some(1));
    assert_eq!(status["data"]["buckets"][0]["category"], "badges");
}

#[tokio::test(start_paused = true)]
async fn request_deadline_cancels_fetch() {
    let mut config = GatewayConfig::default();
    config.server.request_timeout = Duration::from_millis(100);
    let app = app_with(EchoUpstream::slow(Duration::from_secs(5)), config);

    let response = send(&app, Method::GET, "/api/users/1", None).await;

    assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
    assert_eq!(json_body(response).await["error"]["code"], "request_cancelled");
}

#[tokio::test]
async fn health_and_metrics() {
    let app = app(EchoUpstream::new());

    let health = send(&app, Method::GET, "/health", None).await;
    assert_eq!(health.status(), StatusCode::OK);
    assert_eq!(json_body(health).await["data"]["status"], "healthy");

    send(&app, Method::GET, "/api/users/1", None).await;
    let metrics = send(&app, Method::GET, "/metrics", None).await;
    assert_eq!(metrics.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(metrics.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("blox_gateway_fetch_total"));
    assert!(text.contains("blox_gateway_upstream_requests_total"));
}

#[tokio::test]
async fn metrics_disabled_returns_not_found() {
    let gateway = Gateway::builder(EchoUpstream::new()).build();
    let app = create_router(AppState::new(gateway, GatewayConfig::default()));

    let response = send(&app, Method::GET, "/metrics", None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
