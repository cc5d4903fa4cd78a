//! HTTP request handlers for the gateway API.
//!
//! Resource handlers only translate the request into a
//! [`RequestDescriptor`]; caching, rate limiting and retries happen in the
//! gateway.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use blox_core::{Method, RequestDescriptor, ResourceCategory};
use blox_resilience::{BucketStats, CacheStats};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use tracing::{debug, info, instrument};

use crate::{
    error::{ApiError, ApiResponse},
    extractors::{ApiPath, ApiQuery, JsonBody, RequestId},
    state::AppState,
};

/// Largest id list accepted by the batch endpoints
pub const MAX_BATCH_IDS: usize = 100;

/// Page size used when the caller does not pass one
const DEFAULT_LIMIT: u32 = 10;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status
    pub status: String,
    /// Version
    pub version: String,
    /// Uptime in seconds
    pub uptime_seconds: u64,
    /// Entries currently cached
    pub cache_entries: usize,
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Result<ApiResponse, ApiError> {
    ApiResponse::ok(&HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.uptime().as_secs(),
        cache_entries: state.gateway().cache().len(),
    })
}

/// Metrics endpoint (Prometheus format)
pub async fn metrics_endpoint(State(state): State<AppState>) -> Response {
    match state.metrics() {
        Some(metrics) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            metrics.gather(),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "metrics are disabled").into_response(),
    }
}

fn require_id(name: &str, id: u64) -> Result<u64, ApiError> {
    if id == 0 {
        return Err(ApiError::bad_request(format!("{name} must be a positive integer")));
    }
    Ok(id)
}

fn require_ids(ids: &[u64]) -> Result<(), ApiError> {
    if ids.is_empty() {
        return Err(ApiError::bad_request("userIds must not be empty"));
    }
    if ids.len() > MAX_BATCH_IDS {
        return Err(ApiError::bad_request(format!(
            "userIds accepts at most {MAX_BATCH_IDS} ids"
        )));
    }
    if ids.contains(&0) {
        return Err(ApiError::bad_request("userIds must be positive integers"));
    }
    Ok(())
}

async fn forward(state: &AppState, descriptor: RequestDescriptor) -> ApiResponse {
    ApiResponse(state.fetch(&descriptor).await)
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

/// Batch user lookup body
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsersByIdRequest {
    /// Users to look up
    pub user_ids: Vec<u64>,
    /// Leave banned users out of the result
    #[serde(default)]
    pub exclude_banned_users: bool,
}

/// User search query
#[derive(Debug, Deserialize)]
pub struct UserSearchQuery {
    /// Search keyword
    pub keyword: String,
    /// Page size
    pub limit: Option<u32>,
    /// Paging cursor
    pub cursor: Option<String>,
}

/// Paging query shared by list endpoints
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageQuery {
    /// Page size
    pub limit: Option<u32>,
    /// Paging cursor
    pub cursor: Option<String>,
    /// `Asc` or `Desc`
    pub sort_order: Option<String>,
}

/// Single user profile
#[instrument(skip(state))]
pub async fn get_user(
    State(state): State<AppState>,
    ApiPath(user_id): ApiPath<u64>,
) -> Result<ApiResponse, ApiError> {
    let descriptor = RequestDescriptor::builder(ResourceCategory::Users, "/v1/users/{userId}")
        .path_param("userId", require_id("userId", user_id)?)
        .build()?;
    Ok(forward(&state, descriptor).await)
}

/// Profiles for a list of user ids
#[instrument(skip_all)]
pub async fn get_users(
    State(state): State<AppState>,
    RequestId(request_id): RequestId,
    JsonBody(body): JsonBody<UsersByIdRequest>,
) -> Result<ApiResponse, ApiError> {
    require_ids(&body.user_ids)?;
    debug!(request_id = %request_id, count = body.user_ids.len(), "Batch user lookup");

    let descriptor = RequestDescriptor::builder(ResourceCategory::Users, "/v1/users")
        .method(Method::POST)
        .json_body(json!({
            "userIds": body.user_ids,
            "excludeBannedUsers": body.exclude_banned_users,
        }))
        .cacheable(true)
        .build()?;
    Ok(forward(&state, descriptor).await)
}

/// Search users by keyword
#[instrument(skip(state))]
pub async fn search_users(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<UserSearchQuery>,
) -> Result<ApiResponse, ApiError> {
    let keyword = query.keyword.trim();
    if keyword.is_empty() {
        return Err(ApiError::bad_request("keyword must not be empty"));
    }

    let descriptor = RequestDescriptor::builder(ResourceCategory::Users, "/v1/users/search")
        .query("keyword", keyword)
        .query("limit", query.limit.unwrap_or(DEFAULT_LIMIT))
        .query_opt("cursor", query.cursor)
        .build()?;
    Ok(forward(&state, descriptor).await)
}

/// Friends of a user
#[instrument(skip(state))]
pub async fn user_friends(
    State(state): State<AppState>,
    ApiPath(user_id): ApiPath<u64>,
) -> Result<ApiResponse, ApiError> {
    let descriptor =
        RequestDescriptor::builder(ResourceCategory::Friends, "/v1/users/{userId}/friends")
            .path_param("userId", require_id("userId", user_id)?)
            .build()?;
    Ok(forward(&state, descriptor).await)
}

/// Badges awarded to a user
#[instrument(skip(state))]
pub async fn user_badges(
    State(state): State<AppState>,
    ApiPath(user_id): ApiPath<u64>,
    ApiQuery(page): ApiQuery<PageQuery>,
) -> Result<ApiResponse, ApiError> {
    let descriptor =
        RequestDescriptor::builder(ResourceCategory::Badges, "/v1/users/{userId}/badges")
            .path_param("userId", require_id("userId", user_id)?)
            .query("limit", page.limit.unwrap_or(DEFAULT_LIMIT))
            .query_opt("cursor", page.cursor)
            .query_opt("sortOrder", page.sort_order)
            .build()?;
    Ok(forward(&state, descriptor).await)
}

// ---------------------------------------------------------------------------
// Games and groups
// ---------------------------------------------------------------------------

/// Game details by universe id
#[instrument(skip(state))]
pub async fn get_game(
    State(state): State<AppState>,
    ApiPath(universe_id): ApiPath<u64>,
) -> Result<ApiResponse, ApiError> {
    let descriptor = RequestDescriptor::builder(ResourceCategory::Games, "/v1/games")
        .query("universeIds", require_id("universeId", universe_id)?)
        .build()?;
    Ok(forward(&state, descriptor).await)
}

/// Group details
#[instrument(skip(state))]
pub async fn get_group(
    State(state): State<AppState>,
    ApiPath(group_id): ApiPath<u64>,
) -> Result<ApiResponse, ApiError> {
    let descriptor = RequestDescriptor::builder(ResourceCategory::Groups, "/v1/groups/{groupId}")
        .path_param("groupId", require_id("groupId", group_id)?)
        .build()?;
    Ok(forward(&state, descriptor).await)
}

/// Roles defined in a group
#[instrument(skip(state))]
pub async fn group_roles(
    State(state): State<AppState>,
    ApiPath(group_id): ApiPath<u64>,
) -> Result<ApiResponse, ApiError> {
    let descriptor =
        RequestDescriptor::builder(ResourceCategory::Groups, "/v1/groups/{groupId}/roles")
            .path_param("groupId", require_id("groupId", group_id)?)
            .build()?;
    Ok(forward(&state, descriptor).await)
}

// ---------------------------------------------------------------------------
// Assets, economy and catalog
// ---------------------------------------------------------------------------

/// Catalog search query
#[derive(Debug, Default, Deserialize)]
pub struct CatalogSearchQuery {
    /// Search keyword
    pub keyword: Option<String>,
    /// Catalog category filter
    pub category: Option<String>,
    /// Catalog subcategory filter
    pub subcategory: Option<String>,
    /// Page size
    pub limit: Option<u32>,
    /// Paging cursor
    pub cursor: Option<String>,
}

/// Asset details
#[instrument(skip(state))]
pub async fn get_asset(
    State(state): State<AppState>,
    ApiPath(asset_id): ApiPath<u64>,
) -> Result<ApiResponse, ApiError> {
    let descriptor =
        RequestDescriptor::builder(ResourceCategory::Assets, "/v2/assets/{assetId}/details")
            .path_param("assetId", require_id("assetId", asset_id)?)
            .build()?;
    Ok(forward(&state, descriptor).await)
}

/// Resale data for a limited asset
#[instrument(skip(state))]
pub async fn resale_data(
    State(state): State<AppState>,
    ApiPath(asset_id): ApiPath<u64>,
) -> Result<ApiResponse, ApiError> {
    let descriptor =
        RequestDescriptor::builder(ResourceCategory::Economy, "/v1/assets/{assetId}/resale-data")
            .path_param("assetId", require_id("assetId", asset_id)?)
            .build()?;
    Ok(forward(&state, descriptor).await)
}

/// Search the avatar catalog
#[instrument(skip(state))]
pub async fn catalog_search(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<CatalogSearchQuery>,
) -> Result<ApiResponse, ApiError> {
    let descriptor = RequestDescriptor::builder(ResourceCategory::Catalog, "/v1/search/items")
        .query_opt("keyword", query.keyword.filter(|k| !k.trim().is_empty()))
        .query_opt("category", query.category)
        .query_opt("subcategory", query.subcategory)
        .query("limit", query.limit.unwrap_or(DEFAULT_LIMIT))
        .query_opt("cursor", query.cursor)
        .build()?;
    Ok(forward(&state, descriptor).await)
}

// ---------------------------------------------------------------------------
// Presence and badges
// ---------------------------------------------------------------------------

/// Presence lookup body
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRequest {
    /// Users whose presence is wanted
    pub user_ids: Vec<u64>,
}

/// Presence for a list of users
#[instrument(skip_all)]
pub async fn presence(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<PresenceRequest>,
) -> Result<ApiResponse, ApiError> {
    require_ids(&body.user_ids)?;

    let descriptor = RequestDescriptor::builder(ResourceCategory::Presence, "/v1/presence/users")
        .method(Method::POST)
        .json_body(json!({ "userIds": body.user_ids }))
        .cacheable(true)
        .build()?;
    Ok(forward(&state, descriptor).await)
}

/// Badge details
#[instrument(skip(state))]
pub async fn get_badge(
    State(state): State<AppState>,
    ApiPath(badge_id): ApiPath<u64>,
) -> Result<ApiResponse, ApiError> {
    let descriptor = RequestDescriptor::builder(ResourceCategory::Badges, "/v1/badges/{badgeId}")
        .path_param("badgeId", require_id("badgeId", badge_id)?)
        .build()?;
    Ok(forward(&state, descriptor).await)
}

// ---------------------------------------------------------------------------
// Generic proxy
// ---------------------------------------------------------------------------

/// Forward a GET to any path of a category's host
#[instrument(skip(state, query))]
pub async fn proxy(
    State(state): State<AppState>,
    RequestId(request_id): RequestId,
    ApiPath((category, path)): ApiPath<(String, String)>,
    ApiQuery(query): ApiQuery<HashMap<String, String>>,
) -> Result<ApiResponse, ApiError> {
    let category: ResourceCategory = category.parse().map_err(ApiError::bad_request)?;
    let path = path.trim_start_matches('/');
    if path.is_empty() || path.contains(['{', '}']) {
        return Err(ApiError::bad_request(format!("Invalid proxy path: /{path}")));
    }
    debug!(request_id = %request_id, category = %category, path = %path, "Proxying request");

    let descriptor = query
        .into_iter()
        .fold(
            RequestDescriptor::builder(category, format!("/{path}")),
            |builder, (name, value)| builder.query(name, value),
        )
        .build()?;
    Ok(forward(&state, descriptor).await)
}

// ---------------------------------------------------------------------------
// Administration
// ---------------------------------------------------------------------------

/// Cache invalidation body; at least one selector is required
#[derive(Debug, Default, Deserialize)]
pub struct InvalidateRequest {
    /// Exact cache keys
    #[serde(default)]
    pub keys: Vec<String>,
    /// Every entry of a category
    pub category: Option<ResourceCategory>,
    /// Every key starting with this prefix
    pub prefix: Option<String>,
}

/// Rate limiter status
#[derive(Debug, Serialize)]
pub struct RateLimitStatus {
    /// Whether rate limiting is enforced
    pub enabled: bool,
    /// Longest wait for a token, in milliseconds
    pub max_wait_ms: u64,
    /// Buckets created so far
    pub buckets: Vec<BucketStats>,
}

/// Cache statistics
pub async fn cache_stats(State(state): State<AppState>) -> Result<ApiResponse, ApiError> {
    let stats: CacheStats = state.gateway().cache().stats();
    ApiResponse::ok(&stats)
}

/// Remove selected cache entries
#[instrument(skip(state))]
pub async fn cache_invalidate(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<InvalidateRequest>,
) -> Result<ApiResponse, ApiError> {
    let prefix = body.prefix.filter(|p| !p.is_empty());
    if body.keys.is_empty() && body.category.is_none() && prefix.is_none() {
        return Err(ApiError::bad_request(
            "Provide at least one of keys, category or prefix",
        ));
    }

    let cache = state.gateway().cache();
    let mut removed = body.keys.iter().filter(|key| cache.invalidate(key)).count();
    if let Some(category) = body.category {
        removed += cache.invalidate_category(category);
    }
    if let Some(prefix) = prefix {
        removed += cache.invalidate_prefix(&prefix);
    }

    info!(removed, "Cache entries invalidated");
    ApiResponse::ok(&json!({ "removed": removed }))
}

/// Drop every cache entry
pub async fn cache_clear(State(state): State<AppState>) -> Result<ApiResponse, ApiError> {
    let removed = state.gateway().cache().clear();
    ApiResponse::ok(&json!({ "removed": removed }))
}

/// Rate limiter status per category
pub async fn rate_limits(State(state): State<AppState>) -> Result<ApiResponse, ApiError> {
    let limiter = state.gateway().rate_limiter();
    ApiResponse::ok(&RateLimitStatus {
        enabled: limiter.is_enabled(),
        max_wait_ms: u64::try_from(limiter.max_wait().as_millis()).unwrap_or(u64::MAX),
        buckets: limiter.all_stats(),
    })
}
