//! Route table.

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{delete, get, post},
    Router,
};

use crate::{
    handlers,
    middleware::{cors_layer, logging_middleware, request_id_middleware, response_time_middleware},
    state::AppState,
};

/// Build the application router with every endpoint and layer
pub fn create_router(state: AppState) -> Router {
    let server = &state.config().server;
    let metrics_path = state.config().observability.metrics.path.clone();
    let body_limit = server.max_request_body_size;
    let cors = server.cors.enabled.then(|| cors_layer(&server.cors));

    let api = Router::new()
        .route("/users", post(handlers::get_users))
        .route("/users/search", get(handlers::search_users))
        .route("/users/:id", get(handlers::get_user))
        .route("/users/:id/friends", get(handlers::user_friends))
        .route("/users/:id/badges", get(handlers::user_badges))
        .route("/games/:id", get(handlers::get_game))
        .route("/groups/:id", get(handlers::get_group))
        .route("/groups/:id/roles", get(handlers::group_roles))
        .route("/assets/:id", get(handlers::get_asset))
        .route("/economy/assets/:id/resale-data", get(handlers::resale_data))
        .route("/catalog/search", get(handlers::catalog_search))
        .route("/presence/users", post(handlers::presence))
        .route("/badges/:id", get(handlers::get_badge))
        .route("/proxy/:category/*path", get(handlers::proxy))
        .route("/cache", delete(handlers::cache_clear))
        .route("/cache/stats", get(handlers::cache_stats))
        .route("/cache/invalidate", post(handlers::cache_invalidate))
        .route("/rate-limits", get(handlers::rate_limits));

    let mut router = Router::new()
        .route("/health", get(handlers::health_check))
        .route(&metrics_path, get(handlers::metrics_endpoint))
        .nest("/api", api)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(middleware::from_fn(response_time_middleware))
        .layer(middleware::from_fn(logging_middleware))
        .layer(middleware::from_fn(request_id_middleware));

    if let Some(cors) = cors {
        router = router.layer(cors);
    }

    router.with_state(state)
}
