//! API routes.

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{delete, get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::limit::RequestBodyLimitLayer;

use crate::handlers::{
    create_roi, delete_roi, detect, enroll, get_event, health, list_events, list_rois,
    list_whitelist, ready, root_status,
};
use crate::metrics::metrics_middleware;
use crate::middleware::{
    cors_layer, rate_limit_middleware, request_id, request_logging, security_headers,
    RateLimiterCache,
};
use crate::state::AppState;
use crate::ws::ws_detections;

/// Create the API router.
pub fn create_router(state: AppState, metrics_handle: Option<PrometheusHandle>) -> Router {
    let detection_routes = Router::new()
        .route("/detect", post(detect))
        .route("/events", get(list_events))
        .route("/events/:event_id", get(get_event));

    let roi_routes = Router::new()
        .route("/roi", post(create_roi).get(list_rois))
        .route("/roi/:roi_id", delete(delete_roi));

    let whitelist_routes = Router::new().route("/whitelist", post(enroll).get(list_whitelist));

    let rate_limiter = Arc::new(RateLimiterCache::new(
        state.config.rate_limit_rps,
        state.config.rate_limit_burst,
    ));

    let api_routes = Router::new()
        .merge(detection_routes)
        .merge(roi_routes)
        .merge(whitelist_routes)
        .layer(middleware::from_fn_with_state(rate_limiter, rate_limit_middleware));

    let ws_routes = Router::new().route("/ws/detections", get(ws_detections));

    let health_routes = Router::new()
        .route("/", get(root_status))
        .route("/health", get(health))
        .route("/healthz", get(health))
        .route("/ready", get(ready));

    let metrics_routes = if let Some(handle) = metrics_handle {
        Router::new().route("/metrics", get(move || async move { handle.render() }))
    } else {
        Router::new()
    };

    Router::new()
        .nest("/api", api_routes)
        .merge(ws_routes)
        .merge(health_routes)
        .merge(metrics_routes)
        .layer(DefaultBodyLimit::max(state.config.max_body_size))
        .layer(RequestBodyLimitLayer::new(state.config.max_body_size))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(security_headers))
        .layer(middleware::from_fn(request_id))
        .layer(middleware::from_fn(request_logging))
        .layer(cors_layer(&state.config.cors_origins))
        .with_state(state)
}
