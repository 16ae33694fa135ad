//! Axum router configuration

use axum::{
    http::{header, Method},
    middleware::from_fn,
    routing::get,
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::metrics::metrics_handler;
use crate::state::AppState;

use super::handlers::{active_muxers, handle_media_request, health_check, version_check};
use super::middleware::request_logger;

/// Create the Axum router with all routes
pub fn create_router(state: Arc<AppState>) -> Router {
    let router = Router::new()
        // Health and version endpoints
        .route("/health", get(health_check))
        .route("/version", get(version_check))
        .route("/metrics", get(metrics_handler))
        .route("/debug/muxers", get(active_muxers))
        // Playlists, segments and parts of every path
        .route("/{*path}", get(handle_media_request))
        .layer(from_fn(request_logger))
        .layer(TraceLayer::new_for_http());

    let router = if state.config.cors_enabled {
        // hls.js and Safari fetch playlists and segments cross-origin.
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::OPTIONS, Method::HEAD])
            .allow_headers([
                header::ACCEPT,
                header::RANGE,
                header::CONTENT_TYPE,
                header::ORIGIN,
            ])
            .allow_private_network(true)
            .max_age(Duration::from_secs(3600));
        router.layer(cors)
    } else {
        router
    };

    router.with_state(state)
}
