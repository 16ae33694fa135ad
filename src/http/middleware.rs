//! HTTP middleware

use axum::{body::Body, http::Request, middleware::Next, response::Response};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Request logging middleware
///
/// Playlists are polled continuously by players, so successful playlist
/// requests are only logged at debug level.
pub async fn request_logger(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let response = next.run(request).await;

    let duration = start.elapsed();
    let status = response.status();

    if status.is_success() {
        if uri.path().ends_with(".m3u8") {
            debug!("{} {} {} in {:?}", method, uri, status, duration);
        } else {
            info!("{} {} {} in {:?}", method, uri, status, duration);
        }
    } else {
        warn!("{} {} {} in {:?}", method, uri, status, duration);
    }

    response
}
