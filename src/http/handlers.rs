//! HTTP request handlers

use axum::{
    extract::{Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;

use hls_live_lib::HlsError;

use crate::state::AppState;

/// HTTP error type
#[derive(Debug)]
pub enum HttpError {
    PathNotFound(String),
    Unavailable(String),
    InternalError(String),
}

impl HttpError {
    /// Label used for the error counter.
    pub fn kind(&self) -> &'static str {
        match self {
            HttpError::PathNotFound(_) => "path_not_found",
            HttpError::Unavailable(_) => "not_active",
            HttpError::InternalError(_) => "internal",
        }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            HttpError::PathNotFound(path) => {
                (StatusCode::NOT_FOUND, format!("Path not found: {}", path))
            }
            HttpError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            HttpError::InternalError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        (status, body).into_response()
    }
}

impl From<HlsError> for HttpError {
    fn from(err: HlsError) -> Self {
        match err {
            HlsError::NotActive => HttpError::Unavailable(err.to_string()),
            _ => HttpError::InternalError(err.to_string()),
        }
    }
}

/// Health check endpoint
pub async fn health_check() -> &'static str {
    "OK"
}

/// Version endpoint
pub async fn version_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Active sessions
/// GET /debug/muxers
pub async fn active_muxers(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let mut muxers: Vec<serde_json::Value> = state
        .muxers
        .iter()
        .map(|entry| {
            let muxer = entry.value();
            serde_json::json!({
                "path": entry.key(),
                "id": muxer.id().to_string(),
                "active": muxer.is_active(),
                "variant": muxer.config().variant.to_string(),
                "subtitles": muxer.config().subtitles.as_ref().map(|s| s.name.clone()),
                "bytes_sent": muxer.bytes_sent(),
            })
        })
        .collect();
    muxers.sort_by(|a, b| a["path"].as_str().cmp(&b["path"].as_str()));

    Json(serde_json::json!({
        "count": muxers.len(),
        "muxers": muxers,
    }))
}

/// Media request dispatched to the session owning the path
/// GET /{path_name}/{file}
pub async fn handle_media_request(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Response, HttpError> {
    let result = dispatch(&state, request).await;
    if let Err(e) = &result {
        state.metrics.record_error(e.kind());
    }
    result
}

async fn dispatch(state: &AppState, request: Request) -> Result<Response, HttpError> {
    let path = request.uri().path().trim_start_matches('/').to_string();
    let (path_name, file) = path
        .rsplit_once('/')
        .filter(|(name, file)| !name.is_empty() && !file.is_empty())
        .ok_or_else(|| HttpError::PathNotFound(path.clone()))?;

    let muxer = state
        .get_muxer(path_name)
        .ok_or_else(|| HttpError::PathNotFound(path_name.to_string()))?;

    state.metrics.record_request(request_kind(file));

    Ok(muxer.handle_request(request).await?)
}

fn request_kind(file: &str) -> &'static str {
    match file.rsplit('.').next() {
        Some("m3u8") => "playlist",
        Some("ts") | Some("m4s") | Some("mp4") => "segment",
        _ => "other",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_kind() {
        assert_eq!(request_kind("index.m3u8"), "playlist");
        assert_eq!(request_kind("segment_5.ts"), "segment");
        assert_eq!(request_kind("init.mp4"), "segment");
        assert_eq!(request_kind("favicon.ico"), "other");
    }

    #[test]
    fn test_error_status() {
        let not_active: HttpError = HlsError::NotActive.into();
        assert_eq!(
            not_active.into_response().status(),
            StatusCode::SERVICE_UNAVAILABLE
        );

        let internal: HttpError = HlsError::Encode("boom".to_string()).into();
        assert_eq!(internal.kind(), "internal");
        assert_eq!(
            internal.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );

        assert_eq!(
            HttpError::PathNotFound("cam".to_string())
                .into_response()
                .status(),
            StatusCode::NOT_FOUND
        );
    }

    #[tokio::test]
    async fn test_health_check() {
        assert_eq!(health_check().await, "OK");
    }

    #[tokio::test]
    async fn test_version_check() {
        let Json(body) = version_check().await;
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }
}
