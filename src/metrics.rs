//! Prometheus-compatible metrics endpoint

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::state::AppState;

/// Metrics collector
#[derive(Debug)]
pub struct Metrics {
    /// Server start time
    start_time: Instant,
    /// Total requests processed
    request_count: RwLock<u64>,
    /// Requests by kind (playlist, segment, other)
    requests_by_kind: RwLock<HashMap<String, u64>>,
    /// Session starts by path
    sessions_started: RwLock<HashMap<String, u64>>,
    /// Errors by type
    errors_by_type: RwLock<HashMap<String, u64>>,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            request_count: RwLock::new(0),
            requests_by_kind: RwLock::new(HashMap::new()),
            sessions_started: RwLock::new(HashMap::new()),
            errors_by_type: RwLock::new(HashMap::new()),
        }
    }

    /// Record a media request
    pub fn record_request(&self, kind: &str) {
        *self.request_count.write() += 1;
        *self
            .requests_by_kind
            .write()
            .entry(kind.to_string())
            .or_insert(0) += 1;
    }

    /// Record a successfully initialized session
    pub fn record_session_start(&self, path: &str) {
        *self
            .sessions_started
            .write()
            .entry(path.to_string())
            .or_insert(0) += 1;
    }

    /// Record error
    pub fn record_error(&self, error_type: &str) {
        *self
            .errors_by_type
            .write()
            .entry(error_type.to_string())
            .or_insert(0) += 1;
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Export metrics in Prometheus format
    pub fn export_prometheus(&self, bytes_by_path: &[(String, u64)], active_muxers: usize) -> String {
        let mut output = String::new();

        // Server info
        output.push_str("# HELP hls_server_uptime_seconds Server uptime in seconds\n");
        output.push_str("# TYPE hls_server_uptime_seconds counter\n");
        output.push_str(&format!(
            "hls_server_uptime_seconds {}\n",
            self.uptime_secs()
        ));

        output.push_str(
            "\n# HELP hls_server_start_time_seconds Server start time as Unix timestamp\n",
        );
        output.push_str("# TYPE hls_server_start_time_seconds gauge\n");
        output.push_str(&format!(
            "hls_server_start_time_seconds {}\n",
            std::time::SystemTime::UNIX_EPOCH
                .elapsed()
                .unwrap_or(Duration::ZERO)
                .as_secs()
                .saturating_sub(self.uptime_secs())
        ));

        // Request metrics
        output.push_str("\n# HELP hls_requests_total Total number of media requests\n");
        output.push_str("# TYPE hls_requests_total counter\n");
        output.push_str(&format!(
            "hls_requests_total {}\n",
            *self.request_count.read()
        ));

        output.push_str("\n# HELP hls_requests_by_kind Media requests by kind\n");
        output.push_str("# TYPE hls_requests_by_kind counter\n");
        for (kind, count) in sorted(&self.requests_by_kind.read()) {
            output.push_str(&format!(
                "hls_requests_by_kind{{kind=\"{}\"}} {}\n",
                kind, count
            ));
        }

        // Muxer metrics
        output.push_str("\n# HELP hls_muxer_bytes_sent_total Bytes served per path\n");
        output.push_str("# TYPE hls_muxer_bytes_sent_total counter\n");
        for (path, bytes) in bytes_by_path {
            output.push_str(&format!(
                "hls_muxer_bytes_sent_total{{path=\"{}\"}} {}\n",
                path, bytes
            ));
        }

        output.push_str("\n# HELP hls_muxer_sessions_total Sessions started per path\n");
        output.push_str("# TYPE hls_muxer_sessions_total counter\n");
        for (path, count) in sorted(&self.sessions_started.read()) {
            output.push_str(&format!(
                "hls_muxer_sessions_total{{path=\"{}\"}} {}\n",
                path, count
            ));
        }

        output.push_str("\n# HELP hls_active_muxers Number of active muxer sessions\n");
        output.push_str("# TYPE hls_active_muxers gauge\n");
        output.push_str(&format!("hls_active_muxers {}\n", active_muxers));

        // Error metrics
        output.push_str("\n# HELP hls_errors_total Total errors by type\n");
        output.push_str("# TYPE hls_errors_total counter\n");
        for (error_type, count) in sorted(&self.errors_by_type.read()) {
            output.push_str(&format!(
                "hls_errors_total{{type=\"{}\"}} {}\n",
                error_type, count
            ));
        }

        output
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

fn sorted(map: &HashMap<String, u64>) -> Vec<(&String, &u64)> {
    let mut entries: Vec<_> = map.iter().collect();
    entries.sort();
    entries
}

/// Metrics endpoint handler
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> Response {
    let prometheus_output = state
        .metrics
        .export_prometheus(&state.bytes_by_path(), state.active_muxers());

    (
        StatusCode::OK,
        [("Content-Type", "text/plain; version=0.0.4")],
        prometheus_output,
    )
        .into_response()
}
