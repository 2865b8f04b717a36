//! Prometheus metrics for the API server.

use std::sync::LazyLock;
use std::time::Instant;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::middleware::Next;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use regex_lite::Regex;

/// Initialize the Prometheus metrics recorder.
/// Returns a handle that can be used to render metrics.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Metric names as constants for consistency.
pub mod names {
    // HTTP metrics
    pub const HTTP_REQUESTS_TOTAL: &str = "sid_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "sid_http_request_duration_seconds";
    pub const HTTP_REQUESTS_IN_FLIGHT: &str = "sid_http_requests_in_flight";

    // WebSocket metrics
    pub const WS_CONNECTIONS_TOTAL: &str = "sid_ws_connections_total";
    pub const WS_CONNECTIONS_ACTIVE: &str = "sid_ws_connections_active";
    pub const WS_MESSAGES_RECEIVED: &str = "sid_ws_messages_received_total";

    // Detection metrics
    pub const DETECT_REQUESTS_TOTAL: &str = "sid_detect_requests_total";
    pub const DETECTIONS_TOTAL: &str = "sid_detections_total";
    pub const ALERTS_TOTAL: &str = "sid_alerts_total";
    pub const PIPELINE_DURATION_SECONDS: &str = "sid_pipeline_duration_seconds";

    // Persistence metrics
    pub const PERSIST_COMMITS_TOTAL: &str = "sid_persist_commits_total";

    // Announcement metrics
    pub const ANNOUNCEMENTS_TOTAL: &str = "sid_announcements_total";

    // Broadcast metrics
    pub const BROADCAST_DELIVERED_TOTAL: &str = "sid_broadcast_delivered_total";
    pub const BROADCAST_REMOVED_TOTAL: &str = "sid_broadcast_removed_total";
    pub const BROADCAST_SUBSCRIBERS: &str = "sid_broadcast_subscribers";

    // Rate limiting metrics
    pub const RATE_LIMIT_HITS_TOTAL: &str = "sid_rate_limit_hits_total";
}

/// Record an HTTP request.
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let labels = [
        ("method", method.to_string()),
        ("path", sanitize_path(path)),
        ("status", status.to_string()),
    ];

    counter!(names::HTTP_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(names::HTTP_REQUEST_DURATION_SECONDS, &labels).record(duration_secs);
}

/// Record WebSocket connection.
pub fn record_ws_connection(endpoint: &str) {
    let labels = [("endpoint", endpoint.to_string())];
    counter!(names::WS_CONNECTIONS_TOTAL, &labels).increment(1);
}

/// Update active WebSocket connections gauge.
pub fn set_ws_active_connections(count: i64) {
    gauge!(names::WS_CONNECTIONS_ACTIVE).set(count as f64);
}

/// Record WebSocket message received.
pub fn record_ws_message_received(endpoint: &str) {
    let labels = [("endpoint", endpoint.to_string())];
    counter!(names::WS_MESSAGES_RECEIVED, &labels).increment(1);
}

/// Record one `/detect` call by outcome (`ok`, `invalid`, `unavailable`, `error`).
pub fn record_detect_request(outcome: &'static str) {
    counter!(names::DETECT_REQUESTS_TOTAL, "outcome" => outcome).increment(1);
}

/// Record the detections and alerts of one processed frame.
pub fn record_detections(detections: usize, alerts: usize, pipeline_secs: f64) {
    counter!(names::DETECTIONS_TOTAL).increment(detections as u64);
    counter!(names::ALERTS_TOTAL).increment(alerts as u64);
    histogram!(names::PIPELINE_DURATION_SECONDS).record(pipeline_secs);
}

/// Record a persistence commit outcome (`committed`, `failed`, `dropped`).
pub fn record_persist_commit(outcome: &'static str) {
    counter!(names::PERSIST_COMMITS_TOTAL, "outcome" => outcome).increment(1);
}

/// Record an announcement outcome (`announced`, `dropped`).
pub fn record_announcement(outcome: &'static str) {
    counter!(names::ANNOUNCEMENTS_TOTAL, "outcome" => outcome).increment(1);
}

/// Record the result of one broadcast.
pub fn record_broadcast(delivered: usize, removed: usize, remaining: usize) {
    counter!(names::BROADCAST_DELIVERED_TOTAL).increment(delivered as u64);
    counter!(names::BROADCAST_REMOVED_TOTAL).increment(removed as u64);
    gauge!(names::BROADCAST_SUBSCRIBERS).set(remaining as f64);
}

/// Record rate limit hit.
pub fn record_rate_limit_hit(endpoint: &str) {
    let labels = [("endpoint", endpoint.to_string())];
    counter!(names::RATE_LIMIT_HITS_TOTAL, &labels).increment(1);
}

static UUID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[0-9a-f]{8}-?[0-9a-f]{4}-?[0-9a-f]{4}-?[0-9a-f]{4}-?[0-9a-f]{12}")
        .expect("valid uuid pattern")
});

static ID_SEGMENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/(events|roi)/[A-Za-z0-9_-]+").expect("valid id segment pattern")
});

/// Sanitize path for metrics labels (remove IDs, etc.).
fn sanitize_path(path: &str) -> String {
    let path = UUID_RE.replace_all(path, ":id");
    ID_SEGMENT_RE.replace_all(&path, "/$1/:id").to_string()
}

/// Metrics middleware for HTTP requests.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response<Body> {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).increment(1.0);

    let response = next.run(request).await;

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).decrement(1.0);

    let status = response.status().as_u16();
    let duration = start.elapsed().as_secs_f64();

    record_http_request(&method, &path, status, duration);

    response
}
