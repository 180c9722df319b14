// ============================================================================
// Prometheus Metrics
// ============================================================================
//
// HTTP request metrics plus counters for the ingestion pipeline:
//
// - shoplytics_http_request_duration_seconds / shoplytics_http_requests_total
// - shoplytics_jobs_total{job, outcome}        (completed, retried, dead)
// - shoplytics_sync_phase_records_total{phase}
// - shoplytics_sync_phase_failures_total{phase, error_type}
// - shoplytics_aggregate_drift_repaired_total
// - shoplytics_webhook_rejections_total{reason}
//
// Scraped from GET /metrics.
//
// ============================================================================

use axum::{
    extract::Request,
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram_vec, register_int_counter, CounterVec, Encoder,
    HistogramVec, IntCounter, TextEncoder,
};
use std::time::Instant;

lazy_static! {
    pub static ref HTTP_REQUEST_DURATION: HistogramVec = register_histogram_vec!(
        "shoplytics_http_request_duration_seconds",
        "HTTP request latency in seconds",
        &["method", "path", "status"],
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0]
    )
    .expect("register http duration histogram");

    pub static ref HTTP_REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        "shoplytics_http_requests_total",
        "Total number of HTTP requests",
        &["method", "path", "status"]
    )
    .expect("register http request counter");

    /// Job outcomes by job name.
    pub static ref JOBS_TOTAL: CounterVec = register_counter_vec!(
        "shoplytics_jobs_total",
        "Ingestion jobs by terminal or retry outcome",
        &["job", "outcome"]
    )
    .expect("register jobs counter");

    pub static ref SYNC_PHASE_RECORDS_TOTAL: CounterVec = register_counter_vec!(
        "shoplytics_sync_phase_records_total",
        "Records persisted by bulk sync, per phase",
        &["phase"]
    )
    .expect("register sync records counter");

    pub static ref SYNC_PHASE_FAILURES_TOTAL: CounterVec = register_counter_vec!(
        "shoplytics_sync_phase_failures_total",
        "Bulk sync phases that failed",
        &["phase", "error_type"]
    )
    .expect("register sync failures counter");

    pub static ref AGGREGATE_DRIFT_REPAIRED_TOTAL: IntCounter = register_int_counter!(
        "shoplytics_aggregate_drift_repaired_total",
        "Customers whose cached aggregates had drifted and were repaired"
    )
    .expect("register drift counter");

    pub static ref WEBHOOK_REJECTIONS_TOTAL: CounterVec = register_counter_vec!(
        "shoplytics_webhook_rejections_total",
        "Webhook deliveries rejected before enqueue",
        &["reason"]
    )
    .expect("register webhook rejection counter");
}

/// Replace id-like path segments so label cardinality stays bounded.
///
/// Example: /api/jobs/123 -> /api/jobs/:id
fn normalize_path(path: &str) -> String {
    let normalized: Vec<&str> = path
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            if (segment.len() == 36 && segment.contains('-')) || segment.parse::<i64>().is_ok() {
                ":id"
            } else {
                segment
            }
        })
        .collect();

    format!("/{}", normalized.join("/"))
}

pub async fn metrics_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = normalize_path(request.uri().path());

    let response = next.run(request).await;

    let duration = start.elapsed();
    let status = response.status().as_u16().to_string();

    HTTP_REQUEST_DURATION
        .with_label_values(&[method.as_str(), &path, &status])
        .observe(duration.as_secs_f64());
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method.as_str(), &path, &status])
        .inc();

    tracing::debug!(
        target: "metrics",
        method = %method,
        path = %path,
        status = %status,
        duration_ms = %duration.as_millis(),
        "HTTP request completed"
    );

    response
}

pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];

    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => (
            StatusCode::OK,
            [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            buffer,
        ),
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
                format!("Failed to encode metrics: {}", e).into_bytes(),
            )
        }
    }
}

pub fn record_job_outcome(job: &str, outcome: &str) {
    JOBS_TOTAL.with_label_values(&[job, outcome]).inc();
}

pub fn record_sync_phase(phase: &str, records: i32) {
    SYNC_PHASE_RECORDS_TOTAL
        .with_label_values(&[phase])
        .inc_by(f64::from(records.max(0)));
}

pub fn record_sync_phase_failure(phase: &str, error_type: &str) {
    SYNC_PHASE_FAILURES_TOTAL
        .with_label_values(&[phase, error_type])
        .inc();
}

pub fn record_drift_repaired(count: u64) {
    AGGREGATE_DRIFT_REPAIRED_TOTAL.inc_by(count);
}

pub fn record_webhook_rejection(reason: &str) {
    WEBHOOK_REJECTIONS_TOTAL.with_label_values(&[reason]).inc();
    tracing::warn!(target: "security", reason = %reason, "Webhook rejected");
}
