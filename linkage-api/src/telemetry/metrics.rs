//! Prometheus Metrics Definitions
//!
//! Defines the LINKAGE metrics and the /metrics endpoint for Prometheus
//! scraping.

use axum::{http::StatusCode, response::IntoResponse};
use linkage_resolver::{ReconcileOutcome, Reconciliation};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram, register_histogram_vec, CounterVec, Encoder,
    Histogram, HistogramVec, TextEncoder,
};

use crate::error::{ApiError, ApiResult};

/// HTTP request latency buckets (seconds)
/// Covers: 1ms, 5ms, 10ms, 25ms, 50ms, 100ms, 250ms, 500ms, 1s, 2.5s, 5s, 10s
const HTTP_LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 10.0,
];

/// Store operation latency buckets (seconds)
const STORE_LATENCY_BUCKETS: &[f64] =
    &[0.0005, 0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5];

const ATTEMPT_BUCKETS: &[f64] = &[1.0, 2.0, 3.0, 5.0, 8.0];

/// Global metrics instance - initialized once at startup
pub static METRICS: Lazy<ApiResult<LinkageMetrics>> = Lazy::new(LinkageMetrics::new);

/// Container for all LINKAGE metrics.
#[derive(Clone)]
pub struct LinkageMetrics {
    /// HTTP request counter - labels: method, path, status
    pub http_requests_total: CounterVec,

    /// HTTP request duration histogram - labels: method, path
    pub http_request_duration_seconds: HistogramVec,

    /// Reconciliation counter - labels: outcome
    pub reconciliations_total: CounterVec,

    /// Pipeline runs per reconciliation
    pub reconcile_attempts: Histogram,

    /// Contact store operation counter - labels: operation, status
    pub store_operations_total: CounterVec,

    /// Contact store operation duration histogram - labels: operation
    pub store_operation_duration_seconds: HistogramVec,
}

impl LinkageMetrics {
    /// Create and register all metrics with Prometheus.
    pub fn new() -> ApiResult<Self> {
        Ok(Self {
            http_requests_total: register_counter_vec!(
                "linkage_http_requests_total",
                "Total number of HTTP requests",
                &["method", "path", "status"]
            )
            .map_err(|e| registration_error("http_requests_total", e))?,

            http_request_duration_seconds: register_histogram_vec!(
                "linkage_http_request_duration_seconds",
                "HTTP request duration in seconds",
                &["method", "path"],
                HTTP_LATENCY_BUCKETS.to_vec()
            )
            .map_err(|e| registration_error("http_request_duration_seconds", e))?,

            reconciliations_total: register_counter_vec!(
                "linkage_reconciliations_total",
                "Completed reconciliations by outcome",
                &["outcome"]
            )
            .map_err(|e| registration_error("reconciliations_total", e))?,

            reconcile_attempts: register_histogram!(
                "linkage_reconcile_attempts",
                "Pipeline runs needed per reconciliation",
                ATTEMPT_BUCKETS.to_vec()
            )
            .map_err(|e| registration_error("reconcile_attempts", e))?,

            store_operations_total: register_counter_vec!(
                "linkage_store_operations_total",
                "Total number of contact store operations",
                &["operation", "status"]
            )
            .map_err(|e| registration_error("store_operations_total", e))?,

            store_operation_duration_seconds: register_histogram_vec!(
                "linkage_store_operation_duration_seconds",
                "Contact store operation duration in seconds",
                &["operation"],
                STORE_LATENCY_BUCKETS.to_vec()
            )
            .map_err(|e| registration_error("store_operation_duration_seconds", e))?,
        })
    }

    /// Record an HTTP request.
    pub fn record_http_request(&self, method: &str, path: &str, status: u16, duration_secs: f64) {
        let status_str = status.to_string();
        self.http_requests_total
            .with_label_values(&[method, path, &status_str])
            .inc();
        self.http_request_duration_seconds
            .with_label_values(&[method, path])
            .observe(duration_secs);
    }

    /// Record a completed reconciliation.
    pub fn record_reconciliation(&self, reconciliation: &Reconciliation) {
        self.record_outcome(reconciliation.outcome);
        self.reconcile_attempts
            .observe(f64::from(reconciliation.attempts));
    }

    pub fn record_outcome(&self, outcome: ReconcileOutcome) {
        self.reconciliations_total
            .with_label_values(&[outcome.as_str()])
            .inc();
    }

    /// Record a contact store operation.
    pub fn record_store_operation(&self, operation: &str, success: bool, duration_secs: f64) {
        let status = if success { "success" } else { "error" };
        self.store_operations_total
            .with_label_values(&[operation, status])
            .inc();
        self.store_operation_duration_seconds
            .with_label_values(&[operation])
            .observe(duration_secs);
    }
}

fn registration_error(name: &str, err: prometheus::Error) -> ApiError {
    ApiError::internal_error(format!("Failed to register {}: {}", name, err))
}

/// Handler for GET /metrics endpoint.
///
/// Returns Prometheus text format metrics.
#[utoipa::path(
    get,
    path = "/metrics",
    tag = "Observability",
    responses(
        (status = 200, description = "Prometheus metrics in text format", content_type = "text/plain"),
        (status = 500, description = "Failed to encode metrics"),
    ),
)]
pub async fn metrics_handler() -> impl IntoResponse {
    // Registers the LINKAGE families on a cold start.
    Lazy::force(&METRICS);

    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                format!("Failed to encode metrics: {}", e).into_bytes(),
            )
        }
    }
}
