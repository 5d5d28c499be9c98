//! Prometheus metrics for the topology incident manager.
//!
//! All metrics live in one global registry under the
//! `topology_incident_manager` namespace and are exposed on `GET /metrics`.

use axum::{
    extract::{MatchedPath, Request},
    middleware::Next,
    response::Response,
};
use lazy_static::lazy_static;
use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry,
};
use std::time::Instant;

const NAMESPACE: &str = "topology_incident_manager";

lazy_static! {
    /// Global Prometheus registry for all metrics
    pub static ref PROMETHEUS_REGISTRY: Registry = Registry::new();

    // ============================================================================
    // HTTP Metrics
    // ============================================================================

    /// Labels: method, path, status_code
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("http_requests_total", "Total number of HTTP requests").namespace(NAMESPACE),
        &["method", "path", "status_code"]
    ).expect("Failed to create HTTP_REQUESTS_TOTAL metric");

    /// Labels: method, path
    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new("http_request_duration_seconds", "HTTP request duration in seconds")
            .namespace(NAMESPACE)
            .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]),
        &["method", "path"]
    ).expect("Failed to create HTTP_REQUEST_DURATION_SECONDS metric");

    // ============================================================================
    // Processor Metrics
    // ============================================================================

    /// Processor passes by outcome
    ///
    /// Labels: outcome (not_triggered, created, updated, failed)
    pub static ref PROCESSOR_PASSES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("processor_passes_total", "Topology processor passes by outcome").namespace(NAMESPACE),
        &["outcome"]
    ).expect("Failed to create PROCESSOR_PASSES_TOTAL metric");

    /// Time spent in one processor pass, dispatch included
    pub static ref PROCESSOR_PASS_DURATION_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new("processor_pass_duration_seconds", "Topology processor pass duration in seconds")
            .namespace(NAMESPACE)
            .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0])
    ).expect("Failed to create PROCESSOR_PASS_DURATION_SECONDS metric");

    /// Labels: action (created, updated, resolved)
    pub static ref INCIDENTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("incidents_total", "Topology incidents by action").namespace(NAMESPACE),
        &["action"]
    ).expect("Failed to create INCIDENTS_TOTAL metric");

    /// Alert-to-incident associations written
    pub static ref ALERTS_ATTACHED_TOTAL: IntCounter = IntCounter::with_opts(
        Opts::new("alerts_attached_total", "Alerts associated with topology incidents").namespace(NAMESPACE)
    ).expect("Failed to create ALERTS_ATTACHED_TOTAL metric");

    // ============================================================================
    // Workflow Metrics
    // ============================================================================

    /// Labels: action, status (sent, failed)
    pub static ref WORKFLOW_EVENTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("workflow_events_total", "Workflow events dispatched").namespace(NAMESPACE),
        &["action", "status"]
    ).expect("Failed to create WORKFLOW_EVENTS_TOTAL metric");

    // ============================================================================
    // Topology Metrics
    // ============================================================================

    /// Labels: mode (merge, replace)
    pub static ref TOPOLOGY_IMPORTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("topology_imports_total", "Topology imports by mode").namespace(NAMESPACE),
        &["mode"]
    ).expect("Failed to create TOPOLOGY_IMPORTS_TOTAL metric");
}

/// Register every metric with the global registry
///
/// Call once at startup; a second call fails with `AlreadyReg`.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    PROMETHEUS_REGISTRY.register(Box::new(HTTP_REQUESTS_TOTAL.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()))?;

    PROMETHEUS_REGISTRY.register(Box::new(PROCESSOR_PASSES_TOTAL.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(PROCESSOR_PASS_DURATION_SECONDS.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(INCIDENTS_TOTAL.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(ALERTS_ATTACHED_TOTAL.clone()))?;

    PROMETHEUS_REGISTRY.register(Box::new(WORKFLOW_EVENTS_TOTAL.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(TOPOLOGY_IMPORTS_TOTAL.clone()))?;

    tracing::info!("Prometheus metrics initialized");
    Ok(())
}

/// Gather all metrics in Prometheus text format
pub fn gather_metrics() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = PROMETHEUS_REGISTRY.gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::from("# Error encoding metrics\n");
    }

    String::from_utf8(buffer).unwrap_or_else(|e| {
        tracing::error!("Failed to convert metrics to string: {}", e);
        String::from("# Error converting metrics\n")
    })
}

/// Axum middleware recording request count and latency per matched route
pub async fn track_http(request: Request, next: Next) -> Response {
    let method = request.method().to_string();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let start = Instant::now();
    let response = next.run(request).await;

    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[&method, &path])
        .observe(start.elapsed().as_secs_f64());
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[&method, &path, response.status().as_str()])
        .inc();

    response
}
