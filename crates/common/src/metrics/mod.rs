//! Metrics and observability utilities
//!
//! Provides Prometheus metrics with SLO-aligned histograms
//! and standardized naming conventions.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all Bookshelf metrics
pub const METRICS_PREFIX: &str = "bookshelf";

/// SLO-aligned histogram buckets for request latency (in seconds)
/// Targets: P50 < 50ms, P99 < 250ms
pub const LATENCY_BUCKETS: &[f64] = &[
    0.001,  // 1ms
    0.005,  // 5ms
    0.010,  // 10ms
    0.025,  // 25ms
    0.050,  // 50ms - P50 target
    0.100,  // 100ms
    0.250,  // 250ms - P99 target
    0.500,  // 500ms
    1.000,  // 1s
    2.500,  // 2.5s
    5.000,  // 5s
];

/// Register all metric descriptions
pub fn register_metrics() {
    // Request metrics
    describe_counter!(
        format!("{}_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of HTTP requests"
    );

    describe_histogram!(
        format!("{}_request_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "HTTP request latency in seconds"
    );

    // Book lifecycle metrics
    describe_counter!(
        format!("{}_book_operations_total", METRICS_PREFIX),
        Unit::Count,
        "Book create/update/delete operations by outcome"
    );

    describe_histogram!(
        format!("{}_book_operation_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Book lifecycle operation latency in seconds"
    );

    // Audit metrics
    describe_counter!(
        format!("{}_audit_writes_total", METRICS_PREFIX),
        Unit::Count,
        "Audit log entries written"
    );

    describe_counter!(
        format!("{}_audit_failures_total", METRICS_PREFIX),
        Unit::Count,
        "Audit log writes that failed; every increment needs an operator"
    );

    // Cache metrics
    describe_counter!(
        format!("{}_cache_invalidations_total", METRICS_PREFIX),
        Unit::Count,
        "Cache invalidation and warm passes by outcome"
    );

    describe_counter!(
        format!("{}_tag_insert_retries_total", METRICS_PREFIX),
        Unit::Count,
        "Tag inserts retried after losing a uniqueness race"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record request metrics
pub struct RequestMetrics {
    start: Instant,
    endpoint: String,
    method: String,
}

impl RequestMetrics {
    /// Start tracking a request
    pub fn start(method: &str, endpoint: &str) -> Self {
        Self {
            start: Instant::now(),
            endpoint: endpoint.to_string(),
            method: method.to_string(),
        }
    }

    /// Record request completion
    pub fn finish(self, status: u16) {
        let duration = self.start.elapsed().as_secs_f64();

        counter!(
            format!("{}_requests_total", METRICS_PREFIX),
            "method" => self.method.clone(),
            "endpoint" => self.endpoint.clone(),
            "status" => status.to_string()
        )
        .increment(1);

        histogram!(
            format!("{}_request_duration_seconds", METRICS_PREFIX),
            "method" => self.method,
            "endpoint" => self.endpoint
        )
        .record(duration);
    }
}

/// Helper to record a book lifecycle operation
pub fn record_book_operation(operation: &str, outcome: &str, duration_secs: f64) {
    counter!(
        format!("{}_book_operations_total", METRICS_PREFIX),
        "operation" => operation.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    histogram!(
        format!("{}_book_operation_duration_seconds", METRICS_PREFIX),
        "operation" => operation.to_string()
    )
    .record(duration_secs);
}

/// Helper to record an audit write
pub fn record_audit_write(operation: &str, success: bool) {
    if success {
        counter!(
            format!("{}_audit_writes_total", METRICS_PREFIX),
            "operation" => operation.to_string()
        )
        .increment(1);
    } else {
        counter!(
            format!("{}_audit_failures_total", METRICS_PREFIX),
            "operation" => operation.to_string()
        )
        .increment(1);
    }
}

/// Helper to record a cache coherency pass
pub fn record_cache_invalidation(scope: &str, success: bool) {
    let status = if success { "success" } else { "degraded" };

    counter!(
        format!("{}_cache_invalidations_total", METRICS_PREFIX),
        "scope" => scope.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Helper to record a retried tag insert
pub fn record_tag_insert_retry() {
    counter!(format!("{}_tag_insert_retries_total", METRICS_PREFIX)).increment(1);
}
