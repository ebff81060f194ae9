//! Per-request metrics keyed by the matched route template

use axum::{
    extract::{MatchedPath, Request},
    middleware::Next,
    response::Response,
};
use bookshelf_common::metrics::RequestMetrics;

/// Record count and latency of every routed request
pub async fn track_requests(request: Request, next: Next) -> Response {
    // Route templates, not raw paths, to keep label cardinality bounded
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| "unmatched".to_string());

    let tracker = RequestMetrics::start(request.method().as_str(), &endpoint);
    let response = next.run(request).await;
    tracker.finish(response.status().as_u16());

    response
}
