//! Health check handlers

use crate::AppState;
use axum::{extract::State, http::StatusCode, Json};
use bookshelf_common::errors::Result;
use serde::Serialize;
use std::future::Future;
use std::time::Instant;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

#[derive(Serialize)]
pub struct ReadyResponse {
    pub status: String,
    pub checks: HealthChecks,
}

#[derive(Serialize)]
pub struct HealthChecks {
    pub database: CheckResult,
    pub cache: CheckResult,
}

#[derive(Serialize)]
pub struct CheckResult {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CheckResult {
    fn is_up(&self) -> bool {
        self.status != "down"
    }

    fn skipped() -> Self {
        Self {
            status: "not_configured".to_string(),
            latency_ms: None,
            error: None,
        }
    }
}

async fn check<F>(probe: F) -> CheckResult
where
    F: Future<Output = Result<()>>,
{
    let start = Instant::now();
    match probe.await {
        Ok(()) => CheckResult {
            status: "up".to_string(),
            latency_ms: Some(start.elapsed().as_millis() as u64),
            error: None,
        },
        Err(e) => CheckResult {
            status: "down".to_string(),
            latency_ms: None,
            error: Some(e.to_string()),
        },
    }
}

/// Liveness probe - always returns healthy if server is running
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: state.config.observability.service_name.clone(),
        version: bookshelf_common::VERSION.to_string(),
    })
}

/// Readiness probe - checks the database and the cache.
///
/// The cache is advisory, so a cache outage degrades readiness reporting
/// but does not fail it.
pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    let database = match &state.db {
        Some(db) => check(db.ping()).await,
        None => CheckResult::skipped(),
    };
    let cache = match &state.cache {
        Some(cache) => check(cache.ping()).await,
        None => CheckResult::skipped(),
    };

    let (code, status) = match (database.is_up(), cache.is_up()) {
        (false, _) => (StatusCode::SERVICE_UNAVAILABLE, "not_ready"),
        (true, false) => (StatusCode::OK, "degraded"),
        (true, true) => (StatusCode::OK, "ready"),
    };

    (
        code,
        Json(ReadyResponse {
            status: status.to_string(),
            checks: HealthChecks { database, cache },
        }),
    )
}
