//! Health check endpoint.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use ctf_range_control::ChallengeOrchestrator;

use crate::state::GatewayState;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// `healthy` or `degraded`.
    pub status: &'static str,
    /// The store answered a read.
    pub database: bool,
    /// The hypervisor answered a version probe.
    pub hypervisor: bool,
    /// Version reported by the hypervisor.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hypervisor_version: Option<String>,
    /// Service version.
    pub version: &'static str,
}

/// Health check handler.
///
/// Probes the store and the hypervisor. Answers 200 when both are reachable
/// and 503 otherwise.
///
/// # Example
///
/// ```text
/// GET /health
///
/// Response: 200 OK
/// {
///   "status": "healthy",
///   "database": true,
///   "hypervisor": true,
///   "hypervisor_version": "8.2.4",
///   "version": "0.1.0"
/// }
/// ```
pub async fn health<C>(State(state): State<Arc<GatewayState<C>>>) -> impl IntoResponse
where
    C: ChallengeOrchestrator + 'static,
{
    let report = state.orchestrator.health().await;
    let healthy = report.is_healthy();

    let response = HealthResponse {
        status: if healthy { "healthy" } else { "degraded" },
        database: report.database,
        hypervisor: report.hypervisor,
        hypervisor_version: report.hypervisor_version,
        version: env!("CARGO_PKG_VERSION"),
    };
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, Json(response))
}
