//! Raw hypervisor listing.

use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use ctf_range_control::ChallengeOrchestrator;
use ctf_range_hypervisor::ResourceSummary;

use crate::error::ApiError;
use crate::state::GatewayState;

/// Response for the VM listing.
#[derive(Debug, Serialize)]
pub struct ListVmsResponse {
    /// Number of resources.
    pub total: usize,
    /// VMs and containers on the node.
    pub vms: Vec<ResourceSummary>,
}

/// List every VM and container the hypervisor reports.
///
/// # Errors
///
/// Returns `CONNECTION_FAILURE` if the hypervisor is unreachable.
pub async fn list_vms<C>(
    State(state): State<Arc<GatewayState<C>>>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ChallengeOrchestrator + 'static,
{
    let vms = state.orchestrator.list_resources().await?;
    Ok(Json(ListVmsResponse {
        total: vms.len(),
        vms,
    }))
}

#[cfg(test)]
mod tests {
    use crate::handlers::testing::TestRange;
    use axum::http::StatusCode;
    use serde_json::Value;

    #[tokio::test]
    async fn lists_challenge_vms() {
        let range = TestRange::new();
        let level_id = range.level("Open redirect").await;
        range.challenge(level_id, "Alpha").await;

        let response = range.server.get("/api/v1/vms").await;
        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["total"], 1);
        assert_eq!(body["vms"][0]["vmid"], 200);
    }

    #[tokio::test]
    async fn unreachable_hypervisor_is_503() {
        let range = TestRange::new();
        range.hypervisor.drop_connection(true);
        let response = range.server.get("/api/v1/vms").await;
        response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
        let body: Value = response.json();
        assert_eq!(body["error"]["code"], "CONNECTION_FAILURE");
    }
}
