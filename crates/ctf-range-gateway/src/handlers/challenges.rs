//! Challenge endpoints.
//!
//! This module provides handlers for creating challenges, submitting flags and
//! managing the lifecycle of the VM behind each challenge.

use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ctf_range_control::{
    ChallengeId, ChallengeOrchestrator, ChallengeResult, ChallengeView, CreateChallengeRequest,
};

use crate::error::ApiError;
use crate::state::GatewayState;

// =============================================================================
// Request/Response Types
// =============================================================================

/// Response for challenge list.
#[derive(Debug, Serialize)]
pub struct ListChallengesResponse {
    /// Number of challenges.
    pub total: usize,
    /// Challenges joined with their deployment status.
    pub challenges: Vec<ChallengeView>,
}

/// Flag submission body.
#[derive(Debug, Deserialize)]
pub struct SubmitFlagBody {
    /// Candidate flag.
    pub flag: String,
}

/// Response for a flag submission.
#[derive(Debug, Serialize)]
pub struct SubmitFlagResponse {
    /// The submission was processed.
    pub success: bool,
    /// Human-readable message.
    pub message: String,
    /// Whether the flag matched.
    pub correct: bool,
    /// When the challenge was first solved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Handlers
// =============================================================================

/// List all challenges. Flags are never included.
///
/// # Errors
///
/// Returns an error if the store cannot be read.
pub async fn list_challenges<C>(
    State(state): State<Arc<GatewayState<C>>>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ChallengeOrchestrator + 'static,
{
    let challenges = state.orchestrator.list_challenges().await?;
    Ok(Json(ListChallengesResponse {
        total: challenges.len(),
        challenges,
    }))
}

/// Provision a VM for a team and plant a fresh flag on it.
///
/// The saga runs on its own task so a client that disconnects mid-request
/// cannot abandon a half-built VM.
///
/// # Errors
///
/// Returns the orchestrator's classified error if any saga step fails.
pub async fn create_challenge<C>(
    State(state): State<Arc<GatewayState<C>>>,
    body: Result<Json<CreateChallengeRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ChallengeOrchestrator + 'static,
{
    let Json(request) = body?;
    let orchestrator = Arc::clone(&state.orchestrator);

    let result: ChallengeResult =
        tokio::spawn(async move { orchestrator.create_challenge(request).await })
            .await
            .map_err(|e| ApiError::Internal(format!("challenge task failed: {e}")))??;

    Ok((StatusCode::CREATED, Json(result)))
}

/// Get a single challenge.
///
/// # Errors
///
/// Returns `RESOURCE_NOT_FOUND` if the challenge doesn't exist.
pub async fn get_challenge<C>(
    State(state): State<Arc<GatewayState<C>>>,
    challenge_id: Result<Path<ChallengeId>, PathRejection>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ChallengeOrchestrator + 'static,
{
    let Path(challenge_id) = challenge_id?;
    let view = state.orchestrator.get_challenge(challenge_id).await?;
    Ok(Json(view))
}

/// Submit a candidate flag.
///
/// A wrong flag is a normal answer (`correct: false`), not an error.
///
/// # Errors
///
/// Returns `RESOURCE_NOT_FOUND` if the challenge doesn't exist.
pub async fn submit_flag<C>(
    State(state): State<Arc<GatewayState<C>>>,
    challenge_id: Result<Path<ChallengeId>, PathRejection>,
    body: Result<Json<SubmitFlagBody>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ChallengeOrchestrator + 'static,
{
    let Path(challenge_id) = challenge_id?;
    let Json(body) = body?;
    let result = state
        .orchestrator
        .submit_flag(challenge_id, &body.flag)
        .await?;

    Ok(Json(SubmitFlagResponse {
        success: true,
        message: result.message,
        correct: result.correct,
        submitted_at: result.submitted_at,
    }))
}

/// Destroy the challenge's VM.
///
/// # Errors
///
/// Returns an error if the VM cannot be destroyed.
pub async fn terminate_challenge<C>(
    State(state): State<Arc<GatewayState<C>>>,
    challenge_id: Result<Path<ChallengeId>, PathRejection>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ChallengeOrchestrator + 'static,
{
    let Path(challenge_id) = challenge_id?;
    let view = state.orchestrator.terminate_challenge(challenge_id).await?;
    Ok(Json(view))
}

/// Reconcile the deployment with the hypervisor.
///
/// # Errors
///
/// Returns an error if the hypervisor cannot be queried.
pub async fn sync_challenge<C>(
    State(state): State<Arc<GatewayState<C>>>,
    challenge_id: Result<Path<ChallengeId>, PathRejection>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ChallengeOrchestrator + 'static,
{
    let Path(challenge_id) = challenge_id?;
    let view = state.orchestrator.sync_deployment(challenge_id).await?;
    Ok(Json(view))
}

#[cfg(test)]
mod tests {
    use crate::handlers::testing::TestRange;
    use axum::http::StatusCode;
    use ctf_range_runner::{ExecutorReport, RunStatus};
    use serde_json::{json, Value};

    #[tokio::test]
    async fn create_submit_terminate() {
        let range = TestRange::new();
        let level_id = range.level("Open redirect").await;

        let response = range
            .server
            .post("/api/v1/challenges")
            .json(&json!({ "level_id": level_id, "team_name": "Alpha" }))
            .await;
        response.assert_status(StatusCode::CREATED);
        let created: Value = response.json();
        assert_eq!(created["success"], true);
        assert_eq!(created["vm_info"]["vmid"], 200);
        let flag = created["flag"].as_str().unwrap().to_string();
        let id = created["challenge_id"].as_u64().unwrap();

        let listed: Value = range.server.get("/api/v1/challenges").await.json();
        assert_eq!(listed["total"], 1);
        assert_eq!(listed["challenges"][0]["deployment_status"], "running");
        assert!(!listed.to_string().contains(&flag));

        let response = range
            .server
            .post(&format!("/api/v1/challenges/{id}/submit"))
            .json(&json!({ "flag": "CTF{NOPE}" }))
            .await;
        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["correct"], false);

        let body: Value = range
            .server
            .post(&format!("/api/v1/challenges/{id}/submit"))
            .json(&json!({ "flag": flag }))
            .await
            .json();
        assert_eq!(body["correct"], true);
        assert!(body["submitted_at"].is_string());

        let view: Value = range
            .server
            .get(&format!("/api/v1/challenges/{id}"))
            .await
            .json();
        assert_eq!(view["flag_submitted"], true);
        assert_eq!(view["deployment_status"], "stopped");

        let response = range
            .server
            .post(&format!("/api/v1/challenges/{id}/terminate"))
            .await;
        response.assert_status_ok();
        let view: Value = response.json();
        assert_eq!(view["deployment_status"], "terminated");
    }

    #[tokio::test]
    async fn failed_configuration_is_reported() {
        let range = TestRange::new();
        let level_id = range.level("Open redirect").await;
        range.executor.respond_with(ExecutorReport {
            status: RunStatus::Failed,
            return_code: Some(2),
            stdout: String::new(),
        });

        let response = range
            .server
            .post("/api/v1/challenges")
            .json(&json!({ "level_id": level_id, "team_name": "Alpha" }))
            .await;
        response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
        let body: Value = response.json();
        assert_eq!(body["error"]["code"], "CONFIGURATION_FAILURE");

        let listed: Value = range.server.get("/api/v1/challenges").await.json();
        assert_eq!(listed["total"], 0);
        assert_eq!(range.hypervisor.destroyed().len(), 1);
    }

    #[tokio::test]
    async fn unknown_level_and_challenge_are_404() {
        let range = TestRange::new();
        let response = range
            .server
            .post("/api/v1/challenges")
            .json(&json!({ "level_id": 42, "team_name": "Alpha" }))
            .await;
        response.assert_status(StatusCode::NOT_FOUND);

        let response = range.server.get("/api/v1/challenges/42").await;
        response.assert_status(StatusCode::NOT_FOUND);

        let response = range
            .server
            .post("/api/v1/challenges/42/submit")
            .json(&json!({ "flag": "CTF{X}" }))
            .await;
        response.assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn non_numeric_id_is_bad_request() {
        let range = TestRange::new();
        let response = range.server.get("/api/v1/challenges/abc").await;
        response.assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn blank_team_is_bad_request() {
        let range = TestRange::new();
        let level_id = range.level("Open redirect").await;
        let response = range
            .server
            .post("/api/v1/challenges")
            .json(&json!({ "level_id": level_id, "team_name": "  " }))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn sync_reports_stopped_vm() {
        let range = TestRange::new();
        let level_id = range.level("Open redirect").await;
        let created = range.challenge(level_id, "Alpha").await;
        let id = created["challenge_id"].as_u64().unwrap();

        range.hypervisor.set_power(
            ctf_range_control::VmId::new(200),
            ctf_range_hypervisor::PowerState::Stopped,
        );
        let view: Value = range
            .server
            .post(&format!("/api/v1/challenges/{id}/sync"))
            .await
            .json();
        assert_eq!(view["deployment_status"], "stopped");
    }
}
