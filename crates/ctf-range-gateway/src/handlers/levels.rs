//! Level management endpoints.

use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use ctf_range_control::{ChallengeOrchestrator, Level, LevelId, NewLevel};

use crate::error::ApiError;
use crate::state::GatewayState;

// =============================================================================
// Request/Response Types
// =============================================================================

/// Response for level list.
#[derive(Debug, Serialize)]
pub struct ListLevelsResponse {
    /// Number of levels.
    pub total: usize,
    /// The levels.
    pub levels: Vec<Level>,
}

/// Partial update of a level.
#[derive(Debug, Deserialize)]
pub struct UpdateLevelBody {
    /// Whether new challenges may be created from the level.
    pub is_active: bool,
}

// =============================================================================
// Handlers
// =============================================================================

/// List all levels.
///
/// # Errors
///
/// Returns an error if the store cannot be read.
pub async fn list_levels<C>(
    State(state): State<Arc<GatewayState<C>>>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ChallengeOrchestrator + 'static,
{
    let levels = state.orchestrator.list_levels().await?;
    Ok(Json(ListLevelsResponse {
        total: levels.len(),
        levels,
    }))
}

/// Create a level.
///
/// # Errors
///
/// Returns an error if the body is invalid or the name is already taken.
pub async fn create_level<C>(
    State(state): State<Arc<GatewayState<C>>>,
    body: Result<Json<NewLevel>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ChallengeOrchestrator + 'static,
{
    let Json(body) = body?;
    let level = state.orchestrator.create_level(body).await?;
    Ok((StatusCode::CREATED, Json(level)))
}

/// Enable or disable a level.
///
/// # Errors
///
/// Returns an error if the level does not exist.
pub async fn update_level<C>(
    State(state): State<Arc<GatewayState<C>>>,
    level_id: Result<Path<LevelId>, PathRejection>,
    body: Result<Json<UpdateLevelBody>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ChallengeOrchestrator + 'static,
{
    let Path(level_id) = level_id?;
    let Json(body) = body?;
    let level = state
        .orchestrator
        .set_level_active(level_id, body.is_active)
        .await?;
    Ok(Json(level))
}
