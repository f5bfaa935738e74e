//! Router configuration.
//!
//! This module sets up the Axum router with all routes and middleware.

use std::sync::Arc;

use axum::http::Uri;
use axum::routing::{get, patch, post};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use ctf_range_control::ChallengeOrchestrator;

use crate::error::ApiError;
use crate::handlers::{challenges, health, levels, vms};
use crate::state::GatewayState;

/// Create the gateway router with all routes and middleware.
///
/// # Routes
///
/// - `GET /health` - Store and hypervisor reachability
/// - `GET /api/v1/levels` - List levels
/// - `POST /api/v1/levels` - Create level
/// - `PATCH /api/v1/levels/:level_id` - Enable or disable a level
/// - `GET /api/v1/challenges` - List challenges
/// - `POST /api/v1/challenges` - Create challenge (runs the provisioning saga)
/// - `GET /api/v1/challenges/:challenge_id` - Get challenge
/// - `POST /api/v1/challenges/:challenge_id/submit` - Submit flag
/// - `POST /api/v1/challenges/:challenge_id/terminate` - Destroy the VM
/// - `POST /api/v1/challenges/:challenge_id/sync` - Reconcile with the hypervisor
/// - `GET /api/v1/vms` - Raw hypervisor listing
pub fn create_router<C>(state: GatewayState<C>) -> Router
where
    C: ChallengeOrchestrator + 'static,
{
    let cors = build_cors_layer(&state.config.cors_origins);
    let middleware = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(state.config.max_body_bytes))
        .layer(TimeoutLayer::new(state.config.request_timeout()));

    let state = Arc::new(state);

    Router::new()
        .route("/health", get(health::health::<C>))
        // Levels
        .route(
            "/api/v1/levels",
            get(levels::list_levels::<C>).post(levels::create_level::<C>),
        )
        .route("/api/v1/levels/:level_id", patch(levels::update_level::<C>))
        // Challenges
        .route(
            "/api/v1/challenges",
            get(challenges::list_challenges::<C>).post(challenges::create_challenge::<C>),
        )
        .route(
            "/api/v1/challenges/:challenge_id",
            get(challenges::get_challenge::<C>),
        )
        .route(
            "/api/v1/challenges/:challenge_id/submit",
            post(challenges::submit_flag::<C>),
        )
        .route(
            "/api/v1/challenges/:challenge_id/terminate",
            post(challenges::terminate_challenge::<C>),
        )
        .route(
            "/api/v1/challenges/:challenge_id/sync",
            post(challenges::sync_challenge::<C>),
        )
        // Hypervisor
        .route("/api/v1/vms", get(vms::list_vms::<C>))
        .fallback(not_found)
        .layer(middleware)
        .with_state(state)
}

async fn not_found(uri: Uri) -> ApiError {
    ApiError::NotFound(format!("no route for {}", uri.path()))
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::testing::TestRange;
    use axum::http::StatusCode;
    use serde_json::Value;

    #[test]
    fn cors_any_origin() {
        let origins = vec!["*".to_string()];
        let _layer = build_cors_layer(&origins);
    }

    #[test]
    fn cors_specific_origins() {
        let origins = vec![
            "http://localhost:3000".to_string(),
            "https://scoreboard.example.com".to_string(),
        ];
        let _layer = build_cors_layer(&origins);
    }

    #[tokio::test]
    async fn unknown_route_uses_error_envelope() {
        let range = TestRange::new();
        let response = range.server.get("/api/v2/nothing").await;
        response.assert_status(StatusCode::NOT_FOUND);
        let body: Value = response.json();
        assert_eq!(body["error"]["code"], "RESOURCE_NOT_FOUND");
    }
}
