//! Gateway application state.
//!
//! This module defines the shared state that is available to all request handlers.

use std::sync::Arc;

use ctf_range_control::ChallengeOrchestrator;

use crate::config::GatewayConfig;

/// Shared application state for the gateway.
pub struct GatewayState<C>
where
    C: ChallengeOrchestrator,
{
    /// The orchestrator behind every endpoint.
    pub orchestrator: Arc<C>,
    /// Gateway configuration.
    pub config: GatewayConfig,
}

impl<C> GatewayState<C>
where
    C: ChallengeOrchestrator,
{
    /// Create a new gateway state.
    #[must_use]
    pub fn new(orchestrator: Arc<C>, config: GatewayConfig) -> Self {
        Self {
            orchestrator,
            config,
        }
    }
}

impl<C> Clone for GatewayState<C>
where
    C: ChallengeOrchestrator,
{
    fn clone(&self) -> Self {
        Self {
            orchestrator: Arc::clone(&self.orchestrator),
            config: self.config.clone(),
        }
    }
}
