//! Error types for the runner crate.

use thiserror::Error;

/// Errors raised while executing a playbook.
///
/// These never reach the orchestrator directly: [`ConfigurationRunner`]
/// folds them into an `exception` outcome.
///
/// [`ConfigurationRunner`]: crate::ConfigurationRunner
#[derive(Error, Debug)]
pub enum RunnerError {
    /// Filesystem error while preparing or cleaning up a run.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The playbook process could not be started.
    #[error("failed to spawn {program}: {reason}")]
    Spawn {
        /// Program that was launched.
        program: String,
        /// Underlying OS error.
        reason: String,
    },

    /// The inventory could not be serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A specialized Result type for runner operations.
pub type Result<T> = std::result::Result<T, RunnerError>;
