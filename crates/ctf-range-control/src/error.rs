//! Error types for the orchestrator.
//!
//! Every error that leaves this crate carries one [`ErrorKind`]. Transport
//! and storage errors are folded into the taxonomy here so callers never see
//! a raw `reqwest` or `RocksDB` error.

use ctf_range_core::{ChallengeId, LevelId, VmId};
use ctf_range_hypervisor::HypervisorError;
use ctf_range_store::{DeploymentStatus, StoreError};
use serde::Serialize;
use thiserror::Error;

/// A result type using `ControlError`.
pub type Result<T> = std::result::Result<T, ControlError>;

/// Caller-facing classification of a [`ControlError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Hypervisor unreachable or rejected our credentials.
    ConnectionFailure,
    /// A level, challenge or VM does not exist.
    ResourceNotFound,
    /// No VM identifier is free.
    AllocationExhausted,
    /// Create, clone or start failed.
    ProvisioningFailure,
    /// The configuration run did not succeed.
    ConfigurationFailure,
    /// A commit would break a unique constraint.
    PersistenceConflict,
    /// The request itself is malformed.
    InvalidRequest,
    /// The operation is not allowed in the current deployment state.
    InvalidState,
    /// An outbound call exceeded its time budget.
    Timeout,
    /// Anything else.
    Internal,
}

impl ErrorKind {
    /// Stable machine-readable code.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::ConnectionFailure => "CONNECTION_FAILURE",
            Self::ResourceNotFound => "RESOURCE_NOT_FOUND",
            Self::AllocationExhausted => "ALLOCATION_EXHAUSTED",
            Self::ProvisioningFailure => "PROVISIONING_FAILURE",
            Self::ConfigurationFailure => "CONFIGURATION_FAILURE",
            Self::PersistenceConflict => "PERSISTENCE_CONFLICT",
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::InvalidState => "INVALID_STATE",
            Self::Timeout => "TIMEOUT",
            Self::Internal => "INTERNAL_ERROR",
        }
    }

    /// HTTP status a caller should see for this kind of failure.
    #[must_use]
    pub const fn http_status_code(self) -> u16 {
        match self {
            Self::ConnectionFailure | Self::AllocationExhausted => 503,
            Self::ResourceNotFound => 404,
            Self::ProvisioningFailure | Self::ConfigurationFailure | Self::Internal => 500,
            Self::PersistenceConflict | Self::InvalidState => 409,
            Self::InvalidRequest => 400,
            Self::Timeout => 504,
        }
    }
}

/// Errors that can occur in orchestrator operations.
#[derive(Debug, Error)]
pub enum ControlError {
    /// The hypervisor control plane is unreachable or rejected our credentials.
    #[error("hypervisor unavailable: {0}")]
    ConnectionFailure(String),

    /// The hypervisor has no VM with this identifier.
    #[error("VM {0} not found")]
    ResourceNotFound(VmId),

    /// No VM identifier is free in the configured range.
    #[error("no free VM identifier in [{start}, {max})")]
    AllocationExhausted {
        /// First identifier of the range.
        start: VmId,
        /// One past the last identifier of the range.
        max: VmId,
    },

    /// The VM could not be created or started.
    #[error("provisioning failed: {0}")]
    ProvisioningFailure(String),

    /// The configuration run failed or reported a non-success outcome.
    #[error("configuration failed: {0}")]
    ConfigurationFailure(String),

    /// The commit would break a unique constraint.
    #[error("persistence conflict: {0}")]
    PersistenceConflict(String),

    /// The requested level was not found.
    #[error("level not found: {0}")]
    LevelNotFound(LevelId),

    /// The requested challenge was not found.
    #[error("challenge not found: {0}")]
    ChallengeNotFound(ChallengeId),

    /// The request is malformed or not allowed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The requested deployment transition is not valid.
    #[error("invalid deployment transition: cannot move from {from:?} to {to:?}")]
    InvalidState {
        /// The current status.
        from: DeploymentStatus,
        /// The requested status.
        to: DeploymentStatus,
    },

    /// An outbound call did not finish in time.
    #[error("timed out: {0}")]
    Timeout(String),

    /// Storage layer error.
    #[error("storage error: {0}")]
    Store(StoreError),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ControlError {
    /// The caller-facing classification of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::ConnectionFailure(_) => ErrorKind::ConnectionFailure,
            Self::ResourceNotFound(_) | Self::LevelNotFound(_) | Self::ChallengeNotFound(_) => {
                ErrorKind::ResourceNotFound
            }
            Self::AllocationExhausted { .. } => ErrorKind::AllocationExhausted,
            Self::ProvisioningFailure(_) => ErrorKind::ProvisioningFailure,
            Self::ConfigurationFailure(_) => ErrorKind::ConfigurationFailure,
            Self::PersistenceConflict(_) => ErrorKind::PersistenceConflict,
            Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Self::InvalidState { .. } => ErrorKind::InvalidState,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Store(_) | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Returns the appropriate HTTP status code for this error.
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        self.kind().http_status_code()
    }
}

impl From<StoreError> for ControlError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(detail) => Self::PersistenceConflict(detail),
            other => Self::Store(other),
        }
    }
}

impl From<HypervisorError> for ControlError {
    fn from(err: HypervisorError) -> Self {
        match err {
            HypervisorError::Connection(detail) => Self::ConnectionFailure(detail),
            HypervisorError::NotFound(vmid) => Self::ResourceNotFound(vmid),
            HypervisorError::AllocationExhausted { start, max } => {
                Self::AllocationExhausted { start, max }
            }
            HypervisorError::Conflict(vmid) => {
                Self::ProvisioningFailure(format!("VM id {vmid} was taken concurrently"))
            }
            HypervisorError::Timeout(detail) => Self::Timeout(detail),
            HypervisorError::Config(detail) => Self::Internal(detail),
            err @ (HypervisorError::NodeOperation(_)
            | HypervisorError::Provisioning(_)
            | HypervisorError::InvalidResponse(_)) => Self::ProvisioningFailure(err.to_string()),
        }
    }
}
