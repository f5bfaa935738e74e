//! Error types for the hypervisor crate.

use ctf_range_core::VmId;
use thiserror::Error;

/// Errors that can occur talking to the hypervisor.
#[derive(Error, Debug)]
pub enum HypervisorError {
    /// The control plane is unreachable or rejected our credentials.
    #[error("hypervisor connection failed: {0}")]
    Connection(String),

    /// The hypervisor has no resource with this identifier.
    #[error("resource {0} not found")]
    NotFound(VmId),

    /// The identifier was taken by someone else between allocation and creation.
    #[error("resource {0} already exists")]
    Conflict(VmId),

    /// A node-level command (start, stop, destroy, ...) failed.
    #[error("node operation failed: {0}")]
    NodeOperation(String),

    /// Create, clone or start failed and the half-created resource was discarded.
    #[error("provisioning failed: {0}")]
    Provisioning(String),

    /// No free identifier is left in the configured range.
    #[error("no free VM identifier in [{start}, {max})")]
    AllocationExhausted {
        /// First identifier of the range.
        start: VmId,
        /// One past the last identifier of the range.
        max: VmId,
    },

    /// A call or task did not finish in time.
    #[error("timed out: {0}")]
    Timeout(String),

    /// The hypervisor answered with something we could not decode.
    #[error("invalid hypervisor response: {0}")]
    InvalidResponse(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl HypervisorError {
    /// Returns true if the session should be discarded and re-established.
    #[must_use]
    pub const fn is_connection(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}

impl From<reqwest::Error> for HypervisorError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_decode() {
            Self::InvalidResponse(err.to_string())
        } else {
            Self::Connection(err.to_string())
        }
    }
}

/// A specialized Result type for hypervisor operations.
pub type Result<T> = std::result::Result<T, HypervisorError>;
