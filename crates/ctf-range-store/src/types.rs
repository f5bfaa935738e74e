//! Database record types.
//!
//! These types represent the data structures stored in `RocksDB`.

use chrono::{DateTime, Utc};
use ctf_range_core::{ChallengeId, DeploymentId, LevelId, VmId};
use serde::{Deserialize, Serialize};

/// Default point value of a level.
pub const DEFAULT_POINTS: u32 = 100;

/// A challenge template that teams can instantiate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Level {
    /// Unique identifier for the level.
    pub level_id: LevelId,
    /// Display name, unique across levels.
    pub name: String,
    /// Weakness class the level exercises.
    pub category: Category,
    /// Difficulty rating.
    pub difficulty: Difficulty,
    /// Optional long-form description.
    pub description: Option<String>,
    /// Points awarded for a correct submission.
    pub points: u32,
    /// Template the VM is built from: a template VMID or install media name.
    pub template_ref: String,
    /// Whether new challenges may be created from this level.
    pub is_active: bool,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

/// The ten OWASP Top 10 (2021) weakness classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// A01: Broken Access Control.
    BrokenAccessControl,
    /// A02: Cryptographic Failures.
    CryptographicFailures,
    /// A03: Injection.
    Injection,
    /// A04: Insecure Design.
    InsecureDesign,
    /// A05: Security Misconfiguration.
    SecurityMisconfiguration,
    /// A06: Vulnerable and Outdated Components.
    VulnerableComponents,
    /// A07: Identification and Authentication Failures.
    AuthenticationFailures,
    /// A08: Software and Data Integrity Failures.
    IntegrityFailures,
    /// A09: Security Logging and Monitoring Failures.
    LoggingFailures,
    /// A10: Server-Side Request Forgery.
    ServerSideRequestForgery,
}

impl Category {
    /// All categories in ranking order.
    pub const ALL: [Self; 10] = [
        Self::BrokenAccessControl,
        Self::CryptographicFailures,
        Self::Injection,
        Self::InsecureDesign,
        Self::SecurityMisconfiguration,
        Self::VulnerableComponents,
        Self::AuthenticationFailures,
        Self::IntegrityFailures,
        Self::LoggingFailures,
        Self::ServerSideRequestForgery,
    ];

    /// The human-readable OWASP label, e.g. `A03:2021-Injection`.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::BrokenAccessControl => "A01:2021-Broken Access Control",
            Self::CryptographicFailures => "A02:2021-Cryptographic Failures",
            Self::Injection => "A03:2021-Injection",
            Self::InsecureDesign => "A04:2021-Insecure Design",
            Self::SecurityMisconfiguration => "A05:2021-Security Misconfiguration",
            Self::VulnerableComponents => "A06:2021-Vulnerable and Outdated Components",
            Self::AuthenticationFailures => "A07:2021-Identification and Authentication Failures",
            Self::IntegrityFailures => "A08:2021-Software and Data Integrity Failures",
            Self::LoggingFailures => "A09:2021-Security Logging and Monitoring Failures",
            Self::ServerSideRequestForgery => "A10:2021-Server-Side Request Forgery",
        }
    }
}

/// Difficulty rating of a level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    /// Introductory.
    Easy,
    /// Intermediate.
    Medium,
    /// Advanced.
    Hard,
}

/// One team's instance of a level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    /// Unique identifier for the challenge.
    pub challenge_id: ChallengeId,
    /// Level this challenge instantiates.
    pub level_id: LevelId,
    /// Team the challenge belongs to.
    pub team: String,
    /// Secret token, unique across challenges.
    pub flag: Option<String>,
    /// Whether the flag has been submitted correctly. Never reverts.
    pub flag_submitted: bool,
    /// When the flag was first submitted correctly.
    pub flag_submitted_at: Option<DateTime<Utc>>,
    /// Whether the challenge is still live.
    pub is_active: bool,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

/// The provisioned VM backing a challenge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    /// Unique identifier for the deployment.
    pub deployment_id: DeploymentId,
    /// Challenge this deployment backs (one-to-one).
    pub challenge_id: ChallengeId,
    /// Hypervisor identifier, unique across deployments.
    pub vm_id: VmId,
    /// Hypervisor resource name, unique across deployments.
    pub vm_name: String,
    /// Address the VM was configured with, if known.
    pub vm_ip: Option<String>,
    /// Lifecycle status.
    pub status: DeploymentStatus,
    /// Failure detail, set only when `status` is `Error`.
    pub error_message: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// When the VM reached `Running`.
    pub started_at: Option<DateTime<Utc>>,
    /// When the VM was stopped.
    pub stopped_at: Option<DateTime<Utc>>,
    /// When the VM was destroyed.
    pub terminated_at: Option<DateTime<Utc>>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Deployment {
    /// Returns true while the deployment is coming up or serving.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.status.is_active()
    }
}

/// Lifecycle states for a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum DeploymentStatus {
    /// Recorded, nothing provisioned yet.
    Pending = 1,
    /// VM is being created and configured.
    Creating = 2,
    /// VM is up and configured.
    Running = 3,
    /// VM has been powered off.
    Stopped = 4,
    /// Something went wrong; see `error_message`.
    Error = 5,
    /// Teardown in progress.
    Terminating = 6,
    /// VM destroyed.
    Terminated = 7,
}

impl DeploymentStatus {
    /// Convert the status to its numeric representation.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Try to convert a numeric value to a `DeploymentStatus`.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Pending),
            2 => Some(Self::Creating),
            3 => Some(Self::Running),
            4 => Some(Self::Stopped),
            5 => Some(Self::Error),
            6 => Some(Self::Terminating),
            7 => Some(Self::Terminated),
            _ => None,
        }
    }

    /// Returns true for `Pending`, `Creating` and `Running`.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Creating | Self::Running)
    }

    /// Returns true once no further transitions are possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Terminated | Self::Error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_u8_roundtrip() {
        for value in 1..=7 {
            let status = DeploymentStatus::from_u8(value).unwrap();
            assert_eq!(status.as_u8(), value);
        }
        assert!(DeploymentStatus::from_u8(0).is_none());
        assert!(DeploymentStatus::from_u8(8).is_none());
    }

    #[test]
    fn status_predicates() {
        assert!(DeploymentStatus::Running.is_active());
        assert!(!DeploymentStatus::Stopped.is_active());
        assert!(DeploymentStatus::Error.is_terminal());
        assert!(!DeploymentStatus::Terminating.is_terminal());
    }

    #[test]
    fn category_wire_names() {
        let json = serde_json::to_string(&Category::ServerSideRequestForgery).unwrap();
        assert_eq!(json, "\"server_side_request_forgery\"");
        assert_eq!(Category::ALL.len(), 10);
        assert!(Category::ALL[0].label().starts_with("A01"));
        assert!(Category::ALL[9].label().starts_with("A10"));
    }
}
