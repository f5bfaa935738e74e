//! Request and response types for orchestrator operations.

use std::time::Duration;

use chrono::{DateTime, Utc};
use ctf_range_core::{ChallengeId, DeploymentId, FlagPolicy, LevelId, VmId};
use ctf_range_hypervisor::{ResourceInfo, VmSizing};
use ctf_range_store::{Category, Challenge, Deployment, DeploymentStatus, Difficulty};
use serde::{Deserialize, Serialize};

/// Longest accepted team name, in characters.
pub const MAX_TEAM_NAME_LEN: usize = 100;

/// Request to instantiate a level for a team.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateChallengeRequest {
    /// Level to instantiate.
    pub level_id: LevelId,
    /// Team the challenge belongs to.
    pub team_name: String,
    /// Optional VM sizing. Uses the configured defaults if not provided.
    #[serde(default)]
    pub sizing: Option<VmSizing>,
}

impl CreateChallengeRequest {
    /// Create a request with default sizing.
    #[must_use]
    pub fn new(level_id: LevelId, team_name: impl Into<String>) -> Self {
        Self {
            level_id,
            team_name: team_name.into(),
            sizing: None,
        }
    }
}

/// Outcome of a successful create-challenge saga.
///
/// `flag` is for operators only and must never be shown to the team.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengeResult {
    /// Always true; failures are returned as errors.
    pub success: bool,
    /// Human-readable summary.
    pub message: String,
    /// The new challenge.
    pub challenge_id: ChallengeId,
    /// The deployment backing it.
    pub deployment_id: DeploymentId,
    /// Live information about the VM.
    pub vm_info: ResourceInfo,
    /// The planted flag.
    pub flag: String,
}

/// Outcome of a flag submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionResult {
    /// Whether the flag matched.
    pub correct: bool,
    /// Human-readable message.
    pub message: String,
    /// When the challenge was first solved.
    pub submitted_at: Option<DateTime<Utc>>,
}

/// A challenge joined with its deployment. Never carries the flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeView {
    /// Challenge identifier.
    pub challenge_id: ChallengeId,
    /// Level the challenge instantiates.
    pub level_id: LevelId,
    /// Owning team.
    pub team: String,
    /// Whether the flag has been submitted.
    pub flag_submitted: bool,
    /// When the flag was submitted.
    pub flag_submitted_at: Option<DateTime<Utc>>,
    /// Whether the challenge is live.
    pub is_active: bool,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
    /// Backing deployment, if any.
    pub deployment_id: Option<DeploymentId>,
    /// Deployment status.
    pub deployment_status: Option<DeploymentStatus>,
    /// Hypervisor identifier of the VM.
    pub vm_id: Option<VmId>,
    /// VM name.
    pub vm_name: Option<String>,
    /// VM address.
    pub vm_ip: Option<String>,
    /// Last deployment error.
    pub error_message: Option<String>,
}

impl ChallengeView {
    /// Join a challenge with its deployment.
    #[must_use]
    pub fn new(challenge: &Challenge, deployment: Option<&Deployment>) -> Self {
        Self {
            challenge_id: challenge.challenge_id,
            level_id: challenge.level_id,
            team: challenge.team.clone(),
            flag_submitted: challenge.flag_submitted,
            flag_submitted_at: challenge.flag_submitted_at,
            is_active: challenge.is_active,
            created_at: challenge.created_at,
            updated_at: challenge.updated_at,
            deployment_id: deployment.map(|d| d.deployment_id),
            deployment_status: deployment.map(|d| d.status),
            vm_id: deployment.map(|d| d.vm_id),
            vm_name: deployment.map(|d| d.vm_name.clone()),
            vm_ip: deployment.and_then(|d| d.vm_ip.clone()),
            error_message: deployment.and_then(|d| d.error_message.clone()),
        }
    }
}

/// Request to create a level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewLevel {
    /// Unique display name.
    pub name: String,
    /// Weakness class.
    pub category: Category,
    /// Difficulty rating.
    pub difficulty: Difficulty,
    /// Optional description.
    #[serde(default)]
    pub description: Option<String>,
    /// Points; defaults to 100.
    #[serde(default)]
    pub points: Option<u32>,
    /// Template VMID or install media name.
    pub template_ref: String,
}

/// Reachability of the orchestrator's dependencies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    /// The store answered a read.
    pub database: bool,
    /// The hypervisor answered a version probe.
    pub hypervisor: bool,
    /// Version reported by the hypervisor.
    pub hypervisor_version: Option<String>,
}

impl HealthReport {
    /// Returns true if every dependency is reachable.
    #[must_use]
    pub const fn is_healthy(&self) -> bool {
        self.database && self.hypervisor
    }
}

/// Configuration for the orchestrator.
#[derive(Debug, Clone)]
pub struct ControlConfig {
    /// Shape of generated flags.
    pub flag_policy: FlagPolicy,
    /// Playbook that plants the flag.
    pub flag_playbook: String,
    /// Where on the VM the flag is written.
    pub flag_path: String,
    /// SSH user for the configuration run.
    pub ssh_user: String,
    /// Sizing used when a request does not specify one.
    pub default_sizing: VmSizing,
    /// Network bridge for `net0`.
    pub network_bridge: String,
    /// Time budget for create-and-start, in seconds.
    pub provision_timeout_secs: u64,
    /// Time budget for the configuration run, in seconds.
    pub configure_timeout_secs: u64,
    /// How many times allocate+create is attempted when the id is taken concurrently.
    pub allocation_attempts: u32,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            flag_policy: FlagPolicy::default(),
            flag_playbook: "deploy_flag.yml".to_string(),
            flag_path: "/root/flag.txt".to_string(),
            ssh_user: "root".to_string(),
            default_sizing: VmSizing::default(),
            network_bridge: "vmbr0".to_string(),
            provision_timeout_secs: 600,
            configure_timeout_secs: 900,
            allocation_attempts: 3,
        }
    }
}

impl ControlConfig {
    /// Load configuration from environment variables, falling back to defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("FLAG_PREFIX") {
            config.flag_policy.prefix = val;
        }
        if let Ok(val) = std::env::var("FLAG_CHARSET") {
            config.flag_policy.charset = val;
        }
        if let Ok(val) = std::env::var("FLAG_LENGTH") {
            if let Ok(n) = val.parse() {
                config.flag_policy.length = n;
            }
        }
        if let Ok(val) = std::env::var("FLAG_PLAYBOOK") {
            config.flag_playbook = val;
        }
        if let Ok(val) = std::env::var("FLAG_PATH") {
            config.flag_path = val;
        }
        if let Ok(val) = std::env::var("SSH_USERNAME") {
            config.ssh_user = val;
        }
        if let Ok(val) = std::env::var("DEFAULT_VM_MEMORY") {
            if let Ok(n) = val.parse() {
                config.default_sizing.memory_mb = n;
            }
        }
        if let Ok(val) = std::env::var("DEFAULT_VM_CORES") {
            if let Ok(n) = val.parse() {
                config.default_sizing.cores = n;
            }
        }
        if let Ok(val) = std::env::var("DEFAULT_VM_DISK_GB") {
            if let Ok(n) = val.parse() {
                config.default_sizing.disk_gb = n;
            }
        }
        if let Ok(val) = std::env::var("VM_NETWORK_BRIDGE") {
            config.network_bridge = val;
        }
        if let Ok(val) = std::env::var("PROVISION_TIMEOUT_SECS") {
            if let Ok(n) = val.parse() {
                config.provision_timeout_secs = n;
            }
        }
        if let Ok(val) = std::env::var("CONFIGURE_TIMEOUT_SECS") {
            if let Ok(n) = val.parse() {
                config.configure_timeout_secs = n;
            }
        }
        if let Ok(val) = std::env::var("ALLOCATION_ATTEMPTS") {
            if let Ok(n) = val.parse() {
                config.allocation_attempts = n;
            }
        }

        config
    }

    /// Provisioning time budget.
    #[must_use]
    pub const fn provision_timeout(&self) -> Duration {
        Duration::from_secs(self.provision_timeout_secs)
    }

    /// Configuration time budget.
    #[must_use]
    pub const fn configure_timeout(&self) -> Duration {
        Duration::from_secs(self.configure_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = ControlConfig::default();
        assert_eq!(config.flag_policy.prefix, "CTF");
        assert_eq!(config.flag_policy.length, 32);
        assert_eq!(config.default_sizing.memory_mb, 512);
        assert_eq!(config.default_sizing.cores, 1);
        assert_eq!(config.allocation_attempts, 3);
    }

    #[test]
    fn view_without_deployment() {
        let now = Utc::now();
        let challenge = Challenge {
            challenge_id: ChallengeId::new(1),
            level_id: LevelId::new(1),
            team: "Alpha".into(),
            flag: Some("CTF{SECRET}".into()),
            flag_submitted: false,
            flag_submitted_at: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        let view = ChallengeView::new(&challenge, None);
        assert_eq!(view.team, "Alpha");
        assert!(view.deployment_status.is_none());
        let json = serde_json::to_string(&view).unwrap();
        assert!(!json.contains("SECRET"));
    }
}
