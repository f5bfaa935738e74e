//! Deployment orchestrator for ctf-range.
//!
//! This crate owns the business logic of the range: turning a level and a
//! team name into a running, flag-bearing VM, checking flag submissions, and
//! tearing challenges down again. It coordinates the store, the hypervisor
//! and the configuration runner.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Gateway (HTTP)                       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    OrchestratorService                      │
//! │  ┌─────────────┐ ┌─────────────┐ ┌─────────────────────┐    │
//! │  │  Challenge  │ │    Flag     │ │     Lifecycle       │    │
//! │  │    Saga     │ │ Submission  │ │   State Machine     │    │
//! │  └─────────────┘ └─────────────┘ └─────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!               ┌──────────────┼──────────────┐
//!               ▼              ▼              ▼
//!        ┌──────────┐   ┌────────────┐  ┌──────────┐
//!        │  Store   │   │ Hypervisor │  │  Runner  │
//!        │ (RocksDB)│   │ (Proxmox)  │  │ (Ansible)│
//!        └──────────┘   └────────────┘  └──────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use ctf_range_control::{
//!     ChallengeOrchestrator, ControlConfig, CreateChallengeRequest, OrchestratorService,
//! };
//! use ctf_range_core::LevelId;
//! use ctf_range_hypervisor::{HypervisorConfig, ProxmoxConnector, VirtualMachineProvisioner, VmIdAllocator};
//! use ctf_range_runner::{AnsiblePlaybookExecutor, ConfigurationRunner, RunnerConfig};
//! use ctf_range_store::RocksStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(RocksStore::open("/var/lib/ctf-range")?);
//!
//! let hv_config = HypervisorConfig::from_env();
//! let allocator = VmIdAllocator::new(hv_config.vmid_range()?);
//! let connector = Arc::new(ProxmoxConnector::new(hv_config.clone())?);
//! let provisioner = Arc::new(VirtualMachineProvisioner::new(connector, hv_config));
//!
//! let runner_config = RunnerConfig::from_env();
//! let executor = AnsiblePlaybookExecutor::new(runner_config.playbook_bin.clone(), runner_config.timeout());
//! let runner = Arc::new(ConfigurationRunner::new(runner_config, Arc::new(executor)));
//!
//! let orchestrator =
//!     OrchestratorService::new(store, provisioner, allocator, runner, ControlConfig::from_env())?;
//!
//! let result = orchestrator
//!     .create_challenge(CreateChallengeRequest::new(LevelId::new(1), "Alpha"))
//!     .await?;
//! println!("challenge {} on {}", result.challenge_id, result.vm_info.address());
//! # Ok(())
//! # }
//! ```
//!
//! # State Machine
//!
//! Deployments follow a strict state machine:
//!
//! - `Pending` → `Creating` → `Running`
//! - `Running` → `Stopped` (flag submitted)
//! - `Running`, `Stopped` or `Error` → `Terminating` → `Terminated`
//! - any non-terminal state → `Error`
//!
//! See the [`lifecycle`] module for transition validation helpers.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod lifecycle;
pub mod saga;
pub mod service;
pub mod types;

pub use error::{ControlError, ErrorKind, Result};
pub use saga::{stop_and_destroy, team_slug, vm_name, CompensationGuard};
pub use service::{ChallengeOrchestrator, OrchestratorService};
pub use types::{
    ChallengeResult, ChallengeView, ControlConfig, CreateChallengeRequest, HealthReport,
    NewLevel, SubmissionResult, MAX_TEAM_NAME_LEN,
};

// Re-export commonly used types from dependencies for convenience
pub use ctf_range_core::{ChallengeId, DeploymentId, LevelId, VmId};
pub use ctf_range_store::{Category, Challenge, Deployment, DeploymentStatus, Difficulty, Level};
