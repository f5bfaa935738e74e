//! Hypervisor provisioning for ctf-range.
//!
//! This crate drives a Proxmox VE node on behalf of the orchestrator. It
//! handles:
//!
//! - Ticket authentication and a single lazily-established session
//! - Merged VM and container listings
//! - Create or clone, size, start, stop and destroy of challenge VMs
//! - Lowest-free VM identifier allocation within a configured range
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Deployment orchestrator                   │
//! └─────────────────────────────────────────────────────────────┘
//!               │                               │
//!               ▼                               ▼
//! ┌───────────────────────────┐   ┌───────────────────────────┐
//! │       VmIdAllocator       │──▶│ VirtualMachineProvisioner │
//! │  first free in [200,500)  │   │  session guard, task wait │
//! └───────────────────────────┘   └───────────────────────────┘
//!                                               │
//!                                 HypervisorConnector / Session
//!                                               │
//!                         ┌─────────────────────┴───────────┐
//!                         ▼                                 ▼
//!               ┌───────────────────┐             ┌───────────────────┐
//!               │ ProxmoxConnector  │             │  MockHypervisor   │
//!               │  (reqwest, HTTPS) │             │  (tests only)     │
//!               └───────────────────┘             └───────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::collections::HashSet;
//! use std::sync::Arc;
//!
//! use ctf_range_hypervisor::{
//!     HypervisorConfig, ProxmoxConnector, VirtualMachineProvisioner, VmIdAllocator,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = HypervisorConfig::from_env();
//! let allocator = VmIdAllocator::new(config.vmid_range()?);
//! let connector = ProxmoxConnector::new(config.clone())?;
//! let provisioner = VirtualMachineProvisioner::new(Arc::new(connector), config);
//!
//! let vmid = allocator.allocate(&provisioner, &HashSet::new()).await?;
//! println!("next free VM id: {vmid}");
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod allocator;
pub mod api;
pub mod config;
pub mod error;
pub mod provisioner;
pub mod proxmox;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

pub use allocator::{first_free, VmIdAllocator};
pub use api::{HypervisorConnector, HypervisorSession};
pub use config::HypervisorConfig;
pub use error::{HypervisorError, Result};
pub use provisioner::VirtualMachineProvisioner;
pub use proxmox::{ProxmoxConnector, ProxmoxSession};
pub use types::{
    CloneSpec, CreateSpec, PowerState, ProvisionRequest, ProvisionResult, ResourceClass,
    ResourceInfo, ResourceSummary, TaskId, TaskState, TemplateSource, VmConfig, VmIdRange,
    VmSizing,
};

#[cfg(any(test, feature = "test-utils"))]
pub use mock::{MockHypervisor, MockVm};
