//! HTTP gateway for ctf-range.
//!
//! This crate exposes the orchestrator over a small JSON API: level
//! management, challenge creation and teardown, flag submission and a raw
//! view of the hypervisor.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                Scoreboard / Operators (HTTP)                │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     ctf-range-gateway                       │
//! │  ┌─────────────┐ ┌─────────────┐ ┌─────────────────────┐    │
//! │  │   Router    │ │  Handlers   │ │  ApiError envelope  │    │
//! │  │ + Middleware│ │             │ │                     │    │
//! │  └─────────────┘ └─────────────┘ └─────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//!                   ┌─────────────────────┐
//!                   │ OrchestratorService │
//!                   └─────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ctf_range_control::{ControlConfig, OrchestratorService};
//! use ctf_range_gateway::{create_router, GatewayConfig, GatewayState};
//! use ctf_range_hypervisor::{HypervisorConfig, ProxmoxConnector, VirtualMachineProvisioner, VmIdAllocator};
//! use ctf_range_runner::{AnsiblePlaybookExecutor, ConfigurationRunner, RunnerConfig};
//! use ctf_range_store::RocksStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = GatewayConfig::from_env();
//! let store = Arc::new(RocksStore::open(&config.data_dir)?);
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
//! let orchestrator = Arc::new(OrchestratorService::new(
//!     store,
//!     provisioner,
//!     allocator,
//!     runner,
//!     ControlConfig::from_env(),
//! )?);
//!
//! let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
//! let app = create_router(GatewayState::new(orchestrator, config));
//! axum::serve(listener, app).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use config::GatewayConfig;
pub use error::ApiError;
pub use routes::create_router;
pub use state::GatewayState;
