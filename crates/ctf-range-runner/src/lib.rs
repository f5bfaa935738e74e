//! Host configuration for ctf-range.
//!
//! After a challenge VM boots, the orchestrator plants the flag on it by
//! running an Ansible playbook against a one-host inventory. This crate
//! separates that into two layers:
//!
//! - [`PlaybookExecutor`]: runs a playbook and reports status, return code
//!   and output. [`AnsiblePlaybookExecutor`] shells out to `ansible-playbook`.
//! - [`ConfigurationRunner`]: resolves the playbook, builds the inventory and
//!   normalizes every result into a [`RunOutcome`].
//!
//! ```text
//!   RunRequest ──▶ ConfigurationRunner ──PlaybookJob──▶ PlaybookExecutor
//!                         │                                    │
//!   RunOutcome ◀──────────┴──────────── ExecutorReport ◀───────┘
//!   success = status == successful && return_code == 0
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::collections::BTreeMap;
//! use std::sync::Arc;
//!
//! use ctf_range_runner::{AnsiblePlaybookExecutor, ConfigurationRunner, RunRequest, RunnerConfig};
//!
//! # async fn example() {
//! let config = RunnerConfig::from_env();
//! let executor = AnsiblePlaybookExecutor::new(config.playbook_bin.clone(), config.timeout());
//! let runner = ConfigurationRunner::new(config, Arc::new(executor));
//!
//! let outcome = runner
//!     .run(&RunRequest {
//!         host: "10.10.0.200".into(),
//!         playbook: "deploy_flag.yml".into(),
//!         ssh_user: "root".into(),
//!         extra_vars: BTreeMap::new(),
//!     })
//!     .await;
//! println!("{} (rc {})", outcome.status, outcome.return_code);
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod executor;
pub mod runner;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

pub use config::RunnerConfig;
pub use error::{Result, RunnerError};
pub use executor::{AnsiblePlaybookExecutor, PlaybookExecutor};
pub use runner::{build_inventory, parse_recap, ConfigurationRunner};
pub use types::{
    ExecutorReport, HostStats, PlaybookJob, RunOutcome, RunRequest, RunStatus,
    TIMEOUT_RETURN_CODE,
};

#[cfg(any(test, feature = "test-utils"))]
pub use mock::MockExecutor;
