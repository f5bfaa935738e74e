//! Core types and utilities for ctf-range.
//!
//! This crate provides the foundational types used throughout the range:
//!
//! - **Identifiers**: Strongly-typed serial IDs for levels, challenges and
//!   deployments, plus the hypervisor-assigned [`VmId`]
//! - **Flags**: The [`FlagGenerator`] that mints per-challenge secrets from
//!   the operating system's CSPRNG
//! - **Error types**: Common error definitions shared across crates
//!
//! # Example
//!
//! ```
//! use ctf_range_core::{ChallengeId, FlagGenerator, FlagPolicy, VmId};
//!
//! let challenge_id: ChallengeId = "42".parse().unwrap();
//! assert_eq!(challenge_id.get(), 42);
//!
//! let vmid = VmId::new(200);
//! assert_eq!(vmid.to_string(), "200");
//!
//! let generator = FlagGenerator::new(FlagPolicy::default()).unwrap();
//! let flag = generator.generate();
//! assert!(generator.policy().matches(&flag));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod flag;
pub mod ids;

pub use error::{CoreError, Result};
pub use flag::{constant_time_eq, FlagGenerator, FlagPolicy};
pub use ids::{ChallengeId, DeploymentId, IdError, LevelId, VmId};
