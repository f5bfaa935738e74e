//! `RocksDB` persistence layer for ctf-range.
//!
//! This crate stores levels, challenges and deployments using `RocksDB` with
//! column families for the primary records and their unique indexes.
//!
//! # Architecture
//!
//! ```text
//!            ┌──────────────────────────────────────────┐
//!            │              Transaction                 │
//!            │  put_level / put_challenge / put_deploy  │
//!            │  delete_level / delete_challenge         │
//!            └───────────────────┬──────────────────────┘
//!                                │ commit (validate, then one WriteBatch)
//!                                ▼
//!  ┌──────────┐   1..n   ┌─────────────┐   1..1   ┌──────────────┐
//!  │  levels  │─────────▶│ challenges  │─────────▶│ deployments  │
//!  └──────────┘          └─────────────┘          └──────────────┘
//!   by_name (unique)      by_level, by_flag        by_challenge, by_vm_id,
//!                         (unique flag)            by_vm_name (all unique)
//! ```
//!
//! Deletes cascade downwards. Unique constraints are checked against the
//! persisted state and the rest of the transaction together; a violation
//! fails the whole commit with [`StoreError::Conflict`] and writes nothing.
//!
//! # Example
//!
//! ```no_run
//! use ctf_range_store::{RocksStore, Store};
//!
//! let store = RocksStore::open("/tmp/ctf-range-db").unwrap();
//! let challenges = store.list_challenges().unwrap();
//! println!("{} challenges", challenges.len());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod keys;
pub mod rocks;
pub mod schema;
pub mod tx;
pub mod types;

pub use error::{Result, StoreError};
pub use rocks::RocksStore;
pub use tx::{Transaction, WriteOp};
pub use types::{
    Category, Challenge, Deployment, DeploymentStatus, Difficulty, Level, DEFAULT_POINTS,
};

use ctf_range_core::{ChallengeId, DeploymentId, LevelId, VmId};

/// Identifier sequences kept by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sequence {
    /// Level identifiers.
    Level,
    /// Challenge identifiers.
    Challenge,
    /// Deployment identifiers.
    Deployment,
}

impl Sequence {
    /// Storage name of the sequence.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Level => "level",
            Self::Challenge => "challenge",
            Self::Deployment => "deployment",
        }
    }
}

/// The storage trait defining all database operations.
///
/// Reads see only committed state. Writes go through a [`Transaction`].
pub trait Store: Send + Sync {
    // =========================================================================
    // Identifiers and Transactions
    // =========================================================================

    /// Draw the next value from a sequence. Values are never handed out twice,
    /// even when the transaction that used them is rolled back.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn next_id(&self, sequence: Sequence) -> Result<u64>;

    /// Draw the next level identifier.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn next_level_id(&self) -> Result<LevelId> {
        self.next_id(Sequence::Level).map(LevelId::new)
    }

    /// Draw the next challenge identifier.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn next_challenge_id(&self) -> Result<ChallengeId> {
        self.next_id(Sequence::Challenge).map(ChallengeId::new)
    }

    /// Draw the next deployment identifier.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn next_deployment_id(&self) -> Result<DeploymentId> {
        self.next_id(Sequence::Deployment).map(DeploymentId::new)
    }

    /// Start a new transaction.
    fn begin(&self) -> Transaction {
        Transaction::new()
    }

    /// Validate and atomically apply a transaction.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Conflict` if a unique constraint would be violated,
    /// `StoreError::Integrity` if a record references a missing parent.
    fn commit(&self, tx: Transaction) -> Result<()>;

    // =========================================================================
    // Level Operations
    // =========================================================================

    /// Get a level by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_level(&self, level_id: LevelId) -> Result<Option<Level>>;

    /// Find a level by its unique name.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn find_level_by_name(&self, name: &str) -> Result<Option<Level>>;

    /// List all levels in identifier order.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_levels(&self) -> Result<Vec<Level>>;

    // =========================================================================
    // Challenge Operations
    // =========================================================================

    /// Get a challenge by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_challenge(&self, challenge_id: ChallengeId) -> Result<Option<Challenge>>;

    /// List all challenges in identifier order.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_challenges(&self) -> Result<Vec<Challenge>>;

    /// List the challenges instantiated from a level.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_challenges_by_level(&self, level_id: LevelId) -> Result<Vec<Challenge>>;

    // =========================================================================
    // Deployment Operations
    // =========================================================================

    /// Get a deployment by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_deployment(&self, deployment_id: DeploymentId) -> Result<Option<Deployment>>;

    /// Get the deployment backing a challenge.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_deployment_by_challenge(&self, challenge_id: ChallengeId)
        -> Result<Option<Deployment>>;

    /// Find the deployment that owns a VM identifier.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn find_deployment_by_vm(&self, vm_id: VmId) -> Result<Option<Deployment>>;

    /// List all deployments in identifier order.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_deployments(&self) -> Result<Vec<Deployment>>;
}
