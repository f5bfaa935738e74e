//! Database schema definitions and column families.
//!
//! This module defines the column families used in `RocksDB` storage.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Primary level records, keyed by `level_id`.
    pub const LEVELS: &str = "levels";

    /// Unique index: level name to `level_id`.
    pub const LEVELS_BY_NAME: &str = "levels_by_name";

    /// Primary challenge records, keyed by `challenge_id`.
    pub const CHALLENGES: &str = "challenges";

    /// Index: challenges by level, keyed by `level_id || challenge_id`.
    pub const CHALLENGES_BY_LEVEL: &str = "challenges_by_level";

    /// Unique index: flag to `challenge_id`.
    pub const CHALLENGES_BY_FLAG: &str = "challenges_by_flag";

    /// Primary deployment records, keyed by `deployment_id`.
    pub const DEPLOYMENTS: &str = "deployments";

    /// Unique index: `challenge_id` to `deployment_id`.
    pub const DEPLOYMENTS_BY_CHALLENGE: &str = "deployments_by_challenge";

    /// Unique index: `vm_id` to `deployment_id`.
    pub const DEPLOYMENTS_BY_VM_ID: &str = "deployments_by_vm_id";

    /// Unique index: `vm_name` to `deployment_id`.
    pub const DEPLOYMENTS_BY_VM_NAME: &str = "deployments_by_vm_name";

    /// Identifier sequences, keyed by sequence name.
    pub const SEQUENCES: &str = "sequences";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![
        cf::LEVELS,
        cf::LEVELS_BY_NAME,
        cf::CHALLENGES,
        cf::CHALLENGES_BY_LEVEL,
        cf::CHALLENGES_BY_FLAG,
        cf::DEPLOYMENTS,
        cf::DEPLOYMENTS_BY_CHALLENGE,
        cf::DEPLOYMENTS_BY_VM_ID,
        cf::DEPLOYMENTS_BY_VM_NAME,
        cf::SEQUENCES,
    ]
}
