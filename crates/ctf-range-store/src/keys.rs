//! Key encoding utilities for `RocksDB`.
//!
//! Numeric identifiers are encoded big-endian so iteration order matches
//! numeric order.

use ctf_range_core::{ChallengeId, DeploymentId, LevelId, VmId};

use crate::error::{Result, StoreError};

/// Encode a level key.
#[must_use]
pub fn level_key(level_id: LevelId) -> Vec<u8> {
    level_id.to_be_bytes().to_vec()
}

/// Encode a challenge key.
#[must_use]
pub fn challenge_key(challenge_id: ChallengeId) -> Vec<u8> {
    challenge_id.to_be_bytes().to_vec()
}

/// Encode a deployment key.
#[must_use]
pub fn deployment_key(deployment_id: DeploymentId) -> Vec<u8> {
    deployment_id.to_be_bytes().to_vec()
}

/// Encode a VM identifier index key.
#[must_use]
pub fn vm_id_key(vm_id: VmId) -> Vec<u8> {
    vm_id.to_be_bytes().to_vec()
}

/// Encode a level-challenge index key: `level_id || challenge_id`.
///
/// This allows prefix scans for all challenges of a level.
#[must_use]
pub fn level_challenge_key(level_id: LevelId, challenge_id: ChallengeId) -> Vec<u8> {
    let mut key = Vec::with_capacity(16);
    key.extend_from_slice(&level_id.to_be_bytes());
    key.extend_from_slice(&challenge_id.to_be_bytes());
    key
}

/// Encode a level prefix for scanning challenges by level.
#[must_use]
pub fn level_prefix(level_id: LevelId) -> Vec<u8> {
    level_id.to_be_bytes().to_vec()
}

/// Extract the challenge ID from a level-challenge key.
///
/// # Errors
///
/// Returns an error if the key is not 16 bytes.
pub fn extract_challenge_id(key: &[u8]) -> Result<ChallengeId> {
    if key.len() != 16 {
        return Err(StoreError::Database(format!(
            "malformed level-challenge key of {} bytes",
            key.len()
        )));
    }
    ChallengeId::from_be_bytes(&key[8..16]).map_err(|e| StoreError::Database(e.to_string()))
}

/// Sequence counter key.
#[must_use]
pub fn sequence_key(name: &str) -> Vec<u8> {
    name.as_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_challenge_key_layout() {
        let key = level_challenge_key(LevelId::new(3), ChallengeId::new(9));
        assert_eq!(key.len(), 16);
        assert!(key.starts_with(&level_prefix(LevelId::new(3))));
        assert_eq!(extract_challenge_id(&key).unwrap(), ChallengeId::new(9));
    }

    #[test]
    fn extract_rejects_short_key() {
        assert!(extract_challenge_id(&[0u8; 8]).is_err());
    }
}
