//! `RocksDB` storage implementation.
//!
//! This module provides the `RocksStore` implementation of the `Store` trait.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use ctf_range_core::{ChallengeId, DeploymentId, LevelId, VmId};
use parking_lot::Mutex;
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, IteratorMode, MultiThreaded,
    Options, WriteBatch,
};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::schema::{all_column_families, cf};
use crate::tx::{Transaction, WriteOp};
use crate::types::{Challenge, Deployment, Level};
use crate::{Sequence, Store};

/// RocksDB-backed storage implementation.
pub struct RocksStore {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
    commit_lock: Mutex<()>,
    sequence_lock: Mutex<()>,
}

/// Final state of every record a transaction touches. `None` means deleted.
#[derive(Default)]
struct Staged {
    levels: BTreeMap<LevelId, Option<Level>>,
    challenges: BTreeMap<ChallengeId, Option<Challenge>>,
    deployments: BTreeMap<DeploymentId, Option<Deployment>>,
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DBWithThreadMode::open_cf_descriptors(&opts, path, cf_descriptors)?;

        Ok(Self {
            db: Arc::new(db),
            commit_lock: Mutex::new(()),
            sequence_lock: Mutex::new(()),
        })
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    /// Serialize a value using CBOR.
    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a value from CBOR.
    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn get_record<T: serde::de::DeserializeOwned>(
        &self,
        family: &str,
        key: &[u8],
    ) -> Result<Option<T>> {
        let handle = self.cf(family)?;
        self.db
            .get_cf(&handle, key)?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn list_records<T: serde::de::DeserializeOwned>(&self, family: &str) -> Result<Vec<T>> {
        let handle = self.cf(family)?;
        let mut records = Vec::new();
        for item in self.db.iterator_cf(&handle, IteratorMode::Start) {
            let (_, value) = item?;
            records.push(Self::deserialize(&value)?);
        }
        Ok(records)
    }

    /// Read the owner id stored under a unique index key.
    fn index_owner(&self, index: &str, key: &[u8]) -> Result<Option<u64>> {
        let handle = self.cf(index)?;
        let Some(value) = self.db.get_cf(&handle, key)? else {
            return Ok(None);
        };
        let bytes: [u8; 8] = value.as_slice().try_into().map_err(|_| {
            StoreError::Database(format!("malformed {index} entry of {} bytes", value.len()))
        })?;
        Ok(Some(u64::from_be_bytes(bytes)))
    }

    // =========================================================================
    // Commit: staging
    // =========================================================================

    fn stage(&self, staged: &mut Staged, op: WriteOp) -> Result<()> {
        match op {
            WriteOp::PutLevel(level) => {
                staged.levels.insert(level.level_id, Some(level));
            }
            WriteOp::PutChallenge(challenge) => {
                staged.challenges.insert(challenge.challenge_id, Some(challenge));
            }
            WriteOp::PutDeployment(deployment) => {
                staged
                    .deployments
                    .insert(deployment.deployment_id, Some(deployment));
            }
            WriteOp::DeleteLevel(level_id) => {
                staged.levels.insert(level_id, None);
                let mut children: Vec<ChallengeId> = self
                    .list_challenges_by_level(level_id)?
                    .into_iter()
                    .map(|c| c.challenge_id)
                    .collect();
                children.extend(
                    staged
                        .challenges
                        .values()
                        .flatten()
                        .filter(|c| c.level_id == level_id)
                        .map(|c| c.challenge_id),
                );
                for challenge_id in children {
                    self.stage(staged, WriteOp::DeleteChallenge(challenge_id))?;
                }
            }
            WriteOp::DeleteChallenge(challenge_id) => {
                staged.challenges.insert(challenge_id, None);
                let mut children: Vec<DeploymentId> = self
                    .get_deployment_by_challenge(challenge_id)?
                    .map(|d| d.deployment_id)
                    .into_iter()
                    .collect();
                children.extend(
                    staged
                        .deployments
                        .values()
                        .flatten()
                        .filter(|d| d.challenge_id == challenge_id)
                        .map(|d| d.deployment_id),
                );
                for deployment_id in children {
                    staged.deployments.insert(deployment_id, None);
                }
            }
        }
        Ok(())
    }

    // =========================================================================
    // Commit: validation
    // =========================================================================

    fn level_exists(&self, staged: &Staged, level_id: LevelId) -> Result<bool> {
        match staged.levels.get(&level_id) {
            Some(entry) => Ok(entry.is_some()),
            None => Ok(self.get_level(level_id)?.is_some()),
        }
    }

    fn challenge_exists(&self, staged: &Staged, challenge_id: ChallengeId) -> Result<bool> {
        match staged.challenges.get(&challenge_id) {
            Some(entry) => Ok(entry.is_some()),
            None => Ok(self.get_challenge(challenge_id)?.is_some()),
        }
    }

    /// Fail if a persisted record other than `id` still claims `key` once the
    /// transaction is applied.
    #[allow(clippy::too_many_arguments)]
    fn ensure_unique<Id, T>(
        &self,
        index: &str,
        key: &[u8],
        id: Id,
        staged: &BTreeMap<Id, Option<T>>,
        decode: fn(u64) -> Id,
        same_key: impl Fn(&T) -> bool,
        describe: impl FnOnce() -> String,
    ) -> Result<()>
    where
        Id: Ord + Copy,
    {
        let Some(owner) = self.index_owner(index, key)?.map(decode) else {
            return Ok(());
        };
        if owner == id {
            return Ok(());
        }
        let still_claims = match staged.get(&owner) {
            None => true,
            Some(None) => false,
            Some(Some(record)) => same_key(record),
        };
        if still_claims {
            Err(StoreError::Conflict(describe()))
        } else {
            Ok(())
        }
    }

    fn validate(&self, staged: &Staged) -> Result<()> {
        let mut level_names: HashMap<&str, LevelId> = HashMap::new();
        for level in staged.levels.values().flatten() {
            if level_names.insert(&level.name, level.level_id).is_some() {
                return Err(StoreError::Conflict(format!("level name {:?}", level.name)));
            }
            self.ensure_unique(
                cf::LEVELS_BY_NAME,
                level.name.as_bytes(),
                level.level_id,
                &staged.levels,
                LevelId::new,
                |other| other.name == level.name,
                || format!("level name {:?}", level.name),
            )?;
        }

        let mut flags: HashMap<&str, ChallengeId> = HashMap::new();
        for challenge in staged.challenges.values().flatten() {
            if !self.level_exists(staged, challenge.level_id)? {
                return Err(StoreError::Integrity(format!(
                    "challenge {} references missing level {}",
                    challenge.challenge_id, challenge.level_id
                )));
            }
            if let Some(flag) = &challenge.flag {
                if flags.insert(flag, challenge.challenge_id).is_some() {
                    return Err(StoreError::Conflict("duplicate challenge flag".into()));
                }
                self.ensure_unique(
                    cf::CHALLENGES_BY_FLAG,
                    flag.as_bytes(),
                    challenge.challenge_id,
                    &staged.challenges,
                    ChallengeId::new,
                    |other| other.flag.as_deref() == Some(flag.as_str()),
                    || "duplicate challenge flag".to_string(),
                )?;
            }
        }

        let mut by_challenge: HashMap<ChallengeId, DeploymentId> = HashMap::new();
        let mut by_vm_id: HashMap<VmId, DeploymentId> = HashMap::new();
        let mut by_vm_name: HashMap<&str, DeploymentId> = HashMap::new();
        for deployment in staged.deployments.values().flatten() {
            let id = deployment.deployment_id;
            if !self.challenge_exists(staged, deployment.challenge_id)? {
                return Err(StoreError::Integrity(format!(
                    "deployment {id} references missing challenge {}",
                    deployment.challenge_id
                )));
            }
            if by_challenge.insert(deployment.challenge_id, id).is_some() {
                return Err(StoreError::Conflict(format!(
                    "challenge {} already has a deployment",
                    deployment.challenge_id
                )));
            }
            if by_vm_id.insert(deployment.vm_id, id).is_some() {
                return Err(StoreError::Conflict(format!("vm id {}", deployment.vm_id)));
            }
            if by_vm_name.insert(&deployment.vm_name, id).is_some() {
                return Err(StoreError::Conflict(format!("vm name {:?}", deployment.vm_name)));
            }
            self.ensure_unique(
                cf::DEPLOYMENTS_BY_CHALLENGE,
                &keys::challenge_key(deployment.challenge_id),
                id,
                &staged.deployments,
                DeploymentId::new,
                |other| other.challenge_id == deployment.challenge_id,
                || format!("challenge {} already has a deployment", deployment.challenge_id),
            )?;
            self.ensure_unique(
                cf::DEPLOYMENTS_BY_VM_ID,
                &keys::vm_id_key(deployment.vm_id),
                id,
                &staged.deployments,
                DeploymentId::new,
                |other| other.vm_id == deployment.vm_id,
                || format!("vm id {}", deployment.vm_id),
            )?;
            self.ensure_unique(
                cf::DEPLOYMENTS_BY_VM_NAME,
                deployment.vm_name.as_bytes(),
                id,
                &staged.deployments,
                DeploymentId::new,
                |other| other.vm_name == deployment.vm_name,
                || format!("vm name {:?}", deployment.vm_name),
            )?;
        }

        Ok(())
    }

    // =========================================================================
    // Commit: write batch
    // =========================================================================

    // Old index entries are removed before any new ones are written, so a key
    // released by one record can be claimed by another in the same batch.

    fn write_levels(&self, batch: &mut WriteBatch, staged: &Staged) -> Result<()> {
        let cf_levels = self.cf(cf::LEVELS)?;
        let cf_by_name = self.cf(cf::LEVELS_BY_NAME)?;

        for level_id in staged.levels.keys() {
            if let Some(old) = self.get_level(*level_id)? {
                batch.delete_cf(&cf_by_name, old.name.as_bytes());
            }
        }
        for (level_id, entry) in &staged.levels {
            let key = keys::level_key(*level_id);
            match entry {
                Some(level) => {
                    batch.put_cf(&cf_levels, &key, Self::serialize(level)?);
                    batch.put_cf(&cf_by_name, level.name.as_bytes(), key.as_slice());
                }
                None => batch.delete_cf(&cf_levels, &key),
            }
        }
        Ok(())
    }

    fn write_challenges(&self, batch: &mut WriteBatch, staged: &Staged) -> Result<()> {
        let cf_challenges = self.cf(cf::CHALLENGES)?;
        let cf_by_level = self.cf(cf::CHALLENGES_BY_LEVEL)?;
        let cf_by_flag = self.cf(cf::CHALLENGES_BY_FLAG)?;

        for challenge_id in staged.challenges.keys() {
            if let Some(old) = self.get_challenge(*challenge_id)? {
                batch.delete_cf(
                    &cf_by_level,
                    keys::level_challenge_key(old.level_id, *challenge_id),
                );
                if let Some(flag) = &old.flag {
                    batch.delete_cf(&cf_by_flag, flag.as_bytes());
                }
            }
        }
        for (challenge_id, entry) in &staged.challenges {
            let key = keys::challenge_key(*challenge_id);
            match entry {
                Some(challenge) => {
                    batch.put_cf(&cf_challenges, &key, Self::serialize(challenge)?);
                    batch.put_cf(
                        &cf_by_level,
                        keys::level_challenge_key(challenge.level_id, *challenge_id),
                        [],
                    );
                    if let Some(flag) = &challenge.flag {
                        batch.put_cf(&cf_by_flag, flag.as_bytes(), key.as_slice());
                    }
                }
                None => batch.delete_cf(&cf_challenges, &key),
            }
        }
        Ok(())
    }

    fn write_deployments(&self, batch: &mut WriteBatch, staged: &Staged) -> Result<()> {
        let cf_deployments = self.cf(cf::DEPLOYMENTS)?;
        let cf_by_challenge = self.cf(cf::DEPLOYMENTS_BY_CHALLENGE)?;
        let cf_by_vm_id = self.cf(cf::DEPLOYMENTS_BY_VM_ID)?;
        let cf_by_vm_name = self.cf(cf::DEPLOYMENTS_BY_VM_NAME)?;

        for deployment_id in staged.deployments.keys() {
            if let Some(old) = self.get_deployment(*deployment_id)? {
                batch.delete_cf(&cf_by_challenge, keys::challenge_key(old.challenge_id));
                batch.delete_cf(&cf_by_vm_id, keys::vm_id_key(old.vm_id));
                batch.delete_cf(&cf_by_vm_name, old.vm_name.as_bytes());
            }
        }
        for (deployment_id, entry) in &staged.deployments {
            let key = keys::deployment_key(*deployment_id);
            match entry {
                Some(deployment) => {
                    batch.put_cf(&cf_deployments, &key, Self::serialize(deployment)?);
                    batch.put_cf(
                        &cf_by_challenge,
                        keys::challenge_key(deployment.challenge_id),
                        key.as_slice(),
                    );
                    batch.put_cf(&cf_by_vm_id, keys::vm_id_key(deployment.vm_id), key.as_slice());
                    batch.put_cf(&cf_by_vm_name, deployment.vm_name.as_bytes(), key.as_slice());
                }
                None => batch.delete_cf(&cf_deployments, &key),
            }
        }
        Ok(())
    }
}

impl Store for RocksStore {
    // =========================================================================
    // Identifiers and Transactions
    // =========================================================================

    fn next_id(&self, sequence: Sequence) -> Result<u64> {
        let _guard = self.sequence_lock.lock();
        let handle = self.cf(cf::SEQUENCES)?;
        let key = keys::sequence_key(sequence.name());

        let current = match self.db.get_cf(&handle, &key)? {
            Some(value) => {
                let bytes: [u8; 8] = value.as_slice().try_into().map_err(|_| {
                    StoreError::Database(format!("malformed sequence {}", sequence.name()))
                })?;
                u64::from_be_bytes(bytes)
            }
            None => 0,
        };
        let next = current + 1;
        self.db.put_cf(&handle, &key, next.to_be_bytes())?;
        Ok(next)
    }

    fn commit(&self, tx: Transaction) -> Result<()> {
        if tx.is_empty() {
            return Ok(());
        }
        let _guard = self.commit_lock.lock();

        let mut staged = Staged::default();
        for op in tx.into_ops() {
            self.stage(&mut staged, op)?;
        }
        self.validate(&staged)?;

        let mut batch = WriteBatch::default();
        self.write_levels(&mut batch, &staged)?;
        self.write_challenges(&mut batch, &staged)?;
        self.write_deployments(&mut batch, &staged)?;
        self.db.write(batch)?;

        tracing::debug!(
            levels = staged.levels.len(),
            challenges = staged.challenges.len(),
            deployments = staged.deployments.len(),
            "Transaction committed"
        );
        Ok(())
    }

    // =========================================================================
    // Level Operations
    // =========================================================================

    fn get_level(&self, level_id: LevelId) -> Result<Option<Level>> {
        self.get_record(cf::LEVELS, &keys::level_key(level_id))
    }

    fn find_level_by_name(&self, name: &str) -> Result<Option<Level>> {
        match self.index_owner(cf::LEVELS_BY_NAME, name.as_bytes())? {
            Some(owner) => self.get_level(LevelId::new(owner)),
            None => Ok(None),
        }
    }

    fn list_levels(&self) -> Result<Vec<Level>> {
        self.list_records(cf::LEVELS)
    }

    // =========================================================================
    // Challenge Operations
    // =========================================================================

    fn get_challenge(&self, challenge_id: ChallengeId) -> Result<Option<Challenge>> {
        self.get_record(cf::CHALLENGES, &keys::challenge_key(challenge_id))
    }

    fn list_challenges(&self) -> Result<Vec<Challenge>> {
        self.list_records(cf::CHALLENGES)
    }

    fn list_challenges_by_level(&self, level_id: LevelId) -> Result<Vec<Challenge>> {
        let cf_by_level = self.cf(cf::CHALLENGES_BY_LEVEL)?;
        let prefix = keys::level_prefix(level_id);

        let mut challenges = Vec::new();
        let iter = self.db.iterator_cf(
            &cf_by_level,
            IteratorMode::From(&prefix, rocksdb::Direction::Forward),
        );

        for item in iter {
            let (key, _) = item?;

            // Stop if we're past the prefix
            if !key.starts_with(&prefix) {
                break;
            }

            let challenge_id = keys::extract_challenge_id(&key)?;
            if let Some(challenge) = self.get_challenge(challenge_id)? {
                challenges.push(challenge);
            }
        }

        Ok(challenges)
    }

    // =========================================================================
    // Deployment Operations
    // =========================================================================

    fn get_deployment(&self, deployment_id: DeploymentId) -> Result<Option<Deployment>> {
        self.get_record(cf::DEPLOYMENTS, &keys::deployment_key(deployment_id))
    }

    fn get_deployment_by_challenge(
        &self,
        challenge_id: ChallengeId,
    ) -> Result<Option<Deployment>> {
        match self.index_owner(cf::DEPLOYMENTS_BY_CHALLENGE, &keys::challenge_key(challenge_id))? {
            Some(owner) => self.get_deployment(DeploymentId::new(owner)),
            None => Ok(None),
        }
    }

    fn find_deployment_by_vm(&self, vm_id: VmId) -> Result<Option<Deployment>> {
        match self.index_owner(cf::DEPLOYMENTS_BY_VM_ID, &keys::vm_id_key(vm_id))? {
            Some(owner) => self.get_deployment(DeploymentId::new(owner)),
            None => Ok(None),
        }
    }

    fn list_deployments(&self) -> Result<Vec<Deployment>> {
        self.list_records(cf::DEPLOYMENTS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Category, DeploymentStatus, Difficulty};
    use chrono::Utc;
    use tempfile::TempDir;

    fn create_test_store() -> (RocksStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = RocksStore::open(dir.path()).unwrap();
        (store, dir)
    }

    fn create_test_level(store: &RocksStore, name: &str) -> Level {
        let now = Utc::now();
        let level = Level {
            level_id: store.next_level_id().unwrap(),
            name: name.to_string(),
            category: Category::Injection,
            difficulty: Difficulty::Easy,
            description: None,
            points: 100,
            template_ref: "ubuntu".to_string(),
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        let mut tx = store.begin();
        tx.put_level(level.clone());
        store.commit(tx).unwrap();
        level
    }

    fn test_challenge(store: &RocksStore, level_id: LevelId, team: &str, flag: &str) -> Challenge {
        let now = Utc::now();
        Challenge {
            challenge_id: store.next_challenge_id().unwrap(),
            level_id,
            team: team.to_string(),
            flag: Some(flag.to_string()),
            flag_submitted: false,
            flag_submitted_at: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    fn test_deployment(
        store: &RocksStore,
        challenge_id: ChallengeId,
        vm_id: u32,
        vm_name: &str,
    ) -> Deployment {
        let now = Utc::now();
        Deployment {
            deployment_id: store.next_deployment_id().unwrap(),
            challenge_id,
            vm_id: VmId::new(vm_id),
            vm_name: vm_name.to_string(),
            vm_ip: None,
            status: DeploymentStatus::Running,
            error_message: None,
            created_at: now,
            started_at: Some(now),
            stopped_at: None,
            terminated_at: None,
            updated_at: now,
        }
    }

    fn commit_pair(store: &RocksStore, challenge: &Challenge, deployment: &Deployment) -> Result<()> {
        let mut tx = store.begin();
        tx.put_challenge(challenge.clone())
            .put_deployment(deployment.clone());
        store.commit(tx)
    }

    #[test]
    fn sequences_are_monotonic_per_entity() {
        let (store, _dir) = create_test_store();
        assert_eq!(store.next_challenge_id().unwrap(), ChallengeId::new(1));
        assert_eq!(store.next_challenge_id().unwrap(), ChallengeId::new(2));
        assert_eq!(store.next_deployment_id().unwrap(), DeploymentId::new(1));
        assert_eq!(store.next_level_id().unwrap(), LevelId::new(1));
    }

    #[test]
    fn sequences_survive_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = RocksStore::open(dir.path()).unwrap();
            store.next_challenge_id().unwrap();
            store.next_challenge_id().unwrap();
        }
        let store = RocksStore::open(dir.path()).unwrap();
        assert_eq!(store.next_challenge_id().unwrap(), ChallengeId::new(3));
    }

    #[test]
    fn challenge_and_deployment_commit_together() {
        let (store, _dir) = create_test_store();
        let level = create_test_level(&store, "sqli-101");
        let challenge = test_challenge(&store, level.level_id, "alpha", "CTF{A}");
        let deployment = test_deployment(&store, challenge.challenge_id, 200, "alpha-1-200");

        commit_pair(&store, &challenge, &deployment).unwrap();

        assert_eq!(store.get_challenge(challenge.challenge_id).unwrap(), Some(challenge.clone()));
        let found = store
            .get_deployment_by_challenge(challenge.challenge_id)
            .unwrap()
            .unwrap();
        assert_eq!(found.deployment_id, deployment.deployment_id);
        assert_eq!(
            store.find_deployment_by_vm(VmId::new(200)).unwrap().unwrap().vm_name,
            "alpha-1-200"
        );
        assert_eq!(store.list_challenges_by_level(level.level_id).unwrap().len(), 1);
    }

    #[test]
    fn rolled_back_transaction_writes_nothing() {
        let (store, _dir) = create_test_store();
        let level = create_test_level(&store, "xss");
        let challenge = test_challenge(&store, level.level_id, "alpha", "CTF{A}");

        let mut tx = store.begin();
        tx.put_challenge(challenge.clone());
        tx.rollback();

        assert!(store.get_challenge(challenge.challenge_id).unwrap().is_none());
        assert!(store.list_challenges().unwrap().is_empty());
    }

    #[test]
    fn duplicate_flag_is_a_conflict_and_writes_nothing() {
        let (store, _dir) = create_test_store();
        let level = create_test_level(&store, "xss");
        let first = test_challenge(&store, level.level_id, "alpha", "CTF{SAME}");
        let first_dep = test_deployment(&store, first.challenge_id, 200, "alpha-1-200");
        commit_pair(&store, &first, &first_dep).unwrap();

        let second = test_challenge(&store, level.level_id, "bravo", "CTF{SAME}");
        let second_dep = test_deployment(&store, second.challenge_id, 201, "bravo-1-201");
        let err = commit_pair(&store, &second, &second_dep).unwrap_err();

        assert!(err.is_conflict());
        assert!(store.get_challenge(second.challenge_id).unwrap().is_none());
        assert!(store.get_deployment(second_dep.deployment_id).unwrap().is_none());
    }

    #[test]
    fn duplicate_vm_id_and_name_are_conflicts() {
        let (store, _dir) = create_test_store();
        let level = create_test_level(&store, "xss");
        let first = test_challenge(&store, level.level_id, "alpha", "CTF{A}");
        let first_dep = test_deployment(&store, first.challenge_id, 200, "alpha-1-200");
        commit_pair(&store, &first, &first_dep).unwrap();

        let second = test_challenge(&store, level.level_id, "bravo", "CTF{B}");
        let same_vmid = test_deployment(&store, second.challenge_id, 200, "bravo-1-200");
        assert!(commit_pair(&store, &second, &same_vmid).unwrap_err().is_conflict());

        let same_name = test_deployment(&store, second.challenge_id, 201, "alpha-1-200");
        assert!(commit_pair(&store, &second, &same_name).unwrap_err().is_conflict());
    }

    #[test]
    fn updating_a_record_keeps_its_own_unique_keys() {
        let (store, _dir) = create_test_store();
        let level = create_test_level(&store, "xss");
        let mut challenge = test_challenge(&store, level.level_id, "alpha", "CTF{A}");
        let mut deployment = test_deployment(&store, challenge.challenge_id, 200, "alpha-1-200");
        commit_pair(&store, &challenge, &deployment).unwrap();

        challenge.flag_submitted = true;
        deployment.status = DeploymentStatus::Stopped;
        commit_pair(&store, &challenge, &deployment).unwrap();

        let stored = store.get_deployment(deployment.deployment_id).unwrap().unwrap();
        assert_eq!(stored.status, DeploymentStatus::Stopped);
        assert!(store.get_challenge(challenge.challenge_id).unwrap().unwrap().flag_submitted);
    }

    #[test]
    fn vm_id_is_reusable_after_owner_releases_it() {
        let (store, _dir) = create_test_store();
        let level = create_test_level(&store, "xss");
        let first = test_challenge(&store, level.level_id, "alpha", "CTF{A}");
        let first_dep = test_deployment(&store, first.challenge_id, 200, "alpha-1-200");
        commit_pair(&store, &first, &first_dep).unwrap();

        // Delete the first challenge and reuse its vm id in the same commit.
        let second = test_challenge(&store, level.level_id, "bravo", "CTF{B}");
        let second_dep = test_deployment(&store, second.challenge_id, 200, "bravo-1-200");
        let mut tx = store.begin();
        tx.delete_challenge(first.challenge_id)
            .put_challenge(second.clone())
            .put_deployment(second_dep.clone());
        store.commit(tx).unwrap();

        assert_eq!(
            store.find_deployment_by_vm(VmId::new(200)).unwrap().unwrap().deployment_id,
            second_dep.deployment_id
        );
    }

    #[test]
    fn deployment_requires_existing_challenge() {
        let (store, _dir) = create_test_store();
        let orphan = test_deployment(&store, ChallengeId::new(99), 200, "ghost-200");
        let mut tx = store.begin();
        tx.put_deployment(orphan);
        assert!(matches!(store.commit(tx), Err(StoreError::Integrity(_))));
    }

    #[test]
    fn challenge_requires_existing_level() {
        let (store, _dir) = create_test_store();
        let orphan = test_challenge(&store, LevelId::new(42), "alpha", "CTF{A}");
        let mut tx = store.begin();
        tx.put_challenge(orphan);
        assert!(matches!(store.commit(tx), Err(StoreError::Integrity(_))));
    }

    #[test]
    fn one_deployment_per_challenge() {
        let (store, _dir) = create_test_store();
        let level = create_test_level(&store, "xss");
        let challenge = test_challenge(&store, level.level_id, "alpha", "CTF{A}");
        let first = test_deployment(&store, challenge.challenge_id, 200, "alpha-1-200");
        commit_pair(&store, &challenge, &first).unwrap();

        let second = test_deployment(&store, challenge.challenge_id, 201, "alpha-1-201");
        let mut tx = store.begin();
        tx.put_deployment(second);
        assert!(store.commit(tx).unwrap_err().is_conflict());
    }

    #[test]
    fn deleting_challenge_cascades_to_deployment() {
        let (store, _dir) = create_test_store();
        let level = create_test_level(&store, "xss");
        let challenge = test_challenge(&store, level.level_id, "alpha", "CTF{A}");
        let deployment = test_deployment(&store, challenge.challenge_id, 200, "alpha-1-200");
        commit_pair(&store, &challenge, &deployment).unwrap();

        let mut tx = store.begin();
        tx.delete_challenge(challenge.challenge_id);
        store.commit(tx).unwrap();

        assert!(store.get_challenge(challenge.challenge_id).unwrap().is_none());
        assert!(store.get_deployment(deployment.deployment_id).unwrap().is_none());
        assert!(store.find_deployment_by_vm(VmId::new(200)).unwrap().is_none());
        assert!(store.list_deployments().unwrap().is_empty());
    }

    #[test]
    fn deleting_level_cascades_to_challenges_and_deployments() {
        let (store, _dir) = create_test_store();
        let level = create_test_level(&store, "xss");
        let other = create_test_level(&store, "ssrf");
        for (i, team) in ["alpha", "bravo"].iter().enumerate() {
            let vmid = 200 + u32::try_from(i).unwrap();
            let challenge = test_challenge(&store, level.level_id, team, &format!("CTF{{{team}}}"));
            let deployment =
                test_deployment(&store, challenge.challenge_id, vmid, &format!("{team}-{vmid}"));
            commit_pair(&store, &challenge, &deployment).unwrap();
        }
        let survivor = test_challenge(&store, other.level_id, "charlie", "CTF{C}");
        let survivor_dep = test_deployment(&store, survivor.challenge_id, 210, "charlie-210");
        commit_pair(&store, &survivor, &survivor_dep).unwrap();

        let mut tx = store.begin();
        tx.delete_level(level.level_id);
        store.commit(tx).unwrap();

        assert!(store.get_level(level.level_id).unwrap().is_none());
        assert!(store.find_level_by_name("xss").unwrap().is_none());
        assert_eq!(store.list_challenges().unwrap().len(), 1);
        assert_eq!(store.list_deployments().unwrap().len(), 1);
        assert!(store.get_challenge(survivor.challenge_id).unwrap().is_some());
    }

    #[test]
    fn level_names_are_unique() {
        let (store, _dir) = create_test_store();
        let level = create_test_level(&store, "xss");
        assert_eq!(
            store.find_level_by_name("xss").unwrap().unwrap().level_id,
            level.level_id
        );

        let mut duplicate = level.clone();
        duplicate.level_id = store.next_level_id().unwrap();
        let mut tx = store.begin();
        tx.put_level(duplicate);
        assert!(store.commit(tx).unwrap_err().is_conflict());

        // Renaming in place is fine and frees the old name.
        let mut renamed = level.clone();
        renamed.name = "stored-xss".to_string();
        let mut tx = store.begin();
        tx.put_level(renamed);
        store.commit(tx).unwrap();
        assert!(store.find_level_by_name("xss").unwrap().is_none());
        assert!(store.find_level_by_name("stored-xss").unwrap().is_some());
    }

    #[test]
    fn empty_commit_is_noop() {
        let (store, _dir) = create_test_store();
        store.commit(store.begin()).unwrap();
        assert!(store.list_levels().unwrap().is_empty());
    }
}
