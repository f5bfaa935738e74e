//! Deployment orchestrator implementation.
//!
//! This module provides the `ChallengeOrchestrator` trait and the
//! `OrchestratorService` implementation that runs the create-challenge saga
//! and handles flag submission and teardown.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use ctf_range_core::{constant_time_eq, ChallengeId, FlagGenerator, LevelId, VmId};
use ctf_range_hypervisor::{
    HypervisorError, PowerState, ProvisionRequest, ProvisionResult, ResourceSummary,
    TemplateSource, VirtualMachineProvisioner, VmIdAllocator, VmSizing,
};
use ctf_range_runner::{ConfigurationRunner, RunRequest};
use ctf_range_store::{
    Challenge, Deployment, DeploymentStatus, Level, Store, DEFAULT_POINTS,
};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, error, info, instrument, warn};

use crate::error::{ControlError, Result};
use crate::lifecycle;
use crate::saga::{self, vm_name, CompensationGuard, SagaState};
use crate::types::{
    ChallengeResult, ChallengeView, ControlConfig, CreateChallengeRequest, HealthReport,
    NewLevel, SubmissionResult, MAX_TEAM_NAME_LEN,
};

/// Trait defining the orchestrator operations.
#[async_trait]
pub trait ChallengeOrchestrator: Send + Sync {
    // =========================================================================
    // Challenge Operations
    // =========================================================================

    /// Provision a VM for a team, plant a fresh flag on it and persist the
    /// challenge and its deployment together.
    ///
    /// Any failure after the VM exists tears it down before the error is
    /// returned. Nothing is persisted unless every step succeeded.
    ///
    /// # Errors
    ///
    /// - `LevelNotFound` / `InvalidRequest` for bad input.
    /// - `ConnectionFailure`, `AllocationExhausted`, `ProvisioningFailure`,
    ///   `ConfigurationFailure`, `PersistenceConflict` or `Timeout` from the saga.
    async fn create_challenge(&self, request: CreateChallengeRequest) -> Result<ChallengeResult>;

    /// Check a candidate flag. The first correct submission stops the VM.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::ChallengeNotFound` if the challenge doesn't exist.
    async fn submit_flag(
        &self,
        challenge_id: ChallengeId,
        candidate: &str,
    ) -> Result<SubmissionResult>;

    /// List every challenge joined with its deployment.
    async fn list_challenges(&self) -> Result<Vec<ChallengeView>>;

    /// Get one challenge joined with its deployment.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::ChallengeNotFound` if the challenge doesn't exist.
    async fn get_challenge(&self, challenge_id: ChallengeId) -> Result<ChallengeView>;

    /// Destroy the challenge's VM and mark its deployment terminated.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::InvalidState` if the deployment cannot be torn
    /// down from its current status.
    async fn terminate_challenge(&self, challenge_id: ChallengeId) -> Result<ChallengeView>;

    /// Reconcile the persisted deployment status with the hypervisor.
    async fn sync_deployment(&self, challenge_id: ChallengeId) -> Result<ChallengeView>;

    // =========================================================================
    // Levels
    // =========================================================================

    /// Create a level.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::PersistenceConflict` if the name is taken.
    async fn create_level(&self, level: NewLevel) -> Result<Level>;

    /// List all levels.
    async fn list_levels(&self) -> Result<Vec<Level>>;

    /// Enable or disable a level for new challenges.
    async fn set_level_active(&self, level_id: LevelId, active: bool) -> Result<Level>;

    // =========================================================================
    // Operational
    // =========================================================================

    /// Raw hypervisor resource listing.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::ConnectionFailure` if the hypervisor is unreachable.
    async fn list_resources(&self) -> Result<Vec<ResourceSummary>>;

    /// Reachability of the store and the hypervisor.
    async fn health(&self) -> HealthReport;
}

/// The orchestrator service.
///
/// Built once at startup with explicit dependencies and shared by every
/// request. Allocation and creation are serialized by `provision_lock`.
/// Submissions are serialized per challenge.
pub struct OrchestratorService<S: Store> {
    store: Arc<S>,
    provisioner: Arc<VirtualMachineProvisioner>,
    allocator: VmIdAllocator,
    runner: Arc<ConfigurationRunner>,
    flags: FlagGenerator,
    config: ControlConfig,
    provision_lock: Mutex<()>,
    submit_locks: ChallengeLocks,
}

/// One async lock per challenge, created on first use.
#[derive(Default)]
struct ChallengeLocks {
    locks: parking_lot::Mutex<HashMap<ChallengeId, Arc<Mutex<()>>>>,
}

impl ChallengeLocks {
    fn get(&self, challenge_id: ChallengeId) -> Arc<Mutex<()>> {
        Arc::clone(self.locks.lock().entry(challenge_id).or_default())
    }
}

impl<S: Store> OrchestratorService<S> {
    /// Create a new orchestrator.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::Internal` if the flag policy cannot produce flags.
    pub fn new(
        store: Arc<S>,
        provisioner: Arc<VirtualMachineProvisioner>,
        allocator: VmIdAllocator,
        runner: Arc<ConfigurationRunner>,
        config: ControlConfig,
    ) -> Result<Self> {
        let flags = FlagGenerator::new(config.flag_policy.clone())
            .map_err(|e| ControlError::Internal(e.to_string()))?;
        Ok(Self {
            store,
            provisioner,
            allocator,
            runner,
            flags,
            config,
            provision_lock: Mutex::new(()),
            submit_locks: ChallengeLocks::default(),
        })
    }

    /// Get a reference to the store.
    #[must_use]
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Get the orchestrator configuration.
    #[must_use]
    pub const fn config(&self) -> &ControlConfig {
        &self.config
    }

    fn require_challenge(&self, challenge_id: ChallengeId) -> Result<Challenge> {
        self.store
            .get_challenge(challenge_id)?
            .ok_or(ControlError::ChallengeNotFound(challenge_id))
    }

    fn view(&self, challenge: &Challenge) -> Result<ChallengeView> {
        let deployment = self.store.get_deployment_by_challenge(challenge.challenge_id)?;
        Ok(ChallengeView::new(challenge, deployment.as_ref()))
    }

    /// VM ids recorded by any deployment. The store keeps them unique for
    /// the lifetime of the record, terminated or not.
    fn reserved_vm_ids(&self) -> Result<HashSet<VmId>> {
        Ok(self
            .store
            .list_deployments()?
            .into_iter()
            .map(|d| d.vm_id)
            .collect())
    }

    /// Allocate an id and create the VM, retrying when the id is taken between
    /// allocation and creation. The returned guard is armed.
    async fn provision(
        &self,
        team: &str,
        level: &Level,
        sizing: VmSizing,
    ) -> Result<(ProvisionResult, CompensationGuard)> {
        let template = TemplateSource::parse(&level.template_ref, &self.provisioner.config().iso_storage);
        let attempts = self.config.allocation_attempts.max(1);
        let _serialized = self.provision_lock.lock().await;

        let mut attempt = 0;
        loop {
            attempt += 1;
            let reserved = self.reserved_vm_ids()?;
            let vmid = self.allocator.allocate(&self.provisioner, &reserved).await?;
            let request = ProvisionRequest {
                vmid,
                name: vm_name(team, level.level_id, vmid),
                template: template.clone(),
                sizing,
                bridge: self.config.network_bridge.clone(),
            };

            let guard = CompensationGuard::arm(Arc::clone(&self.provisioner), vmid);
            let created = timeout(
                self.config.provision_timeout(),
                self.provisioner.create_and_start(&request),
            )
            .await;

            match created {
                Ok(Ok(result)) => return Ok((result, guard)),
                Ok(Err(HypervisorError::Conflict(_))) if attempt < attempts => {
                    // Someone else owns the id now; leave their VM alone.
                    guard.disarm();
                    warn!(vmid = %vmid, attempt, "VM id taken concurrently, reallocating");
                }
                Ok(Err(e)) => {
                    // The provisioner already discarded anything it created.
                    guard.disarm();
                    return Err(e.into());
                }
                Err(_) => {
                    guard.compensate().await;
                    return Err(ControlError::Timeout(format!(
                        "provisioning VM {vmid} exceeded {}s",
                        self.config.provision_timeout_secs
                    )));
                }
            }
        }
    }

    /// Plant the flag and persist both records. Runs after the VM is up.
    async fn configure_and_persist(
        &self,
        team: &str,
        level: &Level,
        provisioned: &ProvisionResult,
        state: &mut SagaState,
    ) -> Result<ChallengeResult> {
        let flag = self.flags.generate();
        let host = provisioned.info.address();

        let mut extra_vars = BTreeMap::new();
        extra_vars.insert("challenge_flag".to_string(), Value::String(flag.clone()));
        extra_vars.insert(
            "flag_path".to_string(),
            Value::String(self.config.flag_path.clone()),
        );
        extra_vars.insert("team_name".to_string(), Value::String(team.to_string()));
        extra_vars.insert("level_id".to_string(), Value::from(level.level_id.get()));
        let run = RunRequest {
            host: host.clone(),
            playbook: self.config.flag_playbook.clone(),
            ssh_user: self.config.ssh_user.clone(),
            extra_vars,
        };

        let outcome = timeout(self.config.configure_timeout(), self.runner.run(&run))
            .await
            .map_err(|_| {
                ControlError::Timeout(format!(
                    "configuring {host} exceeded {}s",
                    self.config.configure_timeout_secs
                ))
            })?;
        if !outcome.success {
            return Err(ControlError::ConfigurationFailure(format!(
                "playbook {} on {host} finished with status {} (rc {})",
                self.config.flag_playbook, outcome.status, outcome.return_code
            )));
        }
        state.advance(DeploymentStatus::Running)?;

        let now = Utc::now();
        let challenge_id = self.store.next_challenge_id()?;
        let deployment_id = self.store.next_deployment_id()?;
        let challenge = Challenge {
            challenge_id,
            level_id: level.level_id,
            team: team.to_string(),
            flag: Some(flag.clone()),
            flag_submitted: false,
            flag_submitted_at: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        let deployment = Deployment {
            deployment_id,
            challenge_id,
            vm_id: provisioned.vmid,
            vm_name: provisioned
                .info
                .name
                .clone()
                .unwrap_or_else(|| vm_name(team, level.level_id, provisioned.vmid)),
            vm_ip: provisioned.info.ip_address.clone(),
            status: state.status(),
            error_message: None,
            created_at: now,
            started_at: Some(now),
            stopped_at: None,
            terminated_at: None,
            updated_at: now,
        };

        let mut tx = self.store.begin();
        tx.put_challenge(challenge).put_deployment(deployment);
        self.store.commit(tx)?;

        Ok(ChallengeResult {
            success: true,
            message: format!("Challenge created for team {team}"),
            challenge_id,
            deployment_id,
            vm_info: provisioned.info.clone(),
            flag,
        })
    }

    /// Stop and destroy the VM of a deployment already in `Terminating`.
    async fn finish_termination(
        &self,
        mut challenge: Challenge,
        mut deployment: Deployment,
    ) -> Result<ChallengeView> {
        let vmid = deployment.vm_id;
        let destroyed = saga::stop_and_destroy(&self.provisioner, vmid).await;
        let now = Utc::now();
        let mut tx = self.store.begin();

        let result = match destroyed {
            Ok(()) => {
                deployment.status =
                    lifecycle::validate_transition(deployment.status, DeploymentStatus::Terminated)?;
                deployment.terminated_at = Some(now);
                challenge.is_active = false;
                challenge.updated_at = now;
                info!(challenge_id = %challenge.challenge_id, vmid = %vmid, "Challenge terminated");
                Ok(())
            }
            Err(e) => {
                deployment.status =
                    lifecycle::validate_transition(deployment.status, DeploymentStatus::Error)?;
                deployment.error_message = Some(e.to_string());
                error!(challenge_id = %challenge.challenge_id, vmid = %vmid, error = %e, "Teardown failed");
                Err(ControlError::from(e))
            }
        };
        deployment.updated_at = now;
        tx.put_challenge(challenge.clone()).put_deployment(deployment.clone());
        self.store.commit(tx)?;

        result.map(|()| ChallengeView::new(&challenge, Some(&deployment)))
    }
}

fn validate_team_name(team_name: &str) -> Result<&str> {
    let team = team_name.trim();
    if team.is_empty() {
        return Err(ControlError::InvalidRequest("team name is required".into()));
    }
    if team.chars().count() > MAX_TEAM_NAME_LEN {
        return Err(ControlError::InvalidRequest(format!(
            "team name must be at most {MAX_TEAM_NAME_LEN} characters"
        )));
    }
    Ok(team)
}

#[async_trait]
impl<S: Store + 'static> ChallengeOrchestrator for OrchestratorService<S> {
    #[instrument(skip(self, request), fields(level_id = %request.level_id, team = %request.team_name.trim()))]
    async fn create_challenge(&self, request: CreateChallengeRequest) -> Result<ChallengeResult> {
        let team = validate_team_name(&request.team_name)?;
        let level = self
            .store
            .get_level(request.level_id)?
            .ok_or(ControlError::LevelNotFound(request.level_id))?;
        if !level.is_active {
            return Err(ControlError::InvalidRequest(format!(
                "level {} is not active",
                level.level_id
            )));
        }
        let sizing = request.sizing.unwrap_or(self.config.default_sizing);

        let mut state = SagaState::new();
        state.advance(DeploymentStatus::Creating)?;

        let (provisioned, guard) = match self.provision(team, &level, sizing).await {
            Ok(created) => created,
            Err(e) => {
                state.fail();
                error!(error = %e, "Provisioning failed");
                return Err(e);
            }
        };

        match self
            .configure_and_persist(team, &level, &provisioned, &mut state)
            .await
        {
            Ok(result) => {
                guard.disarm();
                info!(
                    challenge_id = %result.challenge_id,
                    vmid = %provisioned.vmid,
                    "Challenge created"
                );
                Ok(result)
            }
            Err(e) => {
                state.fail();
                error!(vmid = %guard.vmid(), error = %e, "Challenge saga failed, compensating");
                guard.compensate().await;
                Err(e)
            }
        }
    }

    #[instrument(skip(self, candidate))]
    async fn submit_flag(
        &self,
        challenge_id: ChallengeId,
        candidate: &str,
    ) -> Result<SubmissionResult> {
        let lock = self.submit_locks.get(challenge_id);
        let _serialized = lock.lock().await;
        let mut challenge = self.require_challenge(challenge_id)?;

        let matched = challenge
            .flag
            .as_deref()
            .is_some_and(|flag| constant_time_eq(candidate, flag));
        if !matched {
            info!("Incorrect flag submitted");
            return Ok(SubmissionResult {
                correct: false,
                message: "Incorrect flag".to_string(),
                submitted_at: None,
            });
        }

        if challenge.flag_submitted {
            debug!("Flag already submitted");
            return Ok(SubmissionResult {
                correct: true,
                message: "Flag already submitted".to_string(),
                submitted_at: challenge.flag_submitted_at,
            });
        }

        let now = Utc::now();
        challenge.flag_submitted = true;
        challenge.flag_submitted_at = Some(now);
        challenge.updated_at = now;

        let mut tx = self.store.begin();
        if let Some(mut deployment) = self.store.get_deployment_by_challenge(challenge_id)? {
            if deployment.status == DeploymentStatus::Running {
                match self.provisioner.stop(deployment.vm_id).await {
                    Ok(()) => {
                        deployment.status = lifecycle::validate_transition(
                            deployment.status,
                            DeploymentStatus::Stopped,
                        )?;
                        deployment.stopped_at = Some(now);
                        deployment.updated_at = now;
                        tx.put_deployment(deployment);
                    }
                    Err(e) => {
                        warn!(vmid = %deployment.vm_id, error = %e, "Failed to stop solved challenge VM");
                    }
                }
            }
        }
        tx.put_challenge(challenge);
        self.store.commit(tx)?;

        info!("Correct flag submitted");
        Ok(SubmissionResult {
            correct: true,
            message: "Correct flag".to_string(),
            submitted_at: Some(now),
        })
    }

    async fn list_challenges(&self) -> Result<Vec<ChallengeView>> {
        let deployments: HashMap<ChallengeId, Deployment> = self
            .store
            .list_deployments()?
            .into_iter()
            .map(|d| (d.challenge_id, d))
            .collect();
        Ok(self
            .store
            .list_challenges()?
            .iter()
            .map(|c| ChallengeView::new(c, deployments.get(&c.challenge_id)))
            .collect())
    }

    async fn get_challenge(&self, challenge_id: ChallengeId) -> Result<ChallengeView> {
        let challenge = self.require_challenge(challenge_id)?;
        self.view(&challenge)
    }

    #[instrument(skip(self))]
    async fn terminate_challenge(&self, challenge_id: ChallengeId) -> Result<ChallengeView> {
        let challenge = self.require_challenge(challenge_id)?;
        let Some(mut deployment) = self.store.get_deployment_by_challenge(challenge_id)? else {
            return Err(ControlError::InvalidRequest(format!(
                "challenge {challenge_id} has no deployment"
            )));
        };

        match deployment.status {
            DeploymentStatus::Terminated => {
                debug!("Already terminated");
                return Ok(ChallengeView::new(&challenge, Some(&deployment)));
            }
            // A previous teardown was interrupted; pick it up again.
            DeploymentStatus::Terminating => {}
            from => {
                deployment.status =
                    lifecycle::validate_transition(from, DeploymentStatus::Terminating)?;
                deployment.updated_at = Utc::now();
                let mut tx = self.store.begin();
                tx.put_deployment(deployment.clone());
                self.store.commit(tx)?;
            }
        }

        self.finish_termination(challenge, deployment).await
    }

    #[instrument(skip(self))]
    async fn sync_deployment(&self, challenge_id: ChallengeId) -> Result<ChallengeView> {
        let challenge = self.require_challenge(challenge_id)?;
        let Some(mut deployment) = self.store.get_deployment_by_challenge(challenge_id)? else {
            return Ok(ChallengeView::new(&challenge, None));
        };
        if deployment.status.is_terminal() {
            return Ok(ChallengeView::new(&challenge, Some(&deployment)));
        }

        let now = Utc::now();
        let mut changed = false;
        let next = match self.provisioner.get_info(deployment.vm_id).await {
            Ok(info) => {
                if info.ip_address.is_some() && info.ip_address != deployment.vm_ip {
                    deployment.vm_ip = info.ip_address.clone();
                    changed = true;
                }
                match (deployment.status, info.status) {
                    (DeploymentStatus::Running, Some(PowerState::Stopped)) => {
                        deployment.stopped_at = Some(now);
                        Some(DeploymentStatus::Stopped)
                    }
                    _ => None,
                }
            }
            Err(HypervisorError::NotFound(_)) => {
                if deployment.status == DeploymentStatus::Terminating {
                    deployment.terminated_at = Some(now);
                    Some(DeploymentStatus::Terminated)
                } else {
                    deployment.error_message = Some("resource disappeared".to_string());
                    Some(DeploymentStatus::Error)
                }
            }
            Err(e) => return Err(e.into()),
        };

        if let Some(to) = next {
            let from = deployment.status;
            deployment.status = lifecycle::validate_transition(from, to)?;
            changed = true;
            info!(vmid = %deployment.vm_id, from = ?from, to = ?to, "Deployment reconciled");
        }
        if changed {
            deployment.updated_at = now;
            let mut tx = self.store.begin();
            tx.put_deployment(deployment.clone());
            self.store.commit(tx)?;
        }

        Ok(ChallengeView::new(&challenge, Some(&deployment)))
    }

    #[instrument(skip(self, level), fields(name = %level.name))]
    async fn create_level(&self, level: NewLevel) -> Result<Level> {
        let name = level.name.trim();
        if name.is_empty() {
            return Err(ControlError::InvalidRequest("level name is required".into()));
        }
        let template_ref = level.template_ref.trim();
        if template_ref.is_empty() {
            return Err(ControlError::InvalidRequest("template_ref is required".into()));
        }

        let now = Utc::now();
        let record = Level {
            level_id: self.store.next_level_id()?,
            name: name.to_string(),
            category: level.category,
            difficulty: level.difficulty,
            description: level.description,
            points: level.points.unwrap_or(DEFAULT_POINTS),
            template_ref: template_ref.to_string(),
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        let mut tx = self.store.begin();
        tx.put_level(record.clone());
        self.store.commit(tx)?;

        info!(level_id = %record.level_id, "Level created");
        Ok(record)
    }

    async fn list_levels(&self) -> Result<Vec<Level>> {
        Ok(self.store.list_levels()?)
    }

    async fn set_level_active(&self, level_id: LevelId, active: bool) -> Result<Level> {
        let mut level = self
            .store
            .get_level(level_id)?
            .ok_or(ControlError::LevelNotFound(level_id))?;
        if level.is_active != active {
            level.is_active = active;
            level.updated_at = Utc::now();
            let mut tx = self.store.begin();
            tx.put_level(level.clone());
            self.store.commit(tx)?;
        }
        Ok(level)
    }

    async fn list_resources(&self) -> Result<Vec<ResourceSummary>> {
        Ok(self.provisioner.list_resources().await?)
    }

    async fn health(&self) -> HealthReport {
        let database = self.store.list_levels().is_ok();
        let (hypervisor, hypervisor_version) = match self.provisioner.version().await {
            Ok(version) => (true, Some(version)),
            Err(e) => {
                warn!(error = %e, "Hypervisor health probe failed");
                (false, None)
            }
        };
        HealthReport {
            database,
            hypervisor,
            hypervisor_version,
        }
    }
}
