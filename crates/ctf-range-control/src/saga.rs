//! Saga helpers: compensation, in-flight status tracking and VM naming.

use std::sync::Arc;

use ctf_range_core::{LevelId, VmId};
use ctf_range_hypervisor::{HypervisorError, VirtualMachineProvisioner};
use ctf_range_store::DeploymentStatus;
use tracing::{debug, error, warn};

use crate::error::Result;
use crate::lifecycle;

/// Longest team slug used in VM names.
const MAX_SLUG_LEN: usize = 40;

/// Tears down a VM unless disarmed.
///
/// Armed as soon as a VM may exist. Explicit failure paths call
/// [`compensate`](Self::compensate) and await it. If the saga future is
/// dropped instead (client went away, timeout), `Drop` spawns the same
/// teardown on the current runtime.
#[must_use = "dropping an armed guard tears the VM down"]
pub struct CompensationGuard {
    provisioner: Option<Arc<VirtualMachineProvisioner>>,
    vmid: VmId,
}

impl CompensationGuard {
    /// Arm a guard for `vmid`.
    pub fn arm(provisioner: Arc<VirtualMachineProvisioner>, vmid: VmId) -> Self {
        Self {
            provisioner: Some(provisioner),
            vmid,
        }
    }

    /// The guarded VM.
    #[must_use]
    pub const fn vmid(&self) -> VmId {
        self.vmid
    }

    /// Keep the VM: the saga succeeded, or the VM was never ours.
    pub fn disarm(mut self) {
        self.provisioner = None;
    }

    /// Tear the VM down now.
    pub async fn compensate(mut self) {
        if let Some(provisioner) = self.provisioner.take() {
            teardown(&provisioner, self.vmid).await;
        }
    }
}

impl Drop for CompensationGuard {
    fn drop(&mut self) {
        let Some(provisioner) = self.provisioner.take() else {
            return;
        };
        let vmid = self.vmid;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(vmid = %vmid, "Saga abandoned, compensating in background");
                handle.spawn(async move { teardown(&provisioner, vmid).await });
            }
            Err(_) => error!(vmid = %vmid, "Saga abandoned outside a runtime, VM leaked"),
        }
    }
}

/// Stop a VM and then destroy it. A VM that is already gone counts as
/// destroyed. A failed stop is logged; the destroy decides the outcome.
///
/// # Errors
///
/// Returns the destroy error, e.g. when the node refuses to remove a guest
/// that is still running.
pub async fn stop_and_destroy(
    provisioner: &VirtualMachineProvisioner,
    vmid: VmId,
) -> ctf_range_hypervisor::Result<()> {
    match provisioner.stop(vmid).await {
        Ok(()) => {}
        Err(HypervisorError::NotFound(_)) => debug!(vmid = %vmid, "Nothing to stop"),
        Err(e) => warn!(vmid = %vmid, error = %e, "Stop before destroy failed"),
    }
    provisioner.destroy(vmid).await
}

/// Best-effort [`stop_and_destroy`]. Failures are logged and swallowed.
pub async fn teardown(provisioner: &VirtualMachineProvisioner, vmid: VmId) {
    match stop_and_destroy(provisioner, vmid).await {
        Ok(()) => debug!(vmid = %vmid, "Compensation destroyed VM"),
        Err(e) => error!(vmid = %vmid, error = %e, "Compensation destroy failed"),
    }
}

/// In-memory status of a deployment that has not been persisted yet.
#[derive(Debug)]
pub struct SagaState {
    status: DeploymentStatus,
}

impl Default for SagaState {
    fn default() -> Self {
        Self {
            status: DeploymentStatus::Pending,
        }
    }
}

impl SagaState {
    /// Start in `Pending`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current status.
    #[must_use]
    pub const fn status(&self) -> DeploymentStatus {
        self.status
    }

    /// Move to `to` if the state machine allows it.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::InvalidState` otherwise.
    pub fn advance(&mut self, to: DeploymentStatus) -> Result<()> {
        let from = self.status;
        self.status = lifecycle::validate_transition(from, to)?;
        debug!(from = ?from, to = ?to, "Deployment status advanced");
        Ok(())
    }

    /// Record a failure. Returns false if the current state cannot fail.
    pub fn fail(&mut self) -> bool {
        self.advance(DeploymentStatus::Error).is_ok()
    }
}

/// DNS-safe slug of a team name: lowercase ASCII alphanumerics, with every
/// other run of characters collapsed to a single `-`.
#[must_use]
pub fn team_slug(team: &str) -> String {
    let mut slug = String::with_capacity(team.len());
    let mut pending_dash = false;
    for c in team.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    slug.truncate(MAX_SLUG_LEN);
    let slug = slug.trim_end_matches('-');
    if slug.is_empty() {
        "team".to_string()
    } else {
        slug.to_string()
    }
}

/// Name of a challenge VM: `{team-slug}-{level}-{vmid}`.
#[must_use]
pub fn vm_name(team: &str, level_id: LevelId, vmid: VmId) -> String {
    format!("{}-{level_id}-{vmid}", team_slug(team))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctf_range_hypervisor::{HypervisorConfig, MockHypervisor, PowerState};

    fn provisioner(mock: &MockHypervisor) -> Arc<VirtualMachineProvisioner> {
        let config = HypervisorConfig {
            task_poll_ms: 1,
            ..HypervisorConfig::default()
        };
        Arc::new(VirtualMachineProvisioner::new(Arc::new(mock.clone()), config))
    }

    #[test]
    fn slugs() {
        assert_eq!(team_slug("Alpha"), "alpha");
        assert_eq!(team_slug("  Red Team #1 "), "red-team-1");
        assert_eq!(team_slug("über__hax"), "ber-hax");
        assert_eq!(team_slug("!!!"), "team");
        assert_eq!(vm_name("Alpha", LevelId::new(1), VmId::new(200)), "alpha-1-200");
    }

    #[test]
    fn long_slugs_are_truncated() {
        let slug = team_slug(&"a".repeat(100));
        assert_eq!(slug.len(), MAX_SLUG_LEN);
    }

    #[test]
    fn saga_state_walks_the_machine() {
        let mut state = SagaState::new();
        state.advance(DeploymentStatus::Creating).unwrap();
        assert!(state.advance(DeploymentStatus::Stopped).is_err());
        assert_eq!(state.status(), DeploymentStatus::Creating);
        assert!(state.fail());
        assert_eq!(state.status(), DeploymentStatus::Error);
        assert!(!state.fail());
    }

    #[tokio::test]
    async fn compensate_stops_and_destroys() {
        let mock = MockHypervisor::new().with_vm(VmId::new(200), "alpha-1-200", PowerState::Running);
        let guard = CompensationGuard::arm(provisioner(&mock), VmId::new(200));
        guard.compensate().await;
        assert_eq!(mock.stopped(), vec![VmId::new(200)]);
        assert_eq!(mock.destroyed(), vec![VmId::new(200)]);
    }

    #[tokio::test]
    async fn disarmed_guard_leaves_vm_alone() {
        let mock = MockHypervisor::new().with_vm(VmId::new(200), "alpha-1-200", PowerState::Running);
        let guard = CompensationGuard::arm(provisioner(&mock), VmId::new(200));
        guard.disarm();
        tokio::task::yield_now().await;
        assert!(mock.vm(VmId::new(200)).is_some());
    }

    #[tokio::test]
    async fn dropped_guard_compensates_in_background() {
        let mock = MockHypervisor::new().with_vm(VmId::new(200), "alpha-1-200", PowerState::Running);
        {
            let _guard = CompensationGuard::arm(provisioner(&mock), VmId::new(200));
        }
        for _ in 0..100 {
            if mock.vm(VmId::new(200)).is_none() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert!(mock.vm(VmId::new(200)).is_none());
    }
}
