//! In-memory hypervisor for tests.
//!
//! [`MockHypervisor`] implements both [`HypervisorConnector`] and
//! [`HypervisorSession`]. Tasks complete immediately. Failure switches let
//! tests drive every error path of the provisioner and the saga.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ctf_range_core::VmId;
use parking_lot::Mutex;

use crate::api::{HypervisorConnector, HypervisorSession};
use crate::error::{HypervisorError, Result};
use crate::types::{
    CloneSpec, CreateSpec, PowerState, ResourceClass, ResourceSummary, TaskId, TaskState,
    VmConfig, VmSizing,
};

/// A resource held by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockVm {
    /// Resource name.
    pub name: String,
    /// VM or container.
    pub class: ResourceClass,
    /// Power state.
    pub power: PowerState,
    /// Virtual CPU cores.
    pub cores: u32,
    /// Memory in MiB.
    pub memory_mb: u32,
    /// `net0` device string.
    pub net0: String,
    /// Configured address.
    pub ip_address: String,
}

impl MockVm {
    fn new(vmid: VmId, name: &str, class: ResourceClass, power: PowerState) -> Self {
        let sizing = VmSizing::default();
        let n = vmid.get();
        Self {
            name: name.to_string(),
            class,
            power,
            cores: sizing.cores,
            memory_mb: sizing.memory_mb,
            net0: "virtio,bridge=vmbr0".to_string(),
            ip_address: format!("10.10.{}.{}", n / 256, n % 256),
        }
    }
}

#[derive(Default)]
struct MockState {
    vms: BTreeMap<VmId, MockVm>,
    failing_classes: HashSet<ResourceClass>,
    connect_failures: usize,
    create_conflicts: usize,
    fail_version: bool,
    fail_start: bool,
    fail_stop: bool,
    stalled_stops: HashMap<VmId, Duration>,
    drop_connection: bool,
    connects: usize,
    created: Vec<VmId>,
    started: Vec<VmId>,
    stopped: Vec<VmId>,
    destroyed: Vec<VmId>,
}

/// Shared-state mock hypervisor. Clones observe the same state.
#[derive(Clone, Default)]
pub struct MockHypervisor {
    state: Arc<Mutex<MockState>>,
}

impl MockHypervisor {
    /// An empty hypervisor that accepts every call.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a VM.
    #[must_use]
    pub fn with_vm(self, vmid: VmId, name: &str, power: PowerState) -> Self {
        self.state
            .lock()
            .vms
            .insert(vmid, MockVm::new(vmid, name, ResourceClass::Vm, power));
        self
    }

    /// Seed a running container.
    #[must_use]
    pub fn with_container(self, vmid: VmId, name: &str) -> Self {
        self.state.lock().vms.insert(
            vmid,
            MockVm::new(vmid, name, ResourceClass::Container, PowerState::Running),
        );
        self
    }

    /// Fail the next `n` connects.
    pub fn fail_connects(&self, n: usize) {
        self.state.lock().connect_failures = n;
    }

    /// Fail the version probe.
    pub fn fail_version(&self, fail: bool) {
        self.state.lock().fail_version = fail;
    }

    /// Fail every start command.
    pub fn fail_start(&self, fail: bool) {
        self.state.lock().fail_start = fail;
    }

    /// Fail every stop command.
    pub fn fail_stop(&self, fail: bool) {
        self.state.lock().fail_stop = fail;
    }

    /// Hold every stop command for `vmid` for `delay` before it is accepted.
    pub fn stall_stop(&self, vmid: VmId, delay: Duration) {
        self.state.lock().stalled_stops.insert(vmid, delay);
    }

    /// Fail listings of one resource class.
    pub fn fail_listing(&self, class: ResourceClass, fail: bool) {
        let mut state = self.state.lock();
        if fail {
            state.failing_classes.insert(class);
        } else {
            state.failing_classes.remove(&class);
        }
    }

    /// Let the next `n` creates lose a race: a foreign VM appears at the
    /// requested id and the create is rejected with a conflict.
    pub fn conflict_on_create(&self, n: usize) {
        self.state.lock().create_conflicts = n;
    }

    /// Make every session call fail with a connection error.
    pub fn drop_connection(&self, drop: bool) {
        self.state.lock().drop_connection = drop;
    }

    /// Change a VM's power state behind the provisioner's back.
    pub fn set_power(&self, vmid: VmId, power: PowerState) {
        if let Some(vm) = self.state.lock().vms.get_mut(&vmid) {
            vm.power = power;
        }
    }

    /// Delete a VM behind the provisioner's back.
    pub fn remove_vm(&self, vmid: VmId) {
        self.state.lock().vms.remove(&vmid);
    }

    /// Current state of a VM.
    #[must_use]
    pub fn vm(&self, vmid: VmId) -> Option<MockVm> {
        self.state.lock().vms.get(&vmid).cloned()
    }

    /// Number of connect attempts.
    #[must_use]
    pub fn connects(&self) -> usize {
        self.state.lock().connects
    }

    /// Ids created or cloned, in order.
    #[must_use]
    pub fn created(&self) -> Vec<VmId> {
        self.state.lock().created.clone()
    }

    /// Ids started, in order.
    #[must_use]
    pub fn started(&self) -> Vec<VmId> {
        self.state.lock().started.clone()
    }

    /// Ids stopped, in order.
    #[must_use]
    pub fn stopped(&self) -> Vec<VmId> {
        self.state.lock().stopped.clone()
    }

    /// Ids destroyed, in order.
    #[must_use]
    pub fn destroyed(&self) -> Vec<VmId> {
        self.state.lock().destroyed.clone()
    }

    fn check_connection(state: &MockState) -> Result<()> {
        if state.drop_connection {
            return Err(HypervisorError::Connection("connection reset by peer".into()));
        }
        Ok(())
    }

    fn claim(state: &mut MockState, vmid: VmId, vm: MockVm) -> Result<TaskId> {
        if state.create_conflicts > 0 {
            state.create_conflicts -= 1;
            state.vms.insert(
                vmid,
                MockVm::new(vmid, "foreign", ResourceClass::Vm, PowerState::Running),
            );
            return Err(HypervisorError::Conflict(vmid));
        }
        if state.vms.contains_key(&vmid) {
            return Err(HypervisorError::Conflict(vmid));
        }
        state.vms.insert(vmid, vm);
        state.created.push(vmid);
        Ok(task("create", vmid))
    }
}

fn task(kind: &str, vmid: VmId) -> TaskId {
    TaskId(format!("UPID:mock:{kind}:{vmid}"))
}

#[async_trait]
impl HypervisorConnector for MockHypervisor {
    async fn connect(&self) -> Result<Arc<dyn HypervisorSession>> {
        let mut state = self.state.lock();
        state.connects += 1;
        if state.connect_failures > 0 {
            state.connect_failures -= 1;
            return Err(HypervisorError::Connection("connection refused".into()));
        }
        Self::check_connection(&state)?;
        Ok(Arc::new(self.clone()))
    }
}

#[async_trait]
impl HypervisorSession for MockHypervisor {
    async fn version(&self) -> Result<String> {
        let state = self.state.lock();
        Self::check_connection(&state)?;
        if state.fail_version {
            return Err(HypervisorError::Connection("version probe rejected".into()));
        }
        Ok("8.2.4-mock".to_string())
    }

    async fn list_by_class(
        &self,
        _node: &str,
        class: ResourceClass,
    ) -> Result<Vec<ResourceSummary>> {
        let state = self.state.lock();
        Self::check_connection(&state)?;
        if state.failing_classes.contains(&class) {
            return Err(HypervisorError::NodeOperation(format!(
                "listing {} failed",
                class.api_path()
            )));
        }
        Ok(state
            .vms
            .iter()
            .filter(|(_, vm)| vm.class == class)
            .map(|(vmid, vm)| ResourceSummary {
                vmid: *vmid,
                name: Some(vm.name.clone()),
                status: vm.power,
                class,
            })
            .collect())
    }

    async fn create(&self, _node: &str, spec: &CreateSpec) -> Result<TaskId> {
        let mut state = self.state.lock();
        Self::check_connection(&state)?;
        let mut vm = MockVm::new(spec.vmid, &spec.name, ResourceClass::Vm, PowerState::Stopped);
        vm.cores = spec.sizing.cores;
        vm.memory_mb = spec.sizing.memory_mb;
        vm.net0.clone_from(&spec.net0);
        Self::claim(&mut state, spec.vmid, vm)
    }

    async fn clone_template(&self, _node: &str, spec: &CloneSpec) -> Result<TaskId> {
        let mut state = self.state.lock();
        Self::check_connection(&state)?;
        let template = state
            .vms
            .get(&spec.template)
            .cloned()
            .ok_or(HypervisorError::NotFound(spec.template))?;
        let mut vm = MockVm::new(spec.vmid, &spec.name, ResourceClass::Vm, PowerState::Stopped);
        vm.cores = template.cores;
        vm.memory_mb = template.memory_mb;
        Self::claim(&mut state, spec.vmid, vm)
    }

    async fn configure(
        &self,
        _node: &str,
        vmid: VmId,
        sizing: &VmSizing,
        net0: &str,
    ) -> Result<()> {
        let mut state = self.state.lock();
        Self::check_connection(&state)?;
        let vm = state
            .vms
            .get_mut(&vmid)
            .ok_or(HypervisorError::NotFound(vmid))?;
        vm.cores = sizing.cores;
        vm.memory_mb = sizing.memory_mb;
        vm.net0 = net0.to_string();
        Ok(())
    }

    async fn start(&self, _node: &str, vmid: VmId) -> Result<TaskId> {
        let mut state = self.state.lock();
        Self::check_connection(&state)?;
        if state.fail_start {
            return Err(HypervisorError::NodeOperation(format!(
                "start of {vmid} failed: kvm: cannot allocate memory"
            )));
        }
        let vm = state
            .vms
            .get_mut(&vmid)
            .ok_or(HypervisorError::NotFound(vmid))?;
        vm.power = PowerState::Running;
        state.started.push(vmid);
        Ok(task("qmstart", vmid))
    }

    async fn stop(&self, _node: &str, vmid: VmId) -> Result<TaskId> {
        let stall = self.state.lock().stalled_stops.get(&vmid).copied();
        if let Some(delay) = stall {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state.lock();
        Self::check_connection(&state)?;
        if state.fail_stop {
            return Err(HypervisorError::NodeOperation(format!(
                "stop of {vmid} failed: timeout waiting on systemd"
            )));
        }
        let vm = state
            .vms
            .get_mut(&vmid)
            .ok_or(HypervisorError::NotFound(vmid))?;
        vm.power = PowerState::Stopped;
        state.stopped.push(vmid);
        Ok(task("qmstop", vmid))
    }

    async fn destroy(&self, _node: &str, vmid: VmId) -> Result<TaskId> {
        let mut state = self.state.lock();
        Self::check_connection(&state)?;
        match state.vms.get(&vmid) {
            None => return Err(HypervisorError::NotFound(vmid)),
            Some(vm) if vm.power == PowerState::Running => {
                return Err(HypervisorError::NodeOperation(format!(
                    "VM {vmid} is running - destroy failed"
                )));
            }
            Some(_) => {}
        }
        state.vms.remove(&vmid);
        state.destroyed.push(vmid);
        Ok(task("qmdestroy", vmid))
    }

    async fn get_config(&self, _node: &str, vmid: VmId) -> Result<VmConfig> {
        let state = self.state.lock();
        Self::check_connection(&state)?;
        let vm = state.vms.get(&vmid).ok_or(HypervisorError::NotFound(vmid))?;
        Ok(VmConfig {
            name: Some(vm.name.clone()),
            memory_mb: Some(vm.memory_mb),
            cores: Some(vm.cores),
            net0: Some(vm.net0.clone()),
            ip_address: Some(vm.ip_address.clone()),
        })
    }

    async fn current_status(&self, _node: &str, vmid: VmId) -> Result<PowerState> {
        let state = self.state.lock();
        Self::check_connection(&state)?;
        state
            .vms
            .get(&vmid)
            .map(|vm| vm.power)
            .ok_or(HypervisorError::NotFound(vmid))
    }

    async fn task_status(&self, _node: &str, _task: &TaskId) -> Result<TaskState> {
        let state = self.state.lock();
        Self::check_connection(&state)?;
        Ok(TaskState::Succeeded)
    }
}
