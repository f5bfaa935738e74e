//! The hypervisor control-plane contract.
//!
//! [`HypervisorConnector`] establishes sessions, and [`HypervisorSession`]
//! exposes the calls the provisioner needs. The Proxmox client implements
//! both over HTTP. The in-memory mock implements both for tests.

use std::sync::Arc;

use async_trait::async_trait;
use ctf_range_core::VmId;

use crate::error::Result;
use crate::types::{
    CloneSpec, CreateSpec, PowerState, ResourceClass, ResourceSummary, TaskId, TaskState,
    VmConfig, VmSizing,
};

/// Creates authenticated sessions against the control plane.
#[async_trait]
pub trait HypervisorConnector: Send + Sync {
    /// Authenticate and return a new session.
    ///
    /// # Errors
    ///
    /// Returns `HypervisorError::Connection` if the control plane is
    /// unreachable or rejects the credentials.
    async fn connect(&self) -> Result<Arc<dyn HypervisorSession>>;
}

/// An authenticated session against the control plane.
///
/// Lifecycle calls return a [`TaskId`] that can be polled with
/// [`task_status`](Self::task_status).
#[async_trait]
pub trait HypervisorSession: Send + Sync {
    /// Version/identity probe used to validate the session.
    async fn version(&self) -> Result<String>;

    /// List resources of one class on a node.
    async fn list_by_class(&self, node: &str, class: ResourceClass)
        -> Result<Vec<ResourceSummary>>;

    /// Create a blank VM.
    async fn create(&self, node: &str, spec: &CreateSpec) -> Result<TaskId>;

    /// Clone a template VM.
    async fn clone_template(&self, node: &str, spec: &CloneSpec) -> Result<TaskId>;

    /// Apply sizing and network settings to an existing VM.
    async fn configure(&self, node: &str, vmid: VmId, sizing: &VmSizing, net0: &str)
        -> Result<()>;

    /// Power on a VM.
    async fn start(&self, node: &str, vmid: VmId) -> Result<TaskId>;

    /// Power off a VM.
    async fn stop(&self, node: &str, vmid: VmId) -> Result<TaskId>;

    /// Delete a VM and its disks.
    async fn destroy(&self, node: &str, vmid: VmId) -> Result<TaskId>;

    /// Read a VM's configuration.
    ///
    /// Fails with `HypervisorError::NotFound` if the VM does not exist.
    async fn get_config(&self, node: &str, vmid: VmId) -> Result<VmConfig>;

    /// Read a VM's current power state.
    async fn current_status(&self, node: &str, vmid: VmId) -> Result<PowerState>;

    /// Poll an asynchronous task.
    async fn task_status(&self, node: &str, task: &TaskId) -> Result<TaskState>;
}
