//! Types for the hypervisor crate.

use ctf_range_core::VmId;
use serde::{Deserialize, Serialize};

use crate::error::{HypervisorError, Result};

/// The hypervisor's distinction between full VMs and containers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceClass {
    /// Full virtual machine (`qemu`).
    Vm,
    /// Lightweight container (`lxc`).
    Container,
}

impl ResourceClass {
    /// Every class, in listing order.
    pub const ALL: [Self; 2] = [Self::Vm, Self::Container];

    /// Path segment used by the Proxmox API.
    #[must_use]
    pub const fn api_path(self) -> &'static str {
        match self {
            Self::Vm => "qemu",
            Self::Container => "lxc",
        }
    }
}

/// Power state reported by the hypervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PowerState {
    /// Guest is running.
    Running,
    /// Guest is powered off.
    Stopped,
    /// Guest is suspended or in a state we don't model.
    #[default]
    Unknown,
}

impl PowerState {
    /// Parse a Proxmox status string.
    #[must_use]
    pub fn from_api(status: &str) -> Self {
        match status {
            "running" => Self::Running,
            "stopped" => Self::Stopped,
            _ => Self::Unknown,
        }
    }
}

/// One entry of a resource listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSummary {
    /// Hypervisor identifier.
    pub vmid: VmId,
    /// Resource name, if set.
    pub name: Option<String>,
    /// Power state.
    pub status: PowerState,
    /// VM or container.
    pub class: ResourceClass,
}

/// CPU, memory and disk sizing for a new VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmSizing {
    /// Virtual CPU cores.
    pub cores: u32,
    /// Memory in MiB.
    pub memory_mb: u32,
    /// Root disk size in GiB (ignored for clones).
    pub disk_gb: u32,
}

impl Default for VmSizing {
    fn default() -> Self {
        Self {
            cores: 1,
            memory_mb: 512,
            disk_gb: 10,
        }
    }
}

/// Where a new VM comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum TemplateSource {
    /// Clone an existing template VM.
    Clone(VmId),
    /// Create a blank VM booting from this install media volume.
    InstallMedia(String),
}

impl TemplateSource {
    /// Interpret a level's template reference.
    ///
    /// A decimal number is a template VMID. A value containing `:` is a full
    /// volume id. Anything else names an ISO on `iso_storage`.
    #[must_use]
    pub fn parse(template_ref: &str, iso_storage: &str) -> Self {
        let template_ref = template_ref.trim();
        if let Ok(vmid) = template_ref.parse::<VmId>() {
            return Self::Clone(vmid);
        }
        if template_ref.contains(':') {
            return Self::InstallMedia(template_ref.to_string());
        }
        let file = if template_ref.ends_with(".iso") {
            template_ref.to_string()
        } else {
            format!("{template_ref}.iso")
        };
        Self::InstallMedia(format!("{iso_storage}:iso/{file}"))
    }
}

/// Parameters of a blank VM creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateSpec {
    /// Identifier to create.
    pub vmid: VmId,
    /// Resource name.
    pub name: String,
    /// Sizing.
    pub sizing: VmSizing,
    /// `net0` device string.
    pub net0: String,
    /// Install media volume.
    pub install_media: String,
    /// Storage for the root disk.
    pub storage: String,
}

/// Parameters of a template clone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloneSpec {
    /// Template to clone.
    pub template: VmId,
    /// Identifier of the clone.
    pub vmid: VmId,
    /// Resource name of the clone.
    pub name: String,
    /// Node the clone is placed on.
    pub target_node: String,
    /// Target storage for full clones.
    pub storage: Option<String>,
    /// Full copy instead of a linked clone.
    pub full: bool,
}

/// Handle of an asynchronous hypervisor task (a Proxmox UPID).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Progress of an asynchronous task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState {
    /// Still running.
    Running,
    /// Finished with exit status OK.
    Succeeded,
    /// Finished with any other exit status.
    Failed(String),
}

/// The subset of a VM's configuration the range cares about.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmConfig {
    /// Resource name.
    pub name: Option<String>,
    /// Memory in MiB.
    pub memory_mb: Option<u32>,
    /// Virtual CPU cores.
    pub cores: Option<u32>,
    /// `net0` device string.
    pub net0: Option<String>,
    /// Static address from cloud-init `ipconfig0`, without prefix length.
    pub ip_address: Option<String>,
}

/// Live information about a provisioned resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceInfo {
    /// Hypervisor identifier.
    pub vmid: VmId,
    /// Resource name.
    pub name: Option<String>,
    /// Power state, when the hypervisor reported it.
    pub status: Option<PowerState>,
    /// Memory in MiB.
    pub memory_mb: Option<u32>,
    /// Virtual CPU cores.
    pub cores: Option<u32>,
    /// `net0` device string.
    pub net0: Option<String>,
    /// Configured address, if any.
    pub ip_address: Option<String>,
}

impl ResourceInfo {
    /// Combine a configuration read with an optional power-state probe.
    #[must_use]
    pub fn from_config(vmid: VmId, config: VmConfig, status: Option<PowerState>) -> Self {
        Self {
            vmid,
            name: config.name,
            status,
            memory_mb: config.memory_mb,
            cores: config.cores,
            net0: config.net0,
            ip_address: config.ip_address,
        }
    }

    /// Host to reach the VM at: its configured address, else its name.
    #[must_use]
    pub fn address(&self) -> String {
        self.ip_address
            .clone()
            .or_else(|| self.name.clone())
            .unwrap_or_else(|| self.vmid.to_string())
    }
}

/// Request to create and start one VM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionRequest {
    /// Identifier reserved by the allocator.
    pub vmid: VmId,
    /// Resource name.
    pub name: String,
    /// Template to build from.
    pub template: TemplateSource,
    /// Sizing.
    pub sizing: VmSizing,
    /// Network bridge for `net0`.
    pub bridge: String,
}

impl ProvisionRequest {
    /// The `net0` device string for this request.
    #[must_use]
    pub fn net0(&self) -> String {
        format!("virtio,bridge={}", self.bridge)
    }
}

/// Outcome of a successful create-and-start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionResult {
    /// Identifier of the running VM.
    pub vmid: VmId,
    /// Live information read back after start.
    pub info: ResourceInfo,
}

/// A half-open range `[start, max)` of VM identifiers the range may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmIdRange {
    start: VmId,
    max: VmId,
}

impl VmIdRange {
    /// Create a range.
    ///
    /// # Errors
    ///
    /// Returns `HypervisorError::Config` if the range is empty.
    pub fn new(start: VmId, max: VmId) -> Result<Self> {
        if start >= max {
            return Err(HypervisorError::Config(format!(
                "empty VM id range [{start}, {max})"
            )));
        }
        Ok(Self { start, max })
    }

    /// First identifier of the range.
    #[must_use]
    pub const fn start(&self) -> VmId {
        self.start
    }

    /// One past the last identifier of the range.
    #[must_use]
    pub const fn max(&self) -> VmId {
        self.max
    }

    /// Returns true if `vmid` lies in the range.
    #[must_use]
    pub fn contains(&self, vmid: VmId) -> bool {
        self.start <= vmid && vmid < self.max
    }

    /// Identifiers in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = VmId> {
        (self.start.get()..self.max.get()).map(VmId::new)
    }
}
