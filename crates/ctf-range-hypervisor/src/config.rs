//! Hypervisor connection and provisioning configuration.

use std::fmt;
use std::time::Duration;

use ctf_range_core::VmId;
use serde::Deserialize;

use crate::error::Result;
use crate::types::VmIdRange;

/// Configuration for the Proxmox connection and provisioning behaviour.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct HypervisorConfig {
    /// Host name, address, or full base URL of the Proxmox API.
    pub host: String,
    /// User in `user@realm` form.
    pub user: String,
    /// Password for `user`.
    pub password: String,
    /// Node new VMs are placed on.
    pub node: String,
    /// Verify the API's TLS certificate.
    pub verify_ssl: bool,
    /// First VM identifier the range may use.
    pub starting_vmid: u32,
    /// One past the last VM identifier the range may use.
    pub max_vmid: u32,
    /// Storage for disks and full clones.
    pub storage: String,
    /// Storage holding install media.
    pub iso_storage: String,
    /// Full copies instead of linked clones.
    pub full_clone: bool,
    /// Per-request HTTP timeout in seconds.
    pub request_timeout_secs: u64,
    /// Upper bound on waiting for a single task, in seconds.
    pub task_timeout_secs: u64,
    /// Task polling interval in milliseconds.
    pub task_poll_ms: u64,
}

impl Default for HypervisorConfig {
    fn default() -> Self {
        Self {
            host: "192.168.1.100".to_string(),
            user: "root@pam".to_string(),
            password: String::new(),
            node: "pve".to_string(),
            verify_ssl: false,
            starting_vmid: 200,
            max_vmid: 500,
            storage: "local-lvm".to_string(),
            iso_storage: "local".to_string(),
            full_clone: true,
            request_timeout_secs: 30,
            task_timeout_secs: 300,
            task_poll_ms: 1000,
        }
    }
}

// The password never reaches logs.
impl fmt::Debug for HypervisorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HypervisorConfig")
            .field("host", &self.host)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("node", &self.node)
            .field("verify_ssl", &self.verify_ssl)
            .field("starting_vmid", &self.starting_vmid)
            .field("max_vmid", &self.max_vmid)
            .field("storage", &self.storage)
            .field("iso_storage", &self.iso_storage)
            .field("full_clone", &self.full_clone)
            .finish_non_exhaustive()
    }
}

impl HypervisorConfig {
    /// Load configuration from environment variables, falling back to defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("PROXMOX_HOST") {
            config.host = val;
        }
        if let Ok(val) = std::env::var("PROXMOX_USER") {
            config.user = val;
        }
        if let Ok(val) = std::env::var("PROXMOX_PASSWORD") {
            config.password = val;
        }
        if let Ok(val) = std::env::var("PROXMOX_NODE") {
            config.node = val;
        }
        if let Ok(val) = std::env::var("PROXMOX_VERIFY_SSL") {
            config.verify_ssl = parse_bool(&val).unwrap_or(config.verify_ssl);
        }
        if let Ok(val) = std::env::var("STARTING_VMID") {
            if let Ok(n) = val.parse() {
                config.starting_vmid = n;
            }
        }
        if let Ok(val) = std::env::var("MAX_VMID") {
            if let Ok(n) = val.parse() {
                config.max_vmid = n;
            }
        }
        if let Ok(val) = std::env::var("PROXMOX_STORAGE") {
            config.storage = val;
        }
        if let Ok(val) = std::env::var("PROXMOX_ISO_STORAGE") {
            config.iso_storage = val;
        }
        if let Ok(val) = std::env::var("PROXMOX_FULL_CLONE") {
            config.full_clone = parse_bool(&val).unwrap_or(config.full_clone);
        }
        if let Ok(val) = std::env::var("PROXMOX_REQUEST_TIMEOUT_SECS") {
            if let Ok(n) = val.parse() {
                config.request_timeout_secs = n;
            }
        }
        if let Ok(val) = std::env::var("PROXMOX_TASK_TIMEOUT_SECS") {
            if let Ok(n) = val.parse() {
                config.task_timeout_secs = n;
            }
        }
        if let Ok(val) = std::env::var("PROXMOX_TASK_POLL_MS") {
            if let Ok(n) = val.parse() {
                config.task_poll_ms = n;
            }
        }

        config
    }

    /// Base URL of the JSON API, e.g. `https://192.168.1.100:8006/api2/json`.
    #[must_use]
    pub fn api_base(&self) -> String {
        let host = self.host.trim_end_matches('/');
        if host.starts_with("http://") || host.starts_with("https://") {
            format!("{host}/api2/json")
        } else {
            format!("https://{host}:8006/api2/json")
        }
    }

    /// The configured identifier range.
    ///
    /// # Errors
    ///
    /// Returns an error if `starting_vmid >= max_vmid`.
    pub fn vmid_range(&self) -> Result<VmIdRange> {
        VmIdRange::new(VmId::new(self.starting_vmid), VmId::new(self.max_vmid))
    }

    /// Per-request timeout as a `Duration`.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Task timeout as a `Duration`.
    #[must_use]
    pub const fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }

    /// Task polling interval as a `Duration`.
    #[must_use]
    pub const fn task_poll_interval(&self) -> Duration {
        Duration::from_millis(self.task_poll_ms)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
