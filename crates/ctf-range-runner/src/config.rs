//! Runner configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Where playbooks live and how `ansible-playbook` is invoked.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Working directory for runs; per-run artifacts go under `artifacts/`.
    pub private_data_dir: PathBuf,
    /// Directory playbook names are resolved against.
    pub playbook_dir: PathBuf,
    /// The `ansible-playbook` executable.
    pub playbook_bin: PathBuf,
    /// SSH private key passed as `--private-key`.
    pub ssh_private_key: Option<PathBuf>,
    /// Upper bound on a single run, in seconds.
    pub timeout_secs: u64,
    /// Keep playbook output out of the log.
    pub quiet: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            private_data_dir: PathBuf::from("ansible"),
            playbook_dir: PathBuf::from("ansible/playbooks"),
            playbook_bin: PathBuf::from("ansible-playbook"),
            ssh_private_key: None,
            timeout_secs: 600,
            quiet: true,
        }
    }
}

impl RunnerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("ANSIBLE_PRIVATE_DATA_DIR") {
            config.private_data_dir = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("ANSIBLE_PLAYBOOK_DIR") {
            config.playbook_dir = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("ANSIBLE_PLAYBOOK_BIN") {
            config.playbook_bin = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("SSH_PRIVATE_KEY") {
            if !val.is_empty() {
                config.ssh_private_key = Some(PathBuf::from(val));
            }
        }
        if let Ok(val) = std::env::var("ANSIBLE_TIMEOUT_SECS") {
            if let Ok(n) = val.parse() {
                config.timeout_secs = n;
            }
        }
        if let Ok(val) = std::env::var("ANSIBLE_QUIET") {
            config.quiet = !matches!(val.to_ascii_lowercase().as_str(), "0" | "false" | "no");
        }

        config
    }

    /// Run timeout as a `Duration`.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
