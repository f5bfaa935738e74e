//! Types for the runner crate.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Return code reported when a run is killed for exceeding its timeout.
pub const TIMEOUT_RETURN_CODE: i32 = 254;

/// Final status of a playbook run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// The playbook ran to completion.
    Successful,
    /// The playbook ran and reported failures.
    Failed,
    /// The run was killed after the timeout.
    Timeout,
    /// The run could not be attempted (e.g. missing playbook).
    Error,
    /// The executor itself failed.
    Exception,
}

impl RunStatus {
    /// Wire name of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Successful => "successful",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
            Self::Error => "error",
            Self::Exception => "exception",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request to configure one host.
#[derive(Debug, Clone, PartialEq)]
pub struct RunRequest {
    /// Address or name of the target host.
    pub host: String,
    /// Playbook file name, relative to the playbook directory.
    pub playbook: String,
    /// SSH user for the connection.
    pub ssh_user: String,
    /// Host variables merged into the inventory.
    pub extra_vars: BTreeMap<String, Value>,
}

/// Per-host counters from the `PLAY RECAP` block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostStats {
    /// Tasks that succeeded without change.
    pub ok: u32,
    /// Tasks that changed the host.
    pub changed: u32,
    /// Host could not be reached.
    pub unreachable: u32,
    /// Tasks that failed.
    pub failed: u32,
    /// Tasks that were skipped.
    pub skipped: u32,
    /// Failures handled by a rescue block.
    pub rescued: u32,
    /// Failures that were ignored.
    pub ignored: u32,
}

/// Normalized result of a run. Failures are values, not errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOutcome {
    /// True only for status `successful` with return code 0.
    pub success: bool,
    /// Runner status.
    pub status: RunStatus,
    /// Process return code; 1 when the runner did not report one.
    pub return_code: i32,
    /// Recap counters for the target host, when present in the output.
    pub stats: Option<HostStats>,
    /// Captured output, or the error text for exceptions.
    pub raw_output: String,
}

impl RunOutcome {
    /// An outcome for a run that never produced a process result.
    #[must_use]
    pub fn failure(status: RunStatus, message: impl Into<String>) -> Self {
        Self {
            success: false,
            status,
            return_code: 1,
            stats: None,
            raw_output: message.into(),
        }
    }
}

/// Everything an executor needs to run one playbook.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybookJob {
    /// Working directory for the run.
    pub private_data_dir: PathBuf,
    /// Resolved playbook path.
    pub playbook: PathBuf,
    /// Inventory document.
    pub inventory: Value,
    /// SSH private key.
    pub ssh_key: Option<PathBuf>,
    /// Keep output out of the log.
    pub quiet: bool,
}

/// Raw result returned by an executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorReport {
    /// Runner status.
    pub status: RunStatus,
    /// Process return code, if the process exited normally.
    pub return_code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
}
