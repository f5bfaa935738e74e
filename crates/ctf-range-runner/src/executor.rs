//! Playbook execution backends.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Result, RunnerError};
use crate::types::{ExecutorReport, PlaybookJob, RunStatus, TIMEOUT_RETURN_CODE};

/// Runs a playbook against an inventory.
#[async_trait]
pub trait PlaybookExecutor: Send + Sync {
    /// Execute `job` and report the raw result.
    ///
    /// # Errors
    ///
    /// Returns an error only if the run could not be attempted (inventory
    /// could not be written, process could not be spawned). A playbook that
    /// runs and fails is reported through [`ExecutorReport::status`].
    async fn execute(&self, job: &PlaybookJob) -> Result<ExecutorReport>;
}

/// Runs the `ansible-playbook` binary as a child process.
#[derive(Debug, Clone)]
pub struct AnsiblePlaybookExecutor {
    program: PathBuf,
    timeout: Duration,
}

impl AnsiblePlaybookExecutor {
    /// Create an executor for `program`, killing runs after `timeout`.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    async fn prepare(&self, job: &PlaybookJob) -> Result<(PathBuf, PathBuf)> {
        let run_dir = job
            .private_data_dir
            .join("artifacts")
            .join(Uuid::new_v4().to_string());
        tokio::fs::create_dir_all(&run_dir).await?;
        let inventory = run_dir.join("inventory.json");
        tokio::fs::write(&inventory, serde_json::to_vec_pretty(&job.inventory)?).await?;
        Ok((run_dir, inventory))
    }

    fn command(&self, job: &PlaybookJob, inventory: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-i").arg(inventory);
        if let Some(key) = &job.ssh_key {
            cmd.arg("--private-key").arg(key);
        }
        cmd.arg(&job.playbook)
            .current_dir(&job.private_data_dir)
            .env("ANSIBLE_HOST_KEY_CHECKING", "False")
            .env("ANSIBLE_NOCOLOR", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    async fn run(&self, job: &PlaybookJob, inventory: &Path) -> Result<ExecutorReport> {
        let child = self
            .command(job, inventory)
            .spawn()
            .map_err(|e| RunnerError::Spawn {
                program: self.program.display().to_string(),
                reason: e.to_string(),
            })?;

        let start = Instant::now();
        // Dropping the child on timeout kills it.
        let Ok(output) = timeout(self.timeout, child.wait_with_output()).await else {
            warn!(
                playbook = %job.playbook.display(),
                limit_secs = self.timeout.as_secs(),
                "Playbook run timed out"
            );
            return Ok(ExecutorReport {
                status: RunStatus::Timeout,
                return_code: Some(TIMEOUT_RETURN_CODE),
                stdout: String::new(),
            });
        };
        let output = output?;

        let mut stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            stdout.push_str("\n--- stderr ---\n");
            stdout.push_str(&stderr);
        }
        if !job.quiet {
            for line in stdout.lines() {
                debug!(target: "ctf_range_runner::ansible", "{line}");
            }
        }

        let return_code = output.status.code();
        let status = if output.status.success() {
            RunStatus::Successful
        } else {
            RunStatus::Failed
        };
        info!(
            playbook = %job.playbook.display(),
            status = %status,
            return_code = ?return_code,
            duration_secs = start.elapsed().as_secs_f32(),
            "Playbook run finished"
        );

        Ok(ExecutorReport {
            status,
            return_code,
            stdout,
        })
    }
}

#[async_trait]
impl PlaybookExecutor for AnsiblePlaybookExecutor {
    async fn execute(&self, job: &PlaybookJob) -> Result<ExecutorReport> {
        let (run_dir, inventory) = self.prepare(job).await?;
        let result = self.run(job, &inventory).await;
        // The inventory carries the flag.
        if let Err(e) = tokio::fs::remove_dir_all(&run_dir).await {
            warn!(dir = %run_dir.display(), error = %e, "Failed to remove run directory");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn job(dir: &TempDir) -> PlaybookJob {
        PlaybookJob {
            private_data_dir: dir.path().to_path_buf(),
            playbook: dir.path().join("site.yml"),
            inventory: json!({ "all": { "hosts": { "10.0.0.5": { "ansible_user": "root" } } } }),
            ssh_key: None,
            quiet: true,
        }
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let dir = TempDir::new().unwrap();
        let executor =
            AnsiblePlaybookExecutor::new("/nonexistent/ansible-playbook", Duration::from_secs(5));
        let err = executor.execute(&job(&dir)).await.unwrap_err();
        assert!(matches!(err, RunnerError::Spawn { .. }));
    }

    #[tokio::test]
    async fn run_directory_is_removed() {
        let dir = TempDir::new().unwrap();
        let executor =
            AnsiblePlaybookExecutor::new("/nonexistent/ansible-playbook", Duration::from_secs(5));
        let _ = executor.execute(&job(&dir)).await;

        let artifacts = dir.path().join("artifacts");
        let mut entries = tokio::fs::read_dir(&artifacts).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn exit_status_maps_to_run_status() {
        let dir = TempDir::new().unwrap();
        // `false` ignores its arguments and exits 1.
        let executor = AnsiblePlaybookExecutor::new("false", Duration::from_secs(5));
        let report = executor.execute(&job(&dir)).await.unwrap();
        assert_eq!(report.status, RunStatus::Failed);
        assert_eq!(report.return_code, Some(1));

        let executor = AnsiblePlaybookExecutor::new("true", Duration::from_secs(5));
        let report = executor.execute(&job(&dir)).await.unwrap();
        assert_eq!(report.status, RunStatus::Successful);
        assert_eq!(report.return_code, Some(0));
    }
}
