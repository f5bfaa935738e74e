//! Outcome normalization on top of a [`PlaybookExecutor`].

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{json, Map, Value};
use tracing::{error, info, instrument};

use crate::config::RunnerConfig;
use crate::executor::PlaybookExecutor;
use crate::types::{HostStats, PlaybookJob, RunOutcome, RunRequest, RunStatus};

/// Configures a single host by running a playbook against it.
///
/// `run` never fails: missing playbooks, spawn errors and non-zero exits all
/// come back as a [`RunOutcome`] with `success == false`.
pub struct ConfigurationRunner {
    config: RunnerConfig,
    executor: Arc<dyn PlaybookExecutor>,
}

impl ConfigurationRunner {
    /// Create a runner.
    #[must_use]
    pub fn new(config: RunnerConfig, executor: Arc<dyn PlaybookExecutor>) -> Self {
        Self { config, executor }
    }

    /// The runner's configuration.
    #[must_use]
    pub const fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Run `request.playbook` against `request.host`.
    #[instrument(skip(self, request), fields(host = %request.host, playbook = %request.playbook))]
    pub async fn run(&self, request: &RunRequest) -> RunOutcome {
        let playbook = self.config.playbook_dir.join(&request.playbook);
        if tokio::fs::metadata(&playbook).await.is_err() {
            error!(path = %playbook.display(), "Playbook not found");
            return RunOutcome::failure(
                RunStatus::Error,
                format!("Playbook file not found: {}", request.playbook),
            );
        }

        let job = PlaybookJob {
            private_data_dir: self.config.private_data_dir.clone(),
            playbook,
            inventory: build_inventory(&request.host, &request.ssh_user, &request.extra_vars),
            ssh_key: self.config.ssh_private_key.clone(),
            quiet: self.config.quiet,
        };

        let report = match self.executor.execute(&job).await {
            Ok(report) => report,
            Err(e) => {
                error!(error = %e, "Playbook executor failed");
                return RunOutcome::failure(RunStatus::Exception, e.to_string());
            }
        };

        let return_code = report.return_code.unwrap_or(1);
        let success = report.status == RunStatus::Successful && return_code == 0;
        let stats = parse_recap(&report.stdout).remove(&request.host);

        if success {
            info!("Playbook finished successfully");
        } else {
            error!(status = %report.status, return_code, "Playbook failed");
        }

        RunOutcome {
            success,
            status: report.status,
            return_code,
            stats,
            raw_output: report.stdout,
        }
    }
}

/// Single-host inventory with `extra_vars` merged into the host variables.
#[must_use]
pub fn build_inventory(host: &str, ssh_user: &str, extra_vars: &BTreeMap<String, Value>) -> Value {
    let mut vars = Map::new();
    vars.insert("ansible_user".to_string(), Value::String(ssh_user.to_string()));
    for (key, value) in extra_vars {
        vars.insert(key.clone(), value.clone());
    }
    let mut hosts = Map::new();
    hosts.insert(host.to_string(), Value::Object(vars));
    json!({ "all": { "hosts": hosts } })
}

/// Parse the `PLAY RECAP` block of `ansible-playbook` output into per-host counters.
#[must_use]
pub fn parse_recap(output: &str) -> BTreeMap<String, HostStats> {
    let mut hosts = BTreeMap::new();
    let Some(start) = output.find("PLAY RECAP") else {
        return hosts;
    };

    for line in output[start..].lines().skip(1) {
        let Some((host, counters)) = line.split_once(" : ") else {
            if line.trim().is_empty() {
                continue;
            }
            break;
        };
        let mut stats = HostStats::default();
        for pair in counters.split_whitespace() {
            let Some((name, value)) = pair.split_once('=') else {
                continue;
            };
            let Ok(value) = value.parse() else {
                continue;
            };
            match name {
                "ok" => stats.ok = value,
                "changed" => stats.changed = value,
                "unreachable" => stats.unreachable = value,
                "failed" => stats.failed = value,
                "skipped" => stats.skipped = value,
                "rescued" => stats.rescued = value,
                "ignored" => stats.ignored = value,
                _ => {}
            }
        }
        hosts.insert(host.trim().to_string(), stats);
    }
    hosts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockExecutor;
    use crate::types::ExecutorReport;
    use tempfile::TempDir;

    const RECAP: &str = "\
PLAY [all] *********************************************************************

TASK [Write flag] **************************************************************
changed: [10.10.0.200]

PLAY RECAP *********************************************************************
10.10.0.200                : ok=2    changed=1    unreachable=0    failed=0    skipped=0    rescued=0    ignored=0
";

    fn setup(executor: &MockExecutor) -> (TempDir, ConfigurationRunner) {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("deploy_flag.yml"), "- hosts: all\n").unwrap();
        let config = RunnerConfig {
            private_data_dir: dir.path().to_path_buf(),
            playbook_dir: dir.path().to_path_buf(),
            ..RunnerConfig::default()
        };
        let runner = ConfigurationRunner::new(config, Arc::new(executor.clone()));
        (dir, runner)
    }

    fn request() -> RunRequest {
        let mut extra_vars = BTreeMap::new();
        extra_vars.insert("challenge_flag".to_string(), json!("CTF{ABC}"));
        extra_vars.insert("flag_path".to_string(), json!("/root/flag.txt"));
        RunRequest {
            host: "10.10.0.200".into(),
            playbook: "deploy_flag.yml".into(),
            ssh_user: "root".into(),
            extra_vars,
        }
    }

    #[tokio::test]
    async fn successful_run() {
        let executor = MockExecutor::new();
        executor.respond_with(ExecutorReport {
            status: RunStatus::Successful,
            return_code: Some(0),
            stdout: RECAP.into(),
        });
        let (_dir, runner) = setup(&executor);

        let outcome = runner.run(&request()).await;
        assert!(outcome.success);
        assert_eq!(outcome.status, RunStatus::Successful);
        assert_eq!(outcome.stats.unwrap().changed, 1);

        let jobs = executor.jobs();
        assert_eq!(jobs.len(), 1);
        let host_vars = &jobs[0].inventory["all"]["hosts"]["10.10.0.200"];
        assert_eq!(host_vars["ansible_user"], "root");
        assert_eq!(host_vars["challenge_flag"], "CTF{ABC}");
    }

    #[tokio::test]
    async fn nonzero_return_code_fails_despite_successful_status() {
        let executor = MockExecutor::new();
        executor.respond_with(ExecutorReport {
            status: RunStatus::Successful,
            return_code: Some(1),
            stdout: String::new(),
        });
        let (_dir, runner) = setup(&executor);

        let outcome = runner.run(&request()).await;
        assert!(!outcome.success);
        assert_eq!(outcome.return_code, 1);
    }

    #[tokio::test]
    async fn missing_return_code_is_failure() {
        let executor = MockExecutor::new();
        executor.respond_with(ExecutorReport {
            status: RunStatus::Successful,
            return_code: None,
            stdout: String::new(),
        });
        let (_dir, runner) = setup(&executor);

        let outcome = runner.run(&request()).await;
        assert!(!outcome.success);
        assert_eq!(outcome.return_code, 1);
    }

    #[tokio::test]
    async fn missing_playbook_is_error() {
        let executor = MockExecutor::new();
        let (_dir, runner) = setup(&executor);

        let mut req = request();
        req.playbook = "nope.yml".into();
        let outcome = runner.run(&req).await;
        assert!(!outcome.success);
        assert_eq!(outcome.status, RunStatus::Error);
        assert_eq!(outcome.return_code, 1);
        assert!(executor.jobs().is_empty());
    }

    #[tokio::test]
    async fn executor_error_is_exception() {
        let executor = MockExecutor::new();
        executor.fail_with("connection to docker daemon lost");
        let (_dir, runner) = setup(&executor);

        let outcome = runner.run(&request()).await;
        assert!(!outcome.success);
        assert_eq!(outcome.status, RunStatus::Exception);
        assert!(outcome.raw_output.contains("docker daemon"));
    }

    #[test]
    fn recap_parsing() {
        let stats = parse_recap(RECAP);
        let host = stats.get("10.10.0.200").unwrap();
        assert_eq!(host.ok, 2);
        assert_eq!(host.failed, 0);
        assert!(parse_recap("no recap here").is_empty());
    }

    #[test]
    fn inventory_without_extra_vars() {
        let inventory = build_inventory("web", "admin", &BTreeMap::new());
        assert_eq!(inventory["all"]["hosts"]["web"]["ansible_user"], "admin");
    }
}
