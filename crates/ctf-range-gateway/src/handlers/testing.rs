//! Test fixture: the real router over a mock-backed orchestrator.

use std::sync::Arc;

use axum_test::TestServer;
use ctf_range_control::{ControlConfig, OrchestratorService};
use ctf_range_hypervisor::{
    HypervisorConfig, MockHypervisor, VirtualMachineProvisioner, VmIdAllocator,
};
use ctf_range_runner::{ConfigurationRunner, MockExecutor, RunnerConfig};
use ctf_range_store::RocksStore;
use serde_json::{json, Value};
use tempfile::TempDir;

use crate::config::GatewayConfig;
use crate::routes::create_router;
use crate::state::GatewayState;

pub(crate) struct TestRange {
    _dir: TempDir,
    pub hypervisor: MockHypervisor,
    pub executor: MockExecutor,
    pub server: TestServer,
}

impl TestRange {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let playbooks = dir.path().join("playbooks");
        std::fs::create_dir_all(&playbooks).unwrap();
        std::fs::write(playbooks.join("deploy_flag.yml"), "- hosts: all\n").unwrap();

        let store = Arc::new(RocksStore::open(dir.path().join("db")).unwrap());
        let hv_config = HypervisorConfig {
            task_poll_ms: 1,
            ..HypervisorConfig::default()
        };
        let hypervisor = MockHypervisor::new();
        let allocator = VmIdAllocator::new(hv_config.vmid_range().unwrap());
        let provisioner = Arc::new(VirtualMachineProvisioner::new(
            Arc::new(hypervisor.clone()),
            hv_config,
        ));
        let executor = MockExecutor::new();
        let runner = Arc::new(ConfigurationRunner::new(
            RunnerConfig {
                private_data_dir: dir.path().to_path_buf(),
                playbook_dir: playbooks,
                ..RunnerConfig::default()
            },
            Arc::new(executor.clone()),
        ));
        let orchestrator = Arc::new(
            OrchestratorService::new(
                store,
                provisioner,
                allocator,
                runner,
                ControlConfig::default(),
            )
            .unwrap(),
        );

        let state = GatewayState::new(orchestrator, GatewayConfig::default());
        let server = TestServer::new(create_router(state)).unwrap();

        Self {
            _dir: dir,
            hypervisor,
            executor,
            server,
        }
    }

    /// Create a level and return its id.
    pub async fn level(&self, name: &str) -> u64 {
        let response = self
            .server
            .post("/api/v1/levels")
            .json(&json!({
                "name": name,
                "category": "injection",
                "difficulty": "easy",
                "template_ref": "ubuntu",
            }))
            .await;
        let body: Value = response.json();
        body["level_id"].as_u64().unwrap()
    }

    /// Create a challenge and return the response body.
    pub async fn challenge(&self, level_id: u64, team: &str) -> Value {
        self.server
            .post("/api/v1/challenges")
            .json(&json!({ "level_id": level_id, "team_name": team }))
            .await
            .json()
    }
}
