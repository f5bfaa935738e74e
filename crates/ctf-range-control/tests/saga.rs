//! End-to-end runs of the challenge saga against the in-memory hypervisor
//! and playbook executor.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use ctf_range_control::{
    Category, ChallengeOrchestrator, ControlConfig, CreateChallengeRequest, DeploymentStatus,
    Difficulty, ErrorKind, Level, NewLevel, OrchestratorService, VmId,
};
use ctf_range_hypervisor::{HypervisorConfig, MockHypervisor, VirtualMachineProvisioner, VmIdAllocator};
use ctf_range_runner::{ConfigurationRunner, MockExecutor, RunnerConfig};
use ctf_range_store::{RocksStore, Store};
use tempfile::TempDir;

struct Range {
    _dir: TempDir,
    hypervisor: MockHypervisor,
    executor: MockExecutor,
    orchestrator: Arc<OrchestratorService<RocksStore>>,
}

fn range_with(hv_config: HypervisorConfig) -> Range {
    let dir = TempDir::new().unwrap();
    let playbooks = dir.path().join("playbooks");
    std::fs::create_dir_all(&playbooks).unwrap();
    std::fs::write(playbooks.join("deploy_flag.yml"), "- hosts: all\n").unwrap();

    let store = Arc::new(RocksStore::open(dir.path().join("db")).unwrap());
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
        OrchestratorService::new(store, provisioner, allocator, runner, ControlConfig::default())
            .unwrap(),
    );

    Range {
        _dir: dir,
        hypervisor,
        executor,
        orchestrator,
    }
}

fn range() -> Range {
    range_with(HypervisorConfig {
        task_poll_ms: 1,
        ..HypervisorConfig::default()
    })
}

async fn web_level(range: &Range) -> Level {
    range
        .orchestrator
        .create_level(NewLevel {
            name: "Broken login".into(),
            category: Category::AuthenticationFailures,
            difficulty: Difficulty::Medium,
            description: Some("Default credentials on an admin panel".into()),
            points: Some(250),
            template_ref: "ubuntu".into(),
        })
        .await
        .unwrap()
}

fn is_well_formed(flag: &str) -> bool {
    let Some(body) = flag.strip_prefix("CTF{").and_then(|f| f.strip_suffix('}')) else {
        return false;
    };
    body.len() == 32
        && body
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
}

#[tokio::test]
async fn create_then_solve() {
    let range = range();
    let level = web_level(&range).await;
    assert_eq!(level.points, 250);

    let created = range
        .orchestrator
        .create_challenge(CreateChallengeRequest::new(level.level_id, "Alpha"))
        .await
        .unwrap();

    let vmid = created.vm_info.vmid.get();
    assert!((200..500).contains(&vmid));
    assert!(is_well_formed(&created.flag), "malformed flag {}", created.flag);

    let jobs = range.executor.jobs();
    assert_eq!(jobs.len(), 1);
    let host = created.vm_info.address();
    assert_eq!(
        jobs[0].inventory["all"]["hosts"][host.as_str()]["challenge_flag"],
        created.flag.as_str()
    );

    let view = range
        .orchestrator
        .get_challenge(created.challenge_id)
        .await
        .unwrap();
    assert_eq!(view.deployment_status, Some(DeploymentStatus::Running));
    assert!(!view.flag_submitted);

    let submission = range
        .orchestrator
        .submit_flag(created.challenge_id, &created.flag)
        .await
        .unwrap();
    assert!(submission.correct);

    let view = range
        .orchestrator
        .get_challenge(created.challenge_id)
        .await
        .unwrap();
    assert!(view.flag_submitted);
    assert_eq!(view.deployment_status, Some(DeploymentStatus::Stopped));
    assert_eq!(range.hypervisor.stopped(), vec![created.vm_info.vmid]);
}

#[tokio::test]
async fn flags_are_unique_across_many_challenges() {
    let range = range();
    let level = web_level(&range).await;

    let mut flags = HashSet::new();
    for n in 0..120 {
        let created = range
            .orchestrator
            .create_challenge(CreateChallengeRequest::new(level.level_id, format!("team {n}")))
            .await
            .unwrap();
        assert!(flags.insert(created.flag));
    }

    let stored: HashSet<String> = range
        .orchestrator
        .store()
        .list_challenges()
        .unwrap()
        .into_iter()
        .filter_map(|c| c.flag)
        .collect();
    assert_eq!(stored, flags);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_creates_get_distinct_ids() {
    let range = range();
    let level = web_level(&range).await;

    let mut tasks = tokio::task::JoinSet::new();
    for n in 0..8 {
        let orchestrator = Arc::clone(&range.orchestrator);
        let level_id = level.level_id;
        tasks.spawn(async move {
            orchestrator
                .create_challenge(CreateChallengeRequest::new(level_id, format!("team {n}")))
                .await
        });
    }

    let mut vmids = HashSet::new();
    while let Some(joined) = tasks.join_next().await {
        let created = joined.unwrap().unwrap();
        assert!(vmids.insert(created.vm_info.vmid));
    }
    assert_eq!(vmids.len(), 8);
    assert_eq!(range.orchestrator.store().list_deployments().unwrap().len(), 8);
}

#[tokio::test]
async fn exhausted_range_is_reported() {
    let range = range_with(HypervisorConfig {
        task_poll_ms: 1,
        starting_vmid: 200,
        max_vmid: 202,
        ..HypervisorConfig::default()
    });
    let level = web_level(&range).await;

    for team in ["Alpha", "Bravo"] {
        range
            .orchestrator
            .create_challenge(CreateChallengeRequest::new(level.level_id, team))
            .await
            .unwrap();
    }
    let err = range
        .orchestrator
        .create_challenge(CreateChallengeRequest::new(level.level_id, "Charlie"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::AllocationExhausted);
    assert_eq!(range.hypervisor.created(), vec![VmId::new(200), VmId::new(201)]);
}

#[tokio::test]
async fn abandoned_saga_tears_vm_down() {
    let range = range();
    let level = web_level(&range).await;
    range.executor.delay(Duration::from_secs(30));

    let abandoned = tokio::time::timeout(
        Duration::from_millis(200),
        range
            .orchestrator
            .create_challenge(CreateChallengeRequest::new(level.level_id, "Alpha")),
    )
    .await;
    assert!(abandoned.is_err());
    assert_eq!(range.hypervisor.created(), vec![VmId::new(200)]);

    for _ in 0..200 {
        if !range.hypervisor.destroyed().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(range.hypervisor.destroyed(), vec![VmId::new(200)]);
    assert!(range.orchestrator.store().list_challenges().unwrap().is_empty());
}

#[tokio::test]
async fn terminated_challenge_keeps_its_history() {
    let range = range();
    let level = web_level(&range).await;
    let created = range
        .orchestrator
        .create_challenge(CreateChallengeRequest::new(level.level_id, "Alpha"))
        .await
        .unwrap();

    range
        .orchestrator
        .terminate_challenge(created.challenge_id)
        .await
        .unwrap();

    let deployment = range
        .orchestrator
        .store()
        .get_deployment_by_challenge(created.challenge_id)
        .unwrap()
        .unwrap();
    assert_eq!(deployment.status, DeploymentStatus::Terminated);
    assert!(deployment.terminated_at.is_some());
    assert!(range.hypervisor.vm(created.vm_info.vmid).is_none());

    // A terminated VM that disappeared is not an error.
    let view = range
        .orchestrator
        .sync_deployment(created.challenge_id)
        .await
        .unwrap();
    assert_eq!(view.deployment_status, Some(DeploymentStatus::Terminated));
}
