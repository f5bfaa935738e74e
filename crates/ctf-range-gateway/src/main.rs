//! CTF Range Gateway
//!
//! Main entry point: loads configuration from the environment, wires the
//! store, hypervisor client, playbook runner and orchestrator together, and
//! serves the HTTP API.

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ctf_range_control::{ControlConfig, OrchestratorService};
use ctf_range_gateway::{create_router, GatewayConfig, GatewayState};
use ctf_range_hypervisor::{
    HypervisorConfig, ProxmoxConnector, VirtualMachineProvisioner, VmIdAllocator,
};
use ctf_range_runner::{AnsiblePlaybookExecutor, ConfigurationRunner, RunnerConfig};
use ctf_range_store::RocksStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,ctf_range=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting CTF Range Gateway");

    let gateway_config = GatewayConfig::from_env();
    let hypervisor_config = HypervisorConfig::from_env();
    let runner_config = RunnerConfig::from_env();
    let control_config = ControlConfig::from_env();

    tracing::info!(
        listen_addr = %gateway_config.listen_addr,
        data_dir = %gateway_config.data_dir.display(),
        hypervisor = ?hypervisor_config,
        playbook_dir = %runner_config.playbook_dir.display(),
        "Configuration loaded"
    );

    tracing::info!(path = %gateway_config.data_dir.display(), "Opening RocksDB store");
    let store = Arc::new(RocksStore::open(&gateway_config.data_dir)?);

    let allocator = VmIdAllocator::new(hypervisor_config.vmid_range()?);
    let connector = Arc::new(ProxmoxConnector::new(hypervisor_config.clone())?);
    let provisioner = Arc::new(VirtualMachineProvisioner::new(connector, hypervisor_config));

    // The first request connects lazily if the hypervisor is down at startup.
    if let Err(e) = provisioner.connect().await {
        tracing::warn!(error = %e, "Hypervisor not reachable at startup");
    }

    let executor = AnsiblePlaybookExecutor::new(runner_config.playbook_bin.clone(), runner_config.timeout());
    let runner = Arc::new(ConfigurationRunner::new(runner_config, Arc::new(executor)));

    let orchestrator = Arc::new(OrchestratorService::new(
        store,
        provisioner,
        allocator,
        runner,
        control_config,
    )?);
    tracing::info!("Orchestrator initialized");

    let listen_addr = gateway_config.listen_addr.clone();
    let app = create_router(GatewayState::new(orchestrator, gateway_config));

    tracing::info!(listen_addr = %listen_addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
