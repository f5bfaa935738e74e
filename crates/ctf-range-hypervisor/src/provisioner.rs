//! Session-guarded VM provisioning.

use std::sync::Arc;

use ctf_range_core::VmId;
use futures::future::join_all;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::api::{HypervisorConnector, HypervisorSession};
use crate::config::HypervisorConfig;
use crate::error::{HypervisorError, Result};
use crate::types::{
    CloneSpec, CreateSpec, PowerState, ProvisionRequest, ProvisionResult, ResourceClass,
    ResourceInfo, ResourceSummary, TaskId, TaskState, TemplateSource,
};

/// Creates, starts, stops and destroys VMs on one hypervisor node.
///
/// The provisioner owns the only session handle in the process. It is
/// established lazily by the first operation that needs it; concurrent first
/// callers wait on the same connect instead of stampeding the control plane.
/// Any `Connection` error discards the handle so the next call reconnects.
///
/// Resource listings are never cached.
pub struct VirtualMachineProvisioner {
    connector: Arc<dyn HypervisorConnector>,
    config: HypervisorConfig,
    session: Mutex<Option<Arc<dyn HypervisorSession>>>,
}

impl VirtualMachineProvisioner {
    /// Create a provisioner. No connection is made until first use.
    #[must_use]
    pub fn new(connector: Arc<dyn HypervisorConnector>, config: HypervisorConfig) -> Self {
        Self {
            connector,
            config,
            session: Mutex::new(None),
        }
    }

    /// The provisioner's configuration.
    #[must_use]
    pub const fn config(&self) -> &HypervisorConfig {
        &self.config
    }

    /// Establish and validate a session. A no-op when already connected.
    ///
    /// # Errors
    ///
    /// Returns `HypervisorError::Connection` if login or the version probe
    /// fails. The handle is discarded so a later call retries from scratch.
    pub async fn connect(&self) -> Result<()> {
        self.session().await.map(|_| ())
    }

    /// Returns true if a validated session is currently held.
    pub async fn is_connected(&self) -> bool {
        self.session.lock().await.is_some()
    }

    /// Version string reported by the control plane.
    ///
    /// # Errors
    ///
    /// Returns `HypervisorError::Connection` if the hypervisor is unreachable.
    pub async fn version(&self) -> Result<String> {
        let session = self.session().await?;
        let result = session.version().await;
        self.observe(result).await
    }

    async fn session(&self) -> Result<Arc<dyn HypervisorSession>> {
        let mut guard = self.session.lock().await;
        if let Some(session) = guard.as_ref() {
            return Ok(Arc::clone(session));
        }

        let session = self.connector.connect().await.map_err(as_connection)?;
        let version = session.version().await.map_err(as_connection)?;
        info!(
            host = %self.config.host,
            node = %self.config.node,
            version = %version,
            "Connected to hypervisor"
        );
        *guard = Some(Arc::clone(&session));
        Ok(session)
    }

    async fn invalidate(&self) {
        if self.session.lock().await.take().is_some() {
            warn!(host = %self.config.host, "Discarding hypervisor session");
        }
    }

    /// Pass a result through, dropping the session on connection errors.
    async fn observe<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            if err.is_connection() {
                self.invalidate().await;
            }
        }
        result
    }

    /// Merge VM and container listings for the configured node.
    ///
    /// A failure fetching one class is logged and contributes nothing.
    ///
    /// # Errors
    ///
    /// - `Connection` if no session can be established.
    /// - The first listing error if no class could be listed.
    #[instrument(skip(self), fields(node = %self.config.node))]
    pub async fn list_resources(&self) -> Result<Vec<ResourceSummary>> {
        let session = self.session().await?;
        let handle = session.as_ref();
        let node = self.config.node.as_str();
        let listings = join_all(
            ResourceClass::ALL
                .iter()
                .map(|&class| async move { (class, handle.list_by_class(node, class).await) }),
        )
        .await;

        let mut resources = Vec::new();
        let mut listed_any = false;
        let mut first_error = None;
        for (class, listed) in listings {
            match self.observe(listed).await {
                Ok(mut batch) => {
                    listed_any = true;
                    resources.append(&mut batch);
                }
                Err(e) => {
                    warn!(class = class.api_path(), error = %e, "Resource listing failed");
                    first_error.get_or_insert(e);
                }
            }
        }
        if let (false, Some(e)) = (listed_any, first_error) {
            return Err(e);
        }
        debug!(count = resources.len(), "Listed hypervisor resources");
        Ok(resources)
    }

    /// Create (or clone) a VM, size it, start it and read back its info.
    ///
    /// If anything fails after the resource exists, it is stopped and
    /// destroyed before the error is returned.
    ///
    /// # Errors
    ///
    /// - `Conflict` if the identifier was taken before the create landed.
    /// - `Provisioning` for any other create or start failure.
    /// - `Connection` if no session can be established.
    #[instrument(skip(self, request), fields(vmid = %request.vmid, name = %request.name))]
    pub async fn create_and_start(&self, request: &ProvisionRequest) -> Result<ProvisionResult> {
        let session = self.session().await?;
        let node = self.config.node.as_str();
        let vmid = request.vmid;

        let submitted = match &request.template {
            TemplateSource::Clone(template) => {
                let spec = CloneSpec {
                    template: *template,
                    vmid,
                    name: request.name.clone(),
                    target_node: self.config.node.clone(),
                    storage: self.config.full_clone.then(|| self.config.storage.clone()),
                    full: self.config.full_clone,
                };
                session.clone_template(node, &spec).await
            }
            TemplateSource::InstallMedia(media) => {
                let spec = CreateSpec {
                    vmid,
                    name: request.name.clone(),
                    sizing: request.sizing,
                    net0: request.net0(),
                    install_media: media.clone(),
                    storage: self.config.storage.clone(),
                };
                session.create(node, &spec).await
            }
        };

        let task = match self.observe(submitted).await {
            Ok(task) => task,
            Err(e) => return Err(self.classify_create_failure(session.as_ref(), vmid, e).await),
        };

        match self.finish_provisioning(session.as_ref(), request, &task).await {
            Ok(info) => {
                info!(vmid = %vmid, address = %info.address(), "VM provisioned and started");
                Ok(ProvisionResult { vmid, info })
            }
            Err(e) => {
                warn!(vmid = %vmid, error = %e, "Discarding half-created VM");
                self.discard(session.as_ref(), vmid).await;
                Err(HypervisorError::Provisioning(format!(
                    "created VM {vmid} but failed to start it: {e}"
                )))
            }
        }
    }

    async fn classify_create_failure(
        &self,
        session: &dyn HypervisorSession,
        vmid: VmId,
        err: HypervisorError,
    ) -> HypervisorError {
        match err {
            HypervisorError::Conflict(_) | HypervisorError::Connection(_) => err,
            other => {
                // The create may have been refused because the id is now taken.
                if session.get_config(&self.config.node, vmid).await.is_ok() {
                    HypervisorError::Conflict(vmid)
                } else {
                    HypervisorError::Provisioning(format!("failed to create VM {vmid}: {other}"))
                }
            }
        }
    }

    async fn finish_provisioning(
        &self,
        session: &dyn HypervisorSession,
        request: &ProvisionRequest,
        create_task: &TaskId,
    ) -> Result<ResourceInfo> {
        let node = self.config.node.as_str();
        self.wait_for_task(session, create_task).await?;

        if matches!(request.template, TemplateSource::Clone(_)) {
            let configured = session
                .configure(node, request.vmid, &request.sizing, &request.net0())
                .await;
            self.observe(configured).await?;
        }

        let started = session.start(node, request.vmid).await;
        let start_task = self.observe(started).await?;
        self.wait_for_task(session, &start_task).await?;

        self.read_info(session, request.vmid).await
    }

    /// Best-effort stop and destroy. Failures are logged, never returned.
    async fn discard(&self, session: &dyn HypervisorSession, vmid: VmId) {
        let node = self.config.node.as_str();
        match session.stop(node, vmid).await {
            Ok(task) => {
                if let Err(e) = self.wait_for_task(session, &task).await {
                    debug!(vmid = %vmid, error = %e, "Stop during discard did not finish");
                }
            }
            Err(e) => debug!(vmid = %vmid, error = %e, "Stop during discard failed"),
        }
        match session.destroy(node, vmid).await {
            Ok(task) => {
                if let Err(e) = self.wait_for_task(session, &task).await {
                    warn!(vmid = %vmid, error = %e, "Destroy during discard did not finish");
                }
            }
            Err(HypervisorError::NotFound(_)) => {}
            Err(e) => warn!(vmid = %vmid, error = %e, "Destroy during discard failed"),
        }
    }

    /// Stop a VM. Stopping an already stopped VM is a no-op.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the hypervisor has no such VM.
    /// - `NodeOperation` if the stop command fails.
    #[instrument(skip(self))]
    pub async fn stop(&self, vmid: VmId) -> Result<()> {
        let info = self.get_info(vmid).await?;
        if info.status == Some(PowerState::Stopped) {
            debug!(vmid = %vmid, "VM already stopped");
            return Ok(());
        }

        let session = self.session().await?;
        let result = async {
            let task = session.stop(&self.config.node, vmid).await?;
            self.wait_for_task(session.as_ref(), &task).await
        }
        .await;

        match self.observe(result).await {
            Ok(()) => {
                info!(vmid = %vmid, "VM stopped");
                Ok(())
            }
            Err(e @ (HypervisorError::NotFound(_) | HypervisorError::Connection(_))) => Err(e),
            Err(e) => Err(HypervisorError::NodeOperation(format!(
                "failed to stop VM {vmid}: {e}"
            ))),
        }
    }

    /// Destroy a VM and its disks. A VM that no longer exists counts as destroyed.
    ///
    /// # Errors
    ///
    /// Returns `NodeOperation` if the destroy command fails.
    #[instrument(skip(self))]
    pub async fn destroy(&self, vmid: VmId) -> Result<()> {
        let session = self.session().await?;
        let result = async {
            let task = session.destroy(&self.config.node, vmid).await?;
            self.wait_for_task(session.as_ref(), &task).await
        }
        .await;

        match self.observe(result).await {
            Ok(()) => {
                info!(vmid = %vmid, "VM destroyed");
                Ok(())
            }
            Err(HypervisorError::NotFound(_)) => {
                debug!(vmid = %vmid, "VM already gone");
                Ok(())
            }
            Err(e @ HypervisorError::Connection(_)) => Err(e),
            Err(e) => Err(HypervisorError::NodeOperation(format!(
                "failed to destroy VM {vmid}: {e}"
            ))),
        }
    }

    /// Live configuration and power state of a VM.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when the hypervisor reports no such VM.
    pub async fn get_info(&self, vmid: VmId) -> Result<ResourceInfo> {
        let session = self.session().await?;
        self.read_info(session.as_ref(), vmid).await
    }

    async fn read_info(&self, session: &dyn HypervisorSession, vmid: VmId) -> Result<ResourceInfo> {
        let config = session.get_config(&self.config.node, vmid).await;
        let config = self.observe(config).await?;
        let status = match session.current_status(&self.config.node, vmid).await {
            Ok(status) => Some(status),
            Err(e) => {
                debug!(vmid = %vmid, error = %e, "Power state unavailable");
                None
            }
        };
        Ok(ResourceInfo::from_config(vmid, config, status))
    }

    /// Poll a task until it finishes or the task timeout expires.
    async fn wait_for_task(&self, session: &dyn HypervisorSession, task: &TaskId) -> Result<()> {
        let timeout = self.config.task_timeout();
        match tokio::time::timeout(timeout, self.poll_task(session, task)).await {
            Ok(result) => result,
            Err(_) => Err(HypervisorError::Timeout(format!(
                "task {task} did not finish within {}s",
                timeout.as_secs()
            ))),
        }
    }

    async fn poll_task(&self, session: &dyn HypervisorSession, task: &TaskId) -> Result<()> {
        let poll = self.config.task_poll_interval();
        loop {
            match session.task_status(&self.config.node, task).await? {
                TaskState::Running => tokio::time::sleep(poll).await,
                TaskState::Succeeded => return Ok(()),
                TaskState::Failed(status) => {
                    return Err(HypervisorError::NodeOperation(format!(
                        "task {task} failed: {status}"
                    )))
                }
            }
        }
    }
}

fn as_connection(err: HypervisorError) -> HypervisorError {
    match err {
        HypervisorError::Connection(_) => err,
        other => HypervisorError::Connection(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockHypervisor;
    use crate::types::VmSizing;

    fn provisioner(mock: &MockHypervisor) -> VirtualMachineProvisioner {
        let config = HypervisorConfig {
            task_poll_ms: 1,
            ..HypervisorConfig::default()
        };
        VirtualMachineProvisioner::new(Arc::new(mock.clone()), config)
    }

    fn request(vmid: u32, template: TemplateSource) -> ProvisionRequest {
        ProvisionRequest {
            vmid: VmId::new(vmid),
            name: format!("alpha-1-{vmid}"),
            template,
            sizing: VmSizing::default(),
            bridge: "vmbr0".into(),
        }
    }

    #[tokio::test]
    async fn connect_is_idempotent() {
        let mock = MockHypervisor::new();
        let provisioner = provisioner(&mock);
        provisioner.connect().await.unwrap();
        provisioner.connect().await.unwrap();
        assert!(provisioner.is_connected().await);
        assert_eq!(mock.connects(), 1);
    }

    #[tokio::test]
    async fn failed_probe_discards_session_and_retries() {
        let mock = MockHypervisor::new();
        mock.fail_version(true);
        let provisioner = provisioner(&mock);

        let err = provisioner.connect().await.unwrap_err();
        assert!(err.is_connection());
        assert!(!provisioner.is_connected().await);

        mock.fail_version(false);
        provisioner.connect().await.unwrap();
        assert_eq!(mock.connects(), 2);
    }

    #[tokio::test]
    async fn listing_tolerates_one_class_failing() {
        let mock = MockHypervisor::new()
            .with_vm(VmId::new(200), "web", PowerState::Running)
            .with_container(VmId::new(201), "dns");
        mock.fail_listing(ResourceClass::Container, true);
        let provisioner = provisioner(&mock);

        let resources = provisioner.list_resources().await.unwrap();
        assert_eq!(resources.len(), 1);
        assert_eq!(resources[0].vmid, VmId::new(200));
    }

    #[tokio::test]
    async fn listing_fails_when_no_class_can_be_listed() {
        let mock = MockHypervisor::new().with_vm(VmId::new(200), "web", PowerState::Running);
        mock.fail_listing(ResourceClass::Vm, true);
        mock.fail_listing(ResourceClass::Container, true);
        let provisioner = provisioner(&mock);

        let err = provisioner.list_resources().await.unwrap_err();
        assert!(matches!(err, HypervisorError::NodeOperation(_)));
    }

    #[tokio::test]
    async fn create_and_start_from_install_media() {
        let mock = MockHypervisor::new();
        let provisioner = provisioner(&mock);

        let result = provisioner
            .create_and_start(&request(
                200,
                TemplateSource::InstallMedia("local:iso/ubuntu.iso".into()),
            ))
            .await
            .unwrap();

        assert_eq!(result.vmid, VmId::new(200));
        assert_eq!(result.info.status, Some(PowerState::Running));
        assert_eq!(result.info.name.as_deref(), Some("alpha-1-200"));
        assert_eq!(mock.created(), vec![VmId::new(200)]);
        assert_eq!(mock.started(), vec![VmId::new(200)]);
    }

    #[tokio::test]
    async fn clone_applies_sizing() {
        let mock = MockHypervisor::new().with_vm(VmId::new(9000), "template", PowerState::Stopped);
        let provisioner = provisioner(&mock);

        let mut req = request(201, TemplateSource::Clone(VmId::new(9000)));
        req.sizing.cores = 4;
        req.sizing.memory_mb = 2048;
        let result = provisioner.create_and_start(&req).await.unwrap();

        assert_eq!(result.info.cores, Some(4));
        assert_eq!(result.info.memory_mb, Some(2048));
    }

    #[tokio::test]
    async fn start_failure_destroys_the_vm() {
        let mock = MockHypervisor::new();
        mock.fail_start(true);
        let provisioner = provisioner(&mock);

        let err = provisioner
            .create_and_start(&request(
                200,
                TemplateSource::InstallMedia("local:iso/ubuntu.iso".into()),
            ))
            .await
            .unwrap_err();

        assert!(matches!(err, HypervisorError::Provisioning(_)));
        assert_eq!(mock.destroyed(), vec![VmId::new(200)]);
        assert!(mock.vm(VmId::new(200)).is_none());
    }

    #[tokio::test]
    async fn create_conflict_is_reported() {
        let mock = MockHypervisor::new();
        mock.conflict_on_create(1);
        let provisioner = provisioner(&mock);

        let err = provisioner
            .create_and_start(&request(
                200,
                TemplateSource::InstallMedia("local:iso/ubuntu.iso".into()),
            ))
            .await
            .unwrap_err();

        assert!(matches!(err, HypervisorError::Conflict(id) if id == VmId::new(200)));
        // The foreign VM that won the race is left alone.
        assert!(mock.destroyed().is_empty());
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let mock = MockHypervisor::new().with_vm(VmId::new(200), "web", PowerState::Running);
        let provisioner = provisioner(&mock);

        provisioner.stop(VmId::new(200)).await.unwrap();
        provisioner.stop(VmId::new(200)).await.unwrap();
        assert_eq!(mock.stopped(), vec![VmId::new(200)]);
    }

    #[tokio::test]
    async fn stop_unknown_vm_is_not_found() {
        let mock = MockHypervisor::new();
        let provisioner = provisioner(&mock);
        let err = provisioner.stop(VmId::new(404)).await.unwrap_err();
        assert!(matches!(err, HypervisorError::NotFound(_)));
    }

    #[tokio::test]
    async fn stop_failure_is_node_operation() {
        let mock = MockHypervisor::new().with_vm(VmId::new(200), "web", PowerState::Running);
        mock.fail_stop(true);
        let provisioner = provisioner(&mock);
        let err = provisioner.stop(VmId::new(200)).await.unwrap_err();
        assert!(matches!(err, HypervisorError::NodeOperation(_)));
    }

    #[tokio::test]
    async fn refused_destroy_is_not_reported_as_success() {
        let mock = MockHypervisor::new().with_vm(VmId::new(200), "web", PowerState::Running);
        let provisioner = provisioner(&mock);

        let err = provisioner.destroy(VmId::new(200)).await.unwrap_err();
        assert!(matches!(err, HypervisorError::NodeOperation(msg) if msg.contains("is running")));
        assert!(mock.vm(VmId::new(200)).is_some());
        assert!(mock.destroyed().is_empty());
    }

    #[tokio::test]
    async fn destroy_missing_vm_is_ok() {
        let mock = MockHypervisor::new();
        let provisioner = provisioner(&mock);
        provisioner.destroy(VmId::new(321)).await.unwrap();
    }

    #[tokio::test]
    async fn connection_error_drops_session() {
        let mock = MockHypervisor::new().with_vm(VmId::new(200), "web", PowerState::Running);
        let provisioner = provisioner(&mock);
        provisioner.connect().await.unwrap();

        mock.drop_connection(true);
        assert!(provisioner.get_info(VmId::new(200)).await.is_err());
        assert!(!provisioner.is_connected().await);

        mock.drop_connection(false);
        provisioner.get_info(VmId::new(200)).await.unwrap();
        assert_eq!(mock.connects(), 2);
    }
}
