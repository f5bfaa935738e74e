//! Proxmox VE implementation of the hypervisor contract.
//!
//! Authentication uses the ticket flow: `POST /access/ticket` yields a
//! `PVEAuthCookie` ticket for every request and a `CSRFPreventionToken`
//! that write requests must echo back.

use std::sync::Arc;

use async_trait::async_trait;
use ctf_range_core::VmId;
use reqwest::header::COOKIE;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

use crate::api::{HypervisorConnector, HypervisorSession};
use crate::config::HypervisorConfig;
use crate::error::{HypervisorError, Result};
use crate::types::{
    CloneSpec, CreateSpec, PowerState, ResourceClass, ResourceSummary, TaskId, TaskState,
    VmConfig, VmSizing,
};

const CSRF_HEADER: &str = "CSRFPreventionToken";

/// Every Proxmox response wraps its payload in `data`.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct Ticket {
    ticket: String,
    #[serde(rename = "CSRFPreventionToken")]
    csrf_token: String,
}

#[derive(Debug, Deserialize)]
struct VersionInfo {
    version: String,
}

#[derive(Debug, Deserialize)]
struct RawResource {
    #[serde(deserialize_with = "deserialize_vmid")]
    vmid: VmId,
    name: Option<String>,
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawStatus {
    status: String,
}

#[derive(Debug, Deserialize)]
struct RawTask {
    status: String,
    exitstatus: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
    errors: Option<Value>,
}

/// Containers report `vmid` as a string, VMs as a number.
fn deserialize_vmid<'de, D>(deserializer: D) -> std::result::Result<VmId, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u32),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(VmId::new(n)),
        Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

/// What a request is about, for error classification.
#[derive(Debug, Clone, Copy)]
enum Target {
    Node,
    Vm(VmId),
}

fn error_detail(status: StatusCode, body: &str) -> String {
    let parsed: Option<ErrorBody> = serde_json::from_str(body).ok();
    let message = parsed.and_then(|b| b.message.or_else(|| b.errors.map(|e| e.to_string())));
    match message {
        Some(message) => format!("{status}: {}", message.trim()),
        None if body.trim().is_empty() => status.to_string(),
        None => format!("{status}: {}", body.trim()),
    }
}

fn reports_missing(status: StatusCode, detail: &str) -> bool {
    status == StatusCode::NOT_FOUND
        || detail.contains("does not exist")
        || detail.contains("no such")
}

fn classify(status: StatusCode, body: &str, target: Target) -> HypervisorError {
    let detail = error_detail(status, body);
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return HypervisorError::Connection(format!("authentication rejected: {detail}"));
    }
    match target {
        Target::Vm(vmid) if detail.contains("already exists") => HypervisorError::Conflict(vmid),
        Target::Vm(vmid) if reports_missing(status, &detail) => HypervisorError::NotFound(vmid),
        _ => HypervisorError::NodeOperation(detail),
    }
}

fn number_field(map: &Map<String, Value>, key: &str) -> Option<u32> {
    match map.get(key)? {
        Value::Number(n) => n.as_u64().and_then(|v| u32::try_from(v).ok()),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn string_field(map: &Map<String, Value>, key: &str) -> Option<String> {
    map.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Extract the address from a cloud-init `ipconfig0` value such as
/// `ip=10.0.0.5/24,gw=10.0.0.1`. DHCP yields `None`.
fn parse_ipconfig(value: &str) -> Option<String> {
    value
        .split(',')
        .find_map(|part| part.strip_prefix("ip="))
        .filter(|ip| !ip.eq_ignore_ascii_case("dhcp"))
        .map(|ip| ip.split('/').next().unwrap_or(ip).to_string())
}

fn parse_config(map: &Map<String, Value>) -> VmConfig {
    VmConfig {
        name: string_field(map, "name"),
        memory_mb: number_field(map, "memory"),
        cores: number_field(map, "cores"),
        net0: string_field(map, "net0"),
        ip_address: string_field(map, "ipconfig0")
            .as_deref()
            .and_then(parse_ipconfig),
    }
}

/// Establishes ticket-authenticated Proxmox sessions.
pub struct ProxmoxConnector {
    config: HypervisorConfig,
    http: Client,
}

impl ProxmoxConnector {
    /// Create a connector for the configured host.
    ///
    /// # Errors
    ///
    /// Returns `HypervisorError::Config` if the HTTP client cannot be built.
    pub fn new(config: HypervisorConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(std::time::Duration::from_secs(5))
            .danger_accept_invalid_certs(!config.verify_ssl)
            .build()
            .map_err(|e| HypervisorError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { config, http })
    }
}

#[async_trait]
impl HypervisorConnector for ProxmoxConnector {
    async fn connect(&self) -> Result<Arc<dyn HypervisorSession>> {
        let base = self.config.api_base();
        let response = self
            .http
            .post(format!("{base}/access/ticket"))
            .form(&[
                ("username", self.config.user.as_str()),
                ("password", self.config.password.as_str()),
            ])
            .send()
            .await
            .map_err(|e| HypervisorError::Connection(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(HypervisorError::Connection(format!(
                "login rejected: {}",
                error_detail(status, &body)
            )));
        }

        let ticket: Envelope<Ticket> = response
            .json()
            .await
            .map_err(|e| HypervisorError::Connection(format!("malformed ticket: {e}")))?;

        tracing::info!(
            host = %self.config.host,
            user = %self.config.user,
            "Authenticated against Proxmox"
        );

        Ok(Arc::new(ProxmoxSession {
            http: self.http.clone(),
            base,
            ticket: ticket.data.ticket,
            csrf_token: ticket.data.csrf_token,
        }))
    }
}

/// A ticket-authenticated Proxmox API session.
pub struct ProxmoxSession {
    http: Client,
    base: String,
    ticket: String,
    csrf_token: String,
}

impl ProxmoxSession {
    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let is_write = method != Method::GET;
        let builder = self
            .http
            .request(method, format!("{}{path}", self.base))
            .header(COOKIE, format!("PVEAuthCookie={}", self.ticket));
        if is_write {
            builder.header(CSRF_HEADER, &self.csrf_token)
        } else {
            builder
        }
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder, target: Target) -> Result<T> {
        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify(status, &body, target));
        }
        let envelope: Envelope<T> = response
            .json()
            .await
            .map_err(|e| HypervisorError::InvalidResponse(e.to_string()))?;
        Ok(envelope.data)
    }

    async fn task(&self, builder: RequestBuilder, target: Target) -> Result<TaskId> {
        self.send::<String>(builder, target).await.map(TaskId)
    }
}

#[async_trait]
impl HypervisorSession for ProxmoxSession {
    async fn version(&self) -> Result<String> {
        let info: VersionInfo = self
            .send(self.request(Method::GET, "/version"), Target::Node)
            .await?;
        Ok(info.version)
    }

    async fn list_by_class(
        &self,
        node: &str,
        class: ResourceClass,
    ) -> Result<Vec<ResourceSummary>> {
        let path = format!("/nodes/{node}/{}", class.api_path());
        let raw: Vec<RawResource> = self.send(self.request(Method::GET, &path), Target::Node).await?;
        Ok(raw
            .into_iter()
            .map(|r| ResourceSummary {
                vmid: r.vmid,
                name: r.name,
                status: r.status.as_deref().map_or(PowerState::Unknown, PowerState::from_api),
                class,
            })
            .collect())
    }

    async fn create(&self, node: &str, spec: &CreateSpec) -> Result<TaskId> {
        let form = [
            ("vmid", spec.vmid.to_string()),
            ("name", spec.name.clone()),
            ("memory", spec.sizing.memory_mb.to_string()),
            ("cores", spec.sizing.cores.to_string()),
            ("net0", spec.net0.clone()),
            ("ide2", format!("{},media=cdrom", spec.install_media)),
            ("scsi0", format!("{}:{}", spec.storage, spec.sizing.disk_gb)),
            ("scsihw", "virtio-scsi-pci".to_string()),
            ("boot", "order=scsi0;ide2;net0".to_string()),
            ("agent", "1".to_string()),
        ];
        let path = format!("/nodes/{node}/qemu");
        self.task(self.request(Method::POST, &path).form(&form), Target::Vm(spec.vmid))
            .await
    }

    async fn clone_template(&self, node: &str, spec: &CloneSpec) -> Result<TaskId> {
        let mut form = vec![
            ("newid", spec.vmid.to_string()),
            ("name", spec.name.clone()),
            ("target", spec.target_node.clone()),
            ("full", if spec.full { "1" } else { "0" }.to_string()),
        ];
        if let Some(storage) = &spec.storage {
            form.push(("storage", storage.clone()));
        }
        let path = format!("/nodes/{node}/qemu/{}/clone", spec.template);
        self.task(self.request(Method::POST, &path).form(&form), Target::Vm(spec.vmid))
            .await
    }

    async fn configure(
        &self,
        node: &str,
        vmid: VmId,
        sizing: &VmSizing,
        net0: &str,
    ) -> Result<()> {
        let form = [
            ("cores", sizing.cores.to_string()),
            ("memory", sizing.memory_mb.to_string()),
            ("net0", net0.to_string()),
        ];
        let path = format!("/nodes/{node}/qemu/{vmid}/config");
        let _: Value = self
            .send(self.request(Method::POST, &path).form(&form), Target::Vm(vmid))
            .await?;
        Ok(())
    }

    async fn start(&self, node: &str, vmid: VmId) -> Result<TaskId> {
        let path = format!("/nodes/{node}/qemu/{vmid}/status/start");
        self.task(self.request(Method::POST, &path), Target::Vm(vmid)).await
    }

    async fn stop(&self, node: &str, vmid: VmId) -> Result<TaskId> {
        let path = format!("/nodes/{node}/qemu/{vmid}/status/stop");
        self.task(self.request(Method::POST, &path), Target::Vm(vmid)).await
    }

    async fn destroy(&self, node: &str, vmid: VmId) -> Result<TaskId> {
        let path = format!("/nodes/{node}/qemu/{vmid}?purge=1");
        self.task(self.request(Method::DELETE, &path), Target::Vm(vmid))
            .await
    }

    async fn get_config(&self, node: &str, vmid: VmId) -> Result<VmConfig> {
        let path = format!("/nodes/{node}/qemu/{vmid}/config");
        let map: Map<String, Value> = self
            .send(self.request(Method::GET, &path), Target::Vm(vmid))
            .await?;
        Ok(parse_config(&map))
    }

    async fn current_status(&self, node: &str, vmid: VmId) -> Result<PowerState> {
        let path = format!("/nodes/{node}/qemu/{vmid}/status/current");
        let raw: RawStatus = self
            .send(self.request(Method::GET, &path), Target::Vm(vmid))
            .await?;
        Ok(PowerState::from_api(&raw.status))
    }

    async fn task_status(&self, node: &str, task: &TaskId) -> Result<TaskState> {
        let path = format!("/nodes/{node}/tasks/{task}/status");
        let raw: RawTask = self.send(self.request(Method::GET, &path), Target::Node).await?;
        if raw.status == "running" {
            return Ok(TaskState::Running);
        }
        match raw.exitstatus.as_deref() {
            Some(exit) if exit == "OK" || exit.starts_with("WARNINGS") => Ok(TaskState::Succeeded),
            Some(exit) => Ok(TaskState::Failed(exit.to_string())),
            None => Ok(TaskState::Failed("task ended without exit status".to_string())),
        }
    }
}
