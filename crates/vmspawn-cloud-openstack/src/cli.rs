//! openstack CLI wrapper
//!
//! Wraps the `openstack` command line client. Every method blocks until the
//! child process exits; async callers go through [`crate::OpenStackProvider`],
//! which moves each call onto the blocking thread pool.

use crate::error::{OpenStackError, Result};
use serde::{Deserialize, Serialize};
use std::io::{ErrorKind, Write};
use std::process::{Command, Stdio};
use std::time::Duration;
use vmspawn_cloud::{Fault, FloatingIp, Instance, InstanceStatus, ServerSpec};

/// Server tags need compute API microversion 2.52 or later
const TAGS_MICROVERSION: &str = "2.52";

/// Pause between floating IP release attempts
const IP_RELEASE_DELAY: Duration = Duration::from_secs(1);

/// openstack CLI wrapper
#[derive(Debug, Clone)]
pub struct OpenStackCli {
    cloud: String,
    program: String,
}

impl OpenStackCli {
    /// `cloud` names an entry in `clouds.yaml`
    pub fn new(cloud: impl Into<String>) -> Self {
        Self {
            cloud: cloud.into(),
            program: "openstack".to_string(),
        }
    }

    /// Use a different executable instead of `openstack` from `PATH`
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn cloud(&self) -> &str {
        &self.cloud
    }

    /// Check that the CLI is installed and can talk to the configured cloud
    pub fn check_available(&self) -> Result<()> {
        self.run_command(&["token", "issue", "-f", "json"])?;
        Ok(())
    }

    /// Run an openstack command and return stdout
    fn run_command(&self, args: &[&str]) -> Result<String> {
        let mut cmd = Command::new(&self.program);
        cmd.arg("--os-cloud").arg(&self.cloud);
        cmd.args(args);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        tracing::debug!(
            "Running: {} --os-cloud {} {}",
            self.program,
            self.cloud,
            args.join(" ")
        );

        let output = cmd.output().map_err(|e| match e.kind() {
            ErrorKind::NotFound => OpenStackError::CliNotFound,
            _ => OpenStackError::IoError(e),
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OpenStackError::CommandFailed(stderr.trim().to_string()));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Create a server without waiting for it to become active
    pub fn create_server(&self, spec: &ServerSpec) -> Result<ServerInfo> {
        // --user-data only accepts a file path
        let mut user_data = tempfile::NamedTempFile::new()?;
        user_data.write_all(&spec.user_data)?;
        user_data.flush()?;
        let user_data_path = user_data.path().to_string_lossy().to_string();

        let mut args: Vec<&str> = Vec::new();
        if !spec.tags.is_empty() {
            args.push("--os-compute-api-version");
            args.push(TAGS_MICROVERSION);
        }
        args.extend([
            "server",
            "create",
            "--image",
            spec.image.as_str(),
            "--flavor",
            spec.flavor.as_str(),
            "--network",
            spec.network.as_str(),
            "--user-data",
            user_data_path.as_str(),
        ]);

        if let Some(ref key_name) = spec.key_name {
            args.push("--key-name");
            args.push(key_name.as_str());
        }

        for tag in &spec.tags {
            args.push("--tag");
            args.push(tag.as_str());
        }

        args.extend(["-f", "json", spec.name.as_str()]);

        let output = self.run_command(&args)?;
        let server: ServerInfo = serde_json::from_str(&output)?;
        Ok(server)
    }

    /// Show a server. Returns `None` when the provider no longer knows it.
    pub fn show_server(&self, id: &str) -> Result<Option<ServerInfo>> {
        match self.run_command(&["server", "show", "-f", "json", id]) {
            Ok(output) => Ok(Some(serde_json::from_str(&output)?)),
            Err(OpenStackError::CommandFailed(stderr)) if is_not_found(&stderr) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Delete a server (does not wait for it to disappear)
    pub fn delete_server(&self, id: &str) -> Result<()> {
        self.run_command(&["server", "delete", id])?;
        Ok(())
    }

    /// List floating IPs, optionally filtered by network and status
    pub fn list_floating_ips(
        &self,
        network: Option<&str>,
        status: Option<&str>,
    ) -> Result<Vec<FloatingIpInfo>> {
        let mut args = vec!["floating", "ip", "list", "-f", "json"];
        if let Some(network) = network {
            args.push("--network");
            args.push(network);
        }
        if let Some(status) = status {
            args.push("--status");
            args.push(status);
        }

        let output = self.run_command(&args)?;
        if output.trim().is_empty() || output.trim() == "[]" {
            return Ok(Vec::new());
        }

        let ips: Vec<FloatingIpInfo> = serde_json::from_str(&output)?;
        Ok(ips)
    }

    /// Create a floating IP in the given network
    pub fn create_floating_ip(&self, network: &str) -> Result<FloatingIpInfo> {
        match self.run_command(&["floating", "ip", "create", "-f", "json", network]) {
            Ok(output) => {
                let created: CreatedFloatingIp = serde_json::from_str(&output)?;
                Ok(created.into())
            }
            Err(OpenStackError::CommandFailed(stderr)) if is_exhausted(&stderr) => {
                tracing::warn!("floating ip pool {} exhausted: {}", network, stderr);
                Err(OpenStackError::NoFloatingIp(network.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    /// Delete a floating IP
    pub fn delete_floating_ip(&self, id: &str) -> Result<()> {
        self.run_command(&["floating", "ip", "delete", id])?;
        Ok(())
    }

    /// Reuse an unattached floating IP from `network`, or create a new one
    pub fn available_floating_ip(&self, network: &str) -> Result<FloatingIpInfo> {
        let unattached = self
            .list_floating_ips(Some(network), Some("DOWN"))?
            .into_iter()
            .find(|ip| ip.port.is_none() && ip.fixed_ip_address.is_none());

        match unattached {
            Some(ip) => {
                tracing::debug!("reusing floating ip {}", ip.floating_ip_address);
                Ok(ip)
            }
            None => self.create_floating_ip(network),
        }
    }

    /// Attach a floating IP address to a server
    pub fn add_floating_ip(&self, server_id: &str, address: &str) -> Result<()> {
        self.run_command(&["server", "add", "floating", "ip", server_id, address])?;
        Ok(())
    }

    /// Floating IPs of the project that are bound to one of the server's addresses
    pub fn server_floating_ips(&self, server: &ServerInfo) -> Result<Vec<FloatingIpInfo>> {
        let addresses = server.addresses();
        if addresses.is_empty() {
            return Ok(Vec::new());
        }

        Ok(self
            .list_floating_ips(None, None)?
            .into_iter()
            .filter(|ip| addresses.contains(&ip.floating_ip_address))
            .collect())
    }

    /// Release every floating IP attached to the server.
    ///
    /// Each release is attempted up to `retry` times (at least once).
    pub fn release_floating_ips(&self, server: &ServerInfo, retry: u32) -> Result<()> {
        for ip in self.server_floating_ips(server)? {
            let attempts = retry.max(1);
            let mut attempt = 1;
            loop {
                match self.delete_floating_ip(&ip.id) {
                    Ok(()) => {
                        tracing::info!(
                            "released floating ip {} from server {}",
                            ip.floating_ip_address,
                            server.id
                        );
                        break;
                    }
                    Err(e) if attempt < attempts => {
                        tracing::warn!(
                            "failed to release floating ip {} (attempt {}/{}): {}",
                            ip.floating_ip_address,
                            attempt,
                            attempts,
                            e
                        );
                        attempt += 1;
                        std::thread::sleep(IP_RELEASE_DELAY);
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(())
    }
}

fn is_not_found(stderr: &str) -> bool {
    stderr.contains("No server with a name or ID") || stderr.contains("could not be found")
}

fn is_exhausted(stderr: &str) -> bool {
    stderr.contains("No more IP addresses available")
        || stderr.contains("IpAddressGenerationFailure")
        || stderr.contains("Quota exceeded")
}

/// Server information from `openstack server show -f json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub status: Option<String>,

    /// Either `{"net": ["10.0.0.5", ...]}` or `"net=10.0.0.5, 172.24.4.10"`
    /// depending on the client version
    #[serde(default)]
    pub addresses: Option<serde_json::Value>,

    #[serde(default)]
    pub fault: Option<serde_json::Value>,
}

impl ServerInfo {
    /// All IP addresses on all networks
    pub fn addresses(&self) -> Vec<String> {
        match &self.addresses {
            Some(serde_json::Value::Object(networks)) => networks
                .values()
                .filter_map(|v| v.as_array())
                .flatten()
                .filter_map(|entry| match entry {
                    serde_json::Value::String(addr) => Some(addr.clone()),
                    serde_json::Value::Object(obj) => {
                        obj.get("addr").and_then(|a| a.as_str()).map(str::to_string)
                    }
                    _ => None,
                })
                .collect(),
            Some(serde_json::Value::String(raw)) => raw
                .split(';')
                .filter_map(|net| net.split_once('='))
                .flat_map(|(_, addrs)| addrs.split(','))
                .map(|addr| addr.trim().to_string())
                .filter(|addr| !addr.is_empty())
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn status(&self) -> InstanceStatus {
        InstanceStatus::from(self.status.as_deref().unwrap_or("UNKNOWN"))
    }

    pub fn fault(&self) -> Option<Fault> {
        match self.fault.as_ref()? {
            serde_json::Value::Object(obj) => Some(Fault {
                code: obj
                    .get("code")
                    .and_then(|c| c.as_u64())
                    .and_then(|c| u16::try_from(c).ok()),
                message: obj
                    .get("message")
                    .and_then(|m| m.as_str())
                    .unwrap_or_default()
                    .to_string(),
                details: obj
                    .get("details")
                    .and_then(|d| d.as_str())
                    .map(str::to_string),
            }),
            serde_json::Value::String(message) if !message.is_empty() => Some(Fault {
                code: None,
                message: message.clone(),
                details: None,
            }),
            _ => None,
        }
    }

    /// Convert into the provider-neutral snapshot
    pub fn into_instance(self, public_v4: Option<String>) -> Instance {
        let mut instance = Instance::new(self.id.clone(), self.name.clone(), self.status());
        instance.fault = self.fault();
        instance.public_v4 = public_v4;
        instance
    }
}

/// Row of `openstack floating ip list -f json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FloatingIpInfo {
    #[serde(rename = "ID")]
    pub id: String,

    #[serde(rename = "Floating IP Address")]
    pub floating_ip_address: String,

    #[serde(rename = "Fixed IP Address", default)]
    pub fixed_ip_address: Option<String>,

    #[serde(rename = "Port", default)]
    pub port: Option<String>,
}

impl From<FloatingIpInfo> for FloatingIp {
    fn from(info: FloatingIpInfo) -> Self {
        FloatingIp::new(info.id, info.floating_ip_address)
    }
}

/// Output of `openstack floating ip create -f json`
#[derive(Debug, Clone, Deserialize)]
struct CreatedFloatingIp {
    id: String,
    floating_ip_address: String,
    #[serde(default)]
    fixed_ip_address: Option<String>,
    #[serde(default)]
    port_id: Option<String>,
}

impl From<CreatedFloatingIp> for FloatingIpInfo {
    fn from(created: CreatedFloatingIp) -> Self {
        Self {
            id: created.id,
            floating_ip_address: created.floating_ip_address,
            fixed_ip_address: created.fixed_ip_address,
            port: created.port_id,
        }
    }
}
