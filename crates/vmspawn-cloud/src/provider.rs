//! Cloud resource client trait definition

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// The compute and networking operations the provisioning core consumes.
///
/// Every call may take seconds. Implementations must not block the async
/// runtime while they wait; synchronous backends wrap each call in
/// [`crate::offload`].
#[async_trait]
pub trait CloudResourceClient: Send + Sync {
    /// Returns the provider name (e.g., "openstack")
    fn name(&self) -> &str;

    /// Request a new server. Returns as soon as the provider accepted the
    /// request; the server is usually still building.
    async fn create_server(&self, spec: &ServerSpec) -> Result<Instance>;

    /// Read a server. `None` means it no longer exists (or never did).
    async fn get_server_by_id(&self, id: &str) -> Result<Option<Instance>>;

    /// Obtain an unattached floating IP from the given network/pool.
    async fn allocate_floating_ip(&self, network: &str) -> Result<FloatingIp>;

    /// Attach a floating IP to a server
    async fn attach_floating_ip(&self, server_id: &str, ip: &FloatingIp) -> Result<()>;

    /// Delete a server, optionally releasing its floating IPs first.
    ///
    /// Returns `true` if a delete was issued and `false` if there was nothing
    /// to delete.
    async fn delete_server(&self, id: &str, delete_ips: bool, delete_ip_retry: u32)
    -> Result<bool>;
}

/// Parameters for creating a server
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerSpec {
    pub name: String,
    pub image: String,
    pub flavor: String,
    pub network: String,
    /// Opaque first-boot payload (cloud-init user data)
    pub user_data: Vec<u8>,
    pub key_name: Option<String>,
    pub tags: Vec<String>,
}

/// Snapshot of a server as reported by the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub id: String,
    pub name: String,
    pub status: InstanceStatus,
    /// Externally reachable IPv4 address, once a floating IP is attached
    pub public_v4: Option<String>,
    /// Fault payload attached by the provider when the server is in ERROR
    pub fault: Option<Fault>,
}

impl Instance {
    pub fn new(id: impl Into<String>, name: impl Into<String>, status: InstanceStatus) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            status,
            public_v4: None,
            fault: None,
        }
    }

    pub fn with_public_v4(mut self, address: impl Into<String>) -> Self {
        self.public_v4 = Some(address.into());
        self
    }

    pub fn with_fault(mut self, fault: Fault) -> Self {
        self.fault = Some(fault);
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == InstanceStatus::Active
    }

    /// Best human-readable explanation of why the server failed
    pub fn fault_message(&self) -> String {
        match &self.fault {
            Some(fault) if !fault.message.is_empty() => fault.message.clone(),
            Some(fault) => fault
                .details
                .clone()
                .filter(|d| !d.is_empty())
                .unwrap_or_else(|| format!("server {} entered status {}", self.id, self.status)),
            None => format!("server {} entered status {}", self.id, self.status),
        }
    }
}

/// Fault details reported for a failed server
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fault {
    pub code: Option<u16>,
    pub message: String,
    pub details: Option<String>,
}

/// Status of a server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    /// Server is still being built
    Pending,
    /// Server is running
    Active,
    /// Server failed
    Error,
    /// Any other provider status, kept verbatim
    Other(String),
}

impl From<&str> for InstanceStatus {
    fn from(raw: &str) -> Self {
        match raw.to_ascii_uppercase().as_str() {
            "BUILD" | "PENDING" => InstanceStatus::Pending,
            "ACTIVE" => InstanceStatus::Active,
            "ERROR" => InstanceStatus::Error,
            other => InstanceStatus::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstanceStatus::Pending => write!(f, "PENDING"),
            InstanceStatus::Active => write!(f, "ACTIVE"),
            InstanceStatus::Error => write!(f, "ERROR"),
            InstanceStatus::Other(raw) => write!(f, "{}", raw),
        }
    }
}

/// A floating IP address in a provider pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FloatingIp {
    pub id: String,
    pub address: String,
}

impl FloatingIp {
    pub fn new(id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
        }
    }
}
