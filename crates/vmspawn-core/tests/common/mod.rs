#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use vmspawn_cloud::{
    CloudError, CloudResourceClient, Fault, FloatingIp, Instance, InstanceStatus, ServerSpec,
};
use vmspawn_core::{
    LifecycleController, MachineSettings, ProvisioningRecord, ProvisioningStateMachine, Readiness,
    ReadinessProbe, RecordSink, ServerTemplate, TemplateBootstrap, UserSession,
};

pub const FLOATING_IP: &str = "172.24.4.10";

/// How the fake cloud behaves for the servers it creates
#[derive(Debug, Clone, Default)]
pub struct Script {
    /// Reads returning BUILD before the server settles
    pub build_reads: u32,
    /// Settle in ERROR with this fault instead of ACTIVE
    pub fault: Option<Fault>,
    /// Reject `create_server`
    pub create_error: Option<String>,
    /// Floating IP pool is empty
    pub exhausted: bool,
    /// Reads after attach before the address shows up
    pub address_reads: u32,
    /// Reads after delete before the server disappears
    pub delete_reads: u32,
    /// Reject `delete_server`
    pub delete_error: Option<String>,
    /// Fail this many reads before answering normally
    pub read_errors: u32,
    /// Block the worker thread this long before answering `create_server`
    pub create_delay: Option<Duration>,
}

#[derive(Debug)]
struct FakeServer {
    instance: Instance,
    build_reads: u32,
    attached: bool,
    address_reads: u32,
    deleting: bool,
    delete_reads: u32,
}

#[derive(Debug, Default)]
struct State {
    script: Script,
    servers: HashMap<String, FakeServer>,
    events: Vec<String>,
    next_id: u32,
}

/// In-memory cloud that records every call it receives
#[derive(Debug, Default)]
pub struct FakeCloud {
    state: Mutex<State>,
}

impl FakeCloud {
    pub fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State {
                script,
                ..State::default()
            }),
        })
    }

    /// Pretend a server already exists, e.g. one restored from saved state
    pub fn insert_active(&self, id: &str, name: &str) {
        self.insert_active_at(id, name, FLOATING_IP);
    }

    pub fn insert_active_at(&self, id: &str, name: &str, address: &str) {
        let mut state = self.state.lock().unwrap();
        let delete_reads = state.script.delete_reads;
        state.servers.insert(
            id.to_string(),
            FakeServer {
                instance: Instance::new(id, name, InstanceStatus::Active).with_public_v4(address),
                build_reads: 0,
                attached: true,
                address_reads: 0,
                deleting: false,
                delete_reads,
            },
        );
    }

    pub fn record(&self, event: impl Into<String>) {
        self.state.lock().unwrap().events.push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.state.lock().unwrap().events.clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.events()
            .iter()
            .filter(|e| e.starts_with(prefix))
            .count()
    }

    pub fn position(&self, event: &str) -> Option<usize> {
        self.events().iter().position(|e| e == event)
    }

    pub fn exists(&self, id: &str) -> bool {
        self.state.lock().unwrap().servers.contains_key(id)
    }
}

#[async_trait]
impl CloudResourceClient for FakeCloud {
    fn name(&self) -> &str {
        "fake"
    }

    async fn create_server(&self, spec: &ServerSpec) -> vmspawn_cloud::Result<Instance> {
        let delay = self.state.lock().unwrap().script.create_delay;
        if let Some(delay) = delay {
            vmspawn_cloud::offload("create_server", move || {
                std::thread::sleep(delay);
                Ok(())
            })
            .await?;
        }

        let mut state = self.state.lock().unwrap();
        state.events.push(format!("create:{}", spec.name));

        if let Some(message) = state.script.create_error.clone() {
            return Err(CloudError::ApiError(message));
        }

        state.next_id += 1;
        let id = format!("srv-{}", state.next_id);
        let instance = Instance::new(&id, &spec.name, InstanceStatus::Pending);
        let server = FakeServer {
            instance: instance.clone(),
            build_reads: state.script.build_reads,
            attached: false,
            address_reads: state.script.address_reads,
            deleting: false,
            delete_reads: state.script.delete_reads,
        };
        state.servers.insert(id, server);
        Ok(instance)
    }

    async fn get_server_by_id(&self, id: &str) -> vmspawn_cloud::Result<Option<Instance>> {
        let mut state = self.state.lock().unwrap();
        state.events.push(format!("get:{}", id));

        if state.script.read_errors > 0 {
            state.script.read_errors -= 1;
            return Err(CloudError::ApiError("Service Unavailable".to_string()));
        }

        let fault = state.script.fault.clone();
        let Some(server) = state.servers.get_mut(id) else {
            return Ok(None);
        };

        if server.deleting {
            if server.delete_reads == 0 {
                state.servers.remove(id);
                return Ok(None);
            }
            server.delete_reads -= 1;
            return Ok(Some(server.instance.clone()));
        }

        if server.instance.status == InstanceStatus::Pending {
            if server.build_reads == 0 {
                match fault {
                    Some(fault) => {
                        server.instance.status = InstanceStatus::Error;
                        server.instance.fault = Some(fault);
                    }
                    None => server.instance.status = InstanceStatus::Active,
                }
            } else {
                server.build_reads -= 1;
            }
        }

        if server.attached && server.instance.public_v4.is_none() {
            if server.address_reads == 0 {
                server.instance.public_v4 = Some(FLOATING_IP.to_string());
            } else {
                server.address_reads -= 1;
            }
        }

        Ok(Some(server.instance.clone()))
    }

    async fn allocate_floating_ip(&self, network: &str) -> vmspawn_cloud::Result<FloatingIp> {
        let mut state = self.state.lock().unwrap();
        state.events.push(format!("allocate:{}", network));

        if state.script.exhausted {
            return Err(CloudError::AddressExhausted(network.to_string()));
        }
        Ok(FloatingIp::new("fip-1", FLOATING_IP))
    }

    async fn attach_floating_ip(
        &self,
        server_id: &str,
        ip: &FloatingIp,
    ) -> vmspawn_cloud::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.events.push(format!("attach:{}:{}", server_id, ip.address));

        match state.servers.get_mut(server_id) {
            Some(server) => {
                server.attached = true;
                Ok(())
            }
            None => Err(CloudError::ServerNotFound(server_id.to_string())),
        }
    }

    async fn delete_server(
        &self,
        id: &str,
        delete_ips: bool,
        _delete_ip_retry: u32,
    ) -> vmspawn_cloud::Result<bool> {
        let mut state = self.state.lock().unwrap();
        state.events.push(format!("delete:{}:{}", id, delete_ips));

        if let Some(message) = state.script.delete_error.clone() {
            return Err(CloudError::ApiError(message));
        }

        match state.servers.get_mut(id) {
            Some(server) if !server.deleting => {
                server.deleting = true;
                Ok(true)
            }
            Some(_) => Ok(true),
            None => Ok(false),
        }
    }
}

/// Probe answering with a fixed readiness and counting calls
#[derive(Debug)]
pub struct FakeProbe {
    readiness: Mutex<Readiness>,
    urls: Mutex<Vec<String>>,
}

impl FakeProbe {
    pub fn new(readiness: Readiness) -> Arc<Self> {
        Arc::new(Self {
            readiness: Mutex::new(readiness),
            urls: Mutex::new(Vec::new()),
        })
    }

    pub fn ready() -> Arc<Self> {
        Self::new(Readiness::Ready)
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReadinessProbe for FakeProbe {
    async fn probe(&self, url: &str) -> Readiness {
        self.urls.lock().unwrap().push(url.to_string());
        self.readiness.lock().unwrap().clone()
    }
}

/// Sink writing checkpoints into the cloud's event log, so ordering
/// against provider calls can be asserted
pub struct EventSink {
    pub cloud: Arc<FakeCloud>,
    pub fail: bool,
}

#[async_trait]
impl RecordSink for EventSink {
    async fn save(&self, record: &ProvisioningRecord) -> vmspawn_core::Result<()> {
        self.cloud.record(format!(
            "checkpoint:{}",
            record.server_id.as_deref().unwrap_or("")
        ));
        if self.fail {
            return Err(vmspawn_core::SpawnError::Checkpoint("disk full".to_string()));
        }
        Ok(())
    }
}

pub fn template() -> ServerTemplate {
    ServerTemplate {
        image: "ubuntu-22.04".to_string(),
        flavor: "m1.small".to_string(),
        network: "private".to_string(),
        key_name: Some("ops".to_string()),
        tags: vec!["jupyterhub".to_string()],
        name_prefix: "jhub".to_string(),
    }
}

pub fn controller_with_port(
    cloud: Arc<FakeCloud>,
    probe: Arc<dyn ReadinessProbe>,
    port: u16,
) -> LifecycleController {
    let settings = MachineSettings::new("public").with_poll_interval(Duration::from_secs(1));
    let machine = ProvisioningStateMachine::new(cloud, probe, settings);
    let session = UserSession::new("alice").with_env("JUPYTERHUB_API_TOKEN", "s3cr3t");

    LifecycleController::new(
        session,
        Arc::new(machine),
        Arc::new(TemplateBootstrap::builtin().unwrap()),
        template(),
        port,
    )
}

pub fn controller(cloud: Arc<FakeCloud>, probe: Arc<dyn ReadinessProbe>) -> LifecycleController {
    controller_with_port(cloud, probe, 8000)
}
