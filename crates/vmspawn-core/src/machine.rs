//! Provisioning state machine
//!
//! Drives one server through creation, activation, address assignment and
//! readiness, and through the symmetric teardown path. Every wait is a
//! poll-and-sleep loop whose iterations end at an `.await`, so a caller can
//! abandon the future between any two provider calls.

use crate::error::{Result, SpawnError};
use crate::health::{Readiness, ReadinessProbe};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use vmspawn_cloud::{CloudResourceClient, Instance, InstanceStatus, ServerSpec};
use vmspawn_config::SpawnerConfig;

/// Stages of a provisioning attempt and of teardown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Creating,
    Activating,
    AddressPending,
    AddressReady,
    HealthPending,
    Ready,
    Failed,
    DeleteRequested,
    DeleteConfirming,
    Deleted,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Creating => write!(f, "creating"),
            Stage::Activating => write!(f, "activating"),
            Stage::AddressPending => write!(f, "address_pending"),
            Stage::AddressReady => write!(f, "address_ready"),
            Stage::HealthPending => write!(f, "health_pending"),
            Stage::Ready => write!(f, "ready"),
            Stage::Failed => write!(f, "failed"),
            Stage::DeleteRequested => write!(f, "delete_requested"),
            Stage::DeleteConfirming => write!(f, "delete_confirming"),
            Stage::Deleted => write!(f, "deleted"),
        }
    }
}

/// Cadence and pool settings for the state machine
#[derive(Debug, Clone)]
pub struct MachineSettings {
    pub poll_interval: Duration,
    pub floating_ip_network: String,
    pub delete_ip_retry: u32,
}

impl MachineSettings {
    pub fn new(floating_ip_network: impl Into<String>) -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            floating_ip_network: floating_ip_network.into(),
            delete_ip_retry: 5,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

impl From<&SpawnerConfig> for MachineSettings {
    fn from(config: &SpawnerConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            floating_ip_network: config.os_floating_ip_network.clone(),
            delete_ip_retry: config.delete_ip_retry,
        }
    }
}

/// Stateless driver; the caller owns the record of which server it tracks
pub struct ProvisioningStateMachine {
    client: Arc<dyn CloudResourceClient>,
    probe: Arc<dyn ReadinessProbe>,
    settings: MachineSettings,
}

impl ProvisioningStateMachine {
    pub fn new(
        client: Arc<dyn CloudResourceClient>,
        probe: Arc<dyn ReadinessProbe>,
        settings: MachineSettings,
    ) -> Self {
        Self {
            client,
            probe,
            settings,
        }
    }

    pub fn settings(&self) -> &MachineSettings {
        &self.settings
    }

    fn enter(&self, server: &str, stage: Stage) {
        info!(
            provider = self.client.name(),
            server = %server,
            %stage,
            "provisioning stage"
        );
    }

    /// CREATING: request the server. Never retried; any failure ends the attempt.
    pub async fn create(&self, spec: &ServerSpec) -> Result<Instance> {
        self.enter(&spec.name, Stage::Creating);
        self.client.create_server(spec).await.map_err(|e| {
            self.enter(&spec.name, Stage::Failed);
            SpawnError::Creation(e.to_string())
        })
    }

    /// ACTIVATING: poll until the server is ACTIVE.
    ///
    /// A server the provider cannot see yet, or a failed read, just means
    /// "poll again". ERROR ends the attempt with the provider's fault message.
    pub async fn wait_active(&self, server_id: &str) -> Result<Instance> {
        self.enter(server_id, Stage::Activating);
        loop {
            match self.client.get_server_by_id(server_id).await {
                Ok(Some(server)) => match server.status {
                    InstanceStatus::Active => {
                        info!("server {} is active", server_id);
                        return Ok(server);
                    }
                    InstanceStatus::Error => {
                        self.enter(server_id, Stage::Failed);
                        return Err(SpawnError::Creation(server.fault_message()));
                    }
                    ref status => debug!("server {} is {}", server_id, status),
                },
                Ok(None) => debug!("server {} not visible yet", server_id),
                Err(e) => warn!("failed to read server {}: {}", server_id, e),
            }
            tokio::time::sleep(self.settings.poll_interval).await;
        }
    }

    /// ADDRESS_PENDING → ADDRESS_READY: allocate and attach one floating IP,
    /// then poll until the server reports it.
    pub async fn assign_address(&self, server_id: &str) -> Result<String> {
        self.enter(server_id, Stage::AddressPending);

        let ip = self
            .client
            .allocate_floating_ip(&self.settings.floating_ip_network)
            .await
            .map_err(|e| {
                if e.is_address_exhausted() {
                    SpawnError::AddressExhausted(e.to_string())
                } else {
                    SpawnError::Provider(e)
                }
            })?;

        info!("attaching floating ip {} to server {}", ip.address, server_id);
        self.client.attach_floating_ip(server_id, &ip).await?;

        loop {
            match self.client.get_server_by_id(server_id).await {
                Ok(Some(Instance {
                    public_v4: Some(address),
                    ..
                })) => {
                    info!("floating ip {} is available", address);
                    self.enter(server_id, Stage::AddressReady);
                    return Ok(address);
                }
                Ok(Some(_)) => debug!("server {} has no public address yet", server_id),
                Ok(None) => warn!("server {} disappeared while attaching address", server_id),
                Err(e) => warn!("failed to read server {}: {}", server_id, e),
            }
            tokio::time::sleep(self.settings.poll_interval).await;
        }
    }

    /// HEALTH_PENDING: exactly one probe; the caller's own cadence retries
    pub async fn check_health(&self, server_id: &str, url: &str) -> Readiness {
        self.enter(server_id, Stage::HealthPending);
        let readiness = self.probe.probe(url).await;
        if readiness.is_ready() {
            self.enter(server_id, Stage::Ready);
        }
        readiness
    }

    /// One status read, for callers re-deriving state after the fact
    pub async fn observe(&self, server_id: &str) -> vmspawn_cloud::Result<Option<Instance>> {
        self.client.get_server_by_id(server_id).await
    }

    /// DELETE_REQUESTED → DELETE_CONFIRMING → DELETED.
    ///
    /// Returns once the provider no longer reports the server, or at once if
    /// there was nothing to delete. The delete call itself is not retried.
    pub async fn teardown(&self, server_id: &str) -> vmspawn_cloud::Result<()> {
        self.enter(server_id, Stage::DeleteRequested);

        let issued = self
            .client
            .delete_server(server_id, true, self.settings.delete_ip_retry)
            .await?;

        if issued {
            self.enter(server_id, Stage::DeleteConfirming);
            loop {
                match self.client.get_server_by_id(server_id).await {
                    Ok(None) => break,
                    Ok(Some(server)) => debug!("server {} still {}", server_id, server.status),
                    Err(e) => warn!("failed to read server {}: {}", server_id, e),
                }
                tokio::time::sleep(self.settings.poll_interval).await;
            }
        } else {
            debug!("nothing to delete for server {}", server_id);
        }

        self.enter(server_id, Stage::Deleted);
        Ok(())
    }
}
