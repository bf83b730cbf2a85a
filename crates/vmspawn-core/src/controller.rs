//! Lifecycle controller
//!
//! Exposes the host platform's lifecycle contract (`start`, `poll`, `stop`
//! and the state hooks) for one user session, on top of the provisioning
//! state machine.

use crate::bootstrap::{BootstrapDataProvider, TemplateBootstrap};
use crate::error::{Result, SpawnError};
use crate::health::{Readiness, ReadinessProbe, health_url};
use crate::machine::{MachineSettings, ProvisioningStateMachine};
use crate::record::{ProvisioningRecord, RecordSink, StateMap};
use crate::session::UserSession;
use async_trait::async_trait;
use rand::Rng;
use rand::distributions::Alphanumeric;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use vmspawn_cloud::{CloudResourceClient, Instance, ServerSpec};
use vmspawn_config::SpawnerConfig;

/// Lifecycle contract between the host platform and a spawner
#[async_trait]
pub trait Spawner: Send + Sync {
    /// Provision a server and return the endpoint it will serve on
    async fn start(&mut self) -> Result<String>;

    /// Check whether the provisioned server is up and serving
    async fn poll(&self) -> PollStatus;

    /// Delete the provisioned server, if any
    async fn stop(&mut self) -> Result<()>;

    /// State to persist on the host's behalf
    fn serialize(&self) -> StateMap;

    /// Load state persisted by [`Spawner::serialize`]. Not validated against the provider.
    fn restore(&mut self, state: &StateMap);

    /// Forget the tracked server
    fn reset(&mut self);
}

/// Result of [`Spawner::poll`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStatus {
    /// Active, addressed, and the health endpoint answered 200
    Running,
    /// A server is tracked but could not be confirmed as serving
    Unconfirmed(String),
    /// Nothing is tracked, or the tracked server no longer exists
    Exited,
}

impl PollStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, PollStatus::Running)
    }

    /// Host-facing exit status: `None` while running
    pub fn exit_status(&self) -> Option<i32> {
        match self {
            PollStatus::Running => None,
            PollStatus::Unconfirmed(_) => Some(1),
            PollStatus::Exited => Some(0),
        }
    }
}

impl std::fmt::Display for PollStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PollStatus::Running => write!(f, "running"),
            PollStatus::Unconfirmed(reason) => write!(f, "unconfirmed ({})", reason),
            PollStatus::Exited => write!(f, "exited"),
        }
    }
}

/// What every server of this controller is created from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerTemplate {
    pub image: String,
    pub flavor: String,
    pub network: String,
    pub key_name: Option<String>,
    pub tags: Vec<String>,
    pub name_prefix: String,
}

impl From<&SpawnerConfig> for ServerTemplate {
    fn from(config: &SpawnerConfig) -> Self {
        Self {
            image: config.os_image_name.clone(),
            flavor: config.os_flavor_name.clone(),
            network: config.os_network_name.clone(),
            key_name: config.keypair().map(str::to_string),
            tags: config.os_server_tags.clone(),
            name_prefix: config.name_prefix.clone(),
        }
    }
}

pub struct LifecycleController {
    session: UserSession,
    machine: Arc<ProvisioningStateMachine>,
    bootstrap: Arc<dyn BootstrapDataProvider>,
    template: ServerTemplate,
    port: u16,
    record: ProvisioningRecord,
    sink: Option<Arc<dyn RecordSink>>,
    abandoned: PendingTeardown,
}

impl LifecycleController {
    pub fn new(
        session: UserSession,
        machine: Arc<ProvisioningStateMachine>,
        bootstrap: Arc<dyn BootstrapDataProvider>,
        template: ServerTemplate,
        port: u16,
    ) -> Self {
        Self {
            session,
            machine,
            bootstrap,
            template,
            port,
            record: ProvisioningRecord::default(),
            sink: None,
            abandoned: PendingTeardown::default(),
        }
    }

    /// Wire up a controller from validated configuration
    pub fn from_config(
        config: &SpawnerConfig,
        session: UserSession,
        client: Arc<dyn CloudResourceClient>,
        probe: Arc<dyn ReadinessProbe>,
    ) -> Result<Self> {
        config
            .validate()
            .map_err(|e| SpawnError::Config(e.to_string()))?;

        let bootstrap = match &config.userdata_template {
            Some(path) => TemplateBootstrap::from_file(path)?,
            None => TemplateBootstrap::builtin()?,
        }
        .with_env_prefix(config.env_prefix.clone());

        let machine = ProvisioningStateMachine::new(client, probe, MachineSettings::from(config));

        Ok(Self::new(
            session,
            Arc::new(machine),
            Arc::new(bootstrap),
            ServerTemplate::from(config),
            config.port,
        ))
    }

    /// Checkpoint the record here whenever it changes
    pub fn with_record_sink(mut self, sink: Arc<dyn RecordSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn record(&self) -> &ProvisioningRecord {
        &self.record
    }

    pub fn session(&self) -> &UserSession {
        &self.session
    }

    /// A fresh `<prefix>-<user>-<8 alphanumerics>` name
    pub fn server_name(&self) -> String {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(8)
            .map(char::from)
            .collect();
        format!("{}-{}-{}", self.template.name_prefix, self.session.user, suffix)
    }

    fn tracked_id(&self) -> Option<String> {
        self.record
            .server_id
            .clone()
            .filter(|_| self.record.is_tracking())
    }

    fn log_settings(&self) {
        let settings = self.machine.settings();
        info!(
            user = %self.session.user,
            image = %self.template.image,
            flavor = %self.template.flavor,
            network = %self.template.network,
            key_name = ?self.template.key_name,
            tags = ?self.template.tags,
            floating_ip_network = %settings.floating_ip_network,
            port = self.port,
            "Starting server"
        );
    }

    async fn checkpoint(&self) -> Result<()> {
        match &self.sink {
            Some(sink) => sink.save(&self.record).await,
            None => Ok(()),
        }
    }

    async fn provision(&mut self, guard: &mut AbandonGuard) -> Result<String> {
        let user_data = self.bootstrap.render(&self.session)?;

        let spec = ServerSpec {
            name: self.server_name(),
            image: self.template.image.clone(),
            flavor: self.template.flavor.clone(),
            network: self.template.network.clone(),
            user_data,
            key_name: self.template.key_name.clone(),
            tags: self.template.tags.clone(),
        };

        let server = guard.create(spec).await?;
        info!("Requested server {} ({})", server.name, server.id);

        self.record = ProvisioningRecord::new(&server.id, &server.name);

        if let Err(e) = self.checkpoint().await {
            return Err(self.cleanup_after_failure(&server.id, e.to_string()).await);
        }

        if let Err(e) = self.machine.wait_active(&server.id).await {
            let message = match e {
                SpawnError::Creation(message) => message,
                other => other.to_string(),
            };
            return Err(self.cleanup_after_failure(&server.id, message).await);
        }

        let address = self.machine.assign_address(&server.id).await?;

        let url = health_url(&address, self.port, &self.session.base_path);
        if let Readiness::NotReady(reason) = self.machine.check_health(&server.id, &url).await {
            info!("{} not serving yet ({}), leaving it to poll", url, reason);
        }

        Ok(format!("http://{}:{}", address, self.port))
    }

    /// Wait for the teardown a dropped `start` left behind and clear the
    /// record once it is done. A failed teardown is retried here once.
    ///
    /// Returns false when no `start` was abandoned.
    async fn settle_abandoned(&mut self) -> Result<bool> {
        let pending = self
            .abandoned
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(task) = pending else {
            return Ok(false);
        };

        let abandoned = match task.await {
            Ok(abandoned) => abandoned,
            Err(e) => {
                warn!("Teardown of abandoned start did not finish: {}", e);
                return Ok(false);
            }
        };

        if let Err(e) = abandoned.result {
            let Some(server_id) = abandoned.server_id else {
                return Err(e.into());
            };
            warn!("Deleting abandoned server {} failed: {}; retrying", server_id, e);
            self.machine.teardown(&server_id).await?;
            info!("Server {} deleted", server_id);
        }

        self.reset();
        self.checkpoint().await?;
        Ok(true)
    }

    /// Delete a server whose creation failed and build the error to surface
    async fn cleanup_after_failure(&mut self, server_id: &str, message: String) -> SpawnError {
        warn!("Server {} failed: {}; deleting it", server_id, message);

        match self.machine.teardown(server_id).await {
            Ok(()) => {
                self.reset();
                if let Err(e) = self.checkpoint().await {
                    warn!("Failed to checkpoint cleared record: {}", e);
                }
                SpawnError::Creation(message)
            }
            Err(source) => {
                error!("Failed to delete server {}: {}", server_id, source);
                SpawnError::Cleanup { message, source }
            }
        }
    }
}

#[async_trait]
impl Spawner for LifecycleController {
    async fn start(&mut self) -> Result<String> {
        self.settle_abandoned().await?;
        self.log_settings();

        let mut guard = AbandonGuard::new(self.machine.clone(), self.abandoned.clone());
        let result = self.provision(&mut guard).await;
        guard.disarm();
        result
    }

    async fn poll(&self) -> PollStatus {
        let Some(server_id) = self.tracked_id() else {
            return PollStatus::Exited;
        };

        match self.machine.observe(&server_id).await {
            Ok(None) => {
                info!("Server {} no longer exists", server_id);
                PollStatus::Exited
            }
            Ok(Some(server)) if !server.is_active() => {
                PollStatus::Unconfirmed(format!("server is {}", server.status))
            }
            Ok(Some(Instance {
                public_v4: Some(address),
                ..
            })) => {
                let url = health_url(&address, self.port, &self.session.base_path);
                match self.machine.check_health(&server_id, &url).await {
                    Readiness::Ready => PollStatus::Running,
                    Readiness::NotReady(reason) => PollStatus::Unconfirmed(reason),
                }
            }
            Ok(Some(_)) => PollStatus::Unconfirmed("no public address".to_string()),
            Err(e) => {
                warn!("Failed to read server {}: {}", server_id, e);
                PollStatus::Unconfirmed(e.to_string())
            }
        }
    }

    async fn stop(&mut self) -> Result<()> {
        if self.settle_abandoned().await? {
            return Ok(());
        }

        let Some(server_id) = self.tracked_id() else {
            debug!("No server tracked for {}", self.session.user);
            return Ok(());
        };

        self.machine.teardown(&server_id).await?;
        info!("Server {} deleted", server_id);

        self.reset();
        self.checkpoint().await
    }

    fn serialize(&self) -> StateMap {
        self.record.to_state()
    }

    fn restore(&mut self, state: &StateMap) {
        self.record = ProvisioningRecord::from_state(state);
        if let Some(id) = &self.record.server_id {
            debug!("Restored server {} for {}", id, self.session.user);
        }
    }

    fn reset(&mut self) {
        self.record.clear();
    }
}

/// What the teardown of an abandoned `start` did
#[derive(Debug)]
struct AbandonedTeardown {
    /// Server that was deleted, or that deleting failed for
    server_id: Option<String>,
    result: vmspawn_cloud::Result<()>,
}

type PendingTeardown = Arc<Mutex<Option<JoinHandle<AbandonedTeardown>>>>;

/// Tears down the server of a `start` that is dropped before it returns.
///
/// The create request runs in a task of its own, so a server requested by a
/// dropped `start` is still seen and deleted. The teardown task is parked in
/// the controller, where the next `stop` or `start` waits for it.
struct AbandonGuard {
    machine: Arc<ProvisioningStateMachine>,
    pending: PendingTeardown,
    creating: Option<JoinHandle<Result<Instance>>>,
    server_id: Option<String>,
}

impl AbandonGuard {
    fn new(machine: Arc<ProvisioningStateMachine>, pending: PendingTeardown) -> Self {
        Self {
            machine,
            pending,
            creating: None,
            server_id: None,
        }
    }

    async fn create(&mut self, spec: ServerSpec) -> Result<Instance> {
        let machine = self.machine.clone();
        let task = self
            .creating
            .insert(tokio::spawn(async move { machine.create(&spec).await }));
        let joined = task.await;
        self.creating = None;

        let server = joined
            .map_err(|e| SpawnError::Creation(format!("create request did not finish: {}", e)))??;
        self.server_id = Some(server.id.clone());
        Ok(server)
    }

    fn disarm(&mut self) {
        self.creating = None;
        self.server_id = None;
    }
}

impl Drop for AbandonGuard {
    fn drop(&mut self) {
        let creating = self.creating.take();
        let server_id = self.server_id.take();
        if creating.is_none() && server_id.is_none() {
            return;
        }

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            error!(
                "Start abandoned outside a runtime, server {} left running",
                server_id.as_deref().unwrap_or("(being created)")
            );
            return;
        };

        let machine = self.machine.clone();
        let task = handle.spawn(async move {
            let server_id = match (server_id, creating) {
                (Some(id), _) => Some(id),
                (None, Some(create)) => create.await.ok().and_then(|r| r.ok()).map(|s| s.id),
                (None, None) => None,
            };
            let Some(server_id) = server_id else {
                return AbandonedTeardown {
                    server_id: None,
                    result: Ok(()),
                };
            };

            warn!("Start abandoned, deleting server {}", server_id);
            let result = machine.teardown(&server_id).await;
            if let Err(e) = &result {
                error!("Failed to delete abandoned server {}: {}", server_id, e);
            }
            AbandonedTeardown {
                server_id: Some(server_id),
                result,
            }
        });

        *self.pending.lock().unwrap_or_else(PoisonError::into_inner) = Some(task);
    }
}
