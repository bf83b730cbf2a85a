//! OpenStack provider implementation

use crate::cli::OpenStackCli;
use async_trait::async_trait;
use std::sync::Arc;
use vmspawn_cloud::{
    CloudError, CloudResourceClient, FloatingIp, Instance, InstanceStatus, ServerSpec, offload,
};

/// OpenStack provider
///
/// Cheap to clone; all clones share one CLI wrapper.
#[derive(Debug, Clone)]
pub struct OpenStackProvider {
    cli: Arc<OpenStackCli>,
}

impl OpenStackProvider {
    /// `cloud` names an entry in `clouds.yaml`
    pub fn new(cloud: impl Into<String>) -> Self {
        Self::from_cli(OpenStackCli::new(cloud))
    }

    pub fn from_cli(cli: OpenStackCli) -> Self {
        Self { cli: Arc::new(cli) }
    }

    /// Verify the CLI is installed and authenticated against the cloud
    pub async fn check_auth(&self) -> vmspawn_cloud::Result<()> {
        let cli = Arc::clone(&self.cli);
        offload("check_auth", move || Ok(cli.check_available()?)).await
    }
}

#[async_trait]
impl CloudResourceClient for OpenStackProvider {
    fn name(&self) -> &str {
        "openstack"
    }

    async fn create_server(&self, spec: &ServerSpec) -> vmspawn_cloud::Result<Instance> {
        let cli = Arc::clone(&self.cli);
        let spec = spec.clone();
        offload("create_server", move || {
            let server = cli.create_server(&spec)?;
            tracing::info!("openstack accepted server {} ({})", server.name, server.id);
            Ok(server.into_instance(None))
        })
        .await
    }

    async fn get_server_by_id(&self, id: &str) -> vmspawn_cloud::Result<Option<Instance>> {
        let cli = Arc::clone(&self.cli);
        let id = id.to_string();
        offload("get_server_by_id", move || {
            let Some(server) = cli.show_server(&id)? else {
                return Ok(None);
            };

            // Floating IPs only matter once the server is up
            let public_v4 = if server.status() == InstanceStatus::Active {
                cli.server_floating_ips(&server)?
                    .into_iter()
                    .next()
                    .map(|ip| ip.floating_ip_address)
            } else {
                None
            };

            Ok(Some(server.into_instance(public_v4)))
        })
        .await
    }

    async fn allocate_floating_ip(&self, network: &str) -> vmspawn_cloud::Result<FloatingIp> {
        let cli = Arc::clone(&self.cli);
        let network = network.to_string();
        offload("allocate_floating_ip", move || {
            Ok(cli.available_floating_ip(&network)?.into())
        })
        .await
    }

    async fn attach_floating_ip(
        &self,
        server_id: &str,
        ip: &FloatingIp,
    ) -> vmspawn_cloud::Result<()> {
        let cli = Arc::clone(&self.cli);
        let server_id = server_id.to_string();
        let address = ip.address.clone();
        offload("attach_floating_ip", move || {
            match cli.add_floating_ip(&server_id, &address) {
                Ok(()) => Ok(()),
                Err(e) => match cli.show_server(&server_id)? {
                    None => Err(CloudError::ServerNotFound(server_id)),
                    Some(_) => Err(CloudError::from(e)),
                },
            }
        })
        .await
    }

    async fn delete_server(
        &self,
        id: &str,
        delete_ips: bool,
        delete_ip_retry: u32,
    ) -> vmspawn_cloud::Result<bool> {
        let cli = Arc::clone(&self.cli);
        let id = id.to_string();
        offload("delete_server", move || {
            let Some(server) = cli.show_server(&id)? else {
                tracing::debug!("server {} already gone, nothing to delete", id);
                return Ok(false);
            };

            if delete_ips {
                cli.release_floating_ips(&server, delete_ip_retry)?;
            }

            match cli.delete_server(&id) {
                Ok(()) => Ok(true),
                // Another caller may have removed it between show and delete
                Err(e) => match cli.show_server(&id)? {
                    None => Ok(false),
                    Some(_) => Err(CloudError::from(e)),
                },
            }
        })
        .await
    }
}
