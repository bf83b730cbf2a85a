use anyhow::Context;
use colored::Colorize;
use vmspawn_cloud_openstack::OpenStackProvider;
use vmspawn_config::SpawnerConfig;

pub async fn handle(config: &SpawnerConfig) -> anyhow::Result<()> {
    println!("Checking cloud '{}'...", config.os_cloud_name.cyan());

    OpenStackProvider::new(config.os_cloud_name.clone())
        .check_auth()
        .await
        .context("openstack CLI check failed")?;

    println!("{}", "✓ openstack CLI is installed and authenticated".green());
    Ok(())
}
