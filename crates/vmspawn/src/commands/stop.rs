use crate::utils;
use anyhow::Context;
use colored::Colorize;
use vmspawn_config::SpawnerConfig;
use vmspawn_core::{Spawner, UserSession};

pub async fn handle(config: &SpawnerConfig, session: UserSession) -> anyhow::Result<()> {
    let user = session.user.clone();
    let store = utils::open_store()?;
    let lock = store.acquire_lock(&user).await?;

    let mut spawner = utils::build_controller(config, session, store.clone())?;
    spawner.restore(&store.load(&user).await?);

    let Some(server_id) = spawner.record().server_id.clone() else {
        println!("{}", format!("ℹ No server tracked for '{}'", user).dimmed());
        lock.release().await?;
        return Ok(());
    };

    println!("{}", format!("Deleting server {}...", server_id).yellow());
    spawner
        .stop()
        .await
        .with_context(|| format!("failed to delete server {}", server_id))?;

    println!("{}", format!("✓ Server {} deleted", server_id).green().bold());
    lock.release().await?;
    Ok(())
}
