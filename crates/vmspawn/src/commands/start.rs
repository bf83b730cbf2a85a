use crate::utils;
use anyhow::Context;
use colored::Colorize;
use vmspawn_config::SpawnerConfig;
use vmspawn_core::{Spawner, UserSession};

pub async fn handle(config: &SpawnerConfig, session: UserSession) -> anyhow::Result<()> {
    let user = session.user.clone();
    println!("{}", format!("Starting notebook server for '{}'...", user).yellow());

    let store = utils::open_store()?;
    let lock = store.acquire_lock(&user).await?;

    let mut spawner = utils::build_controller(config, session, store.clone())?;
    spawner.restore(&store.load(&user).await?);
    if let Some(server_id) = &spawner.record().server_id {
        anyhow::bail!(
            "'{}' already has server {}; run `vmspawn stop --user {}` first",
            user,
            server_id,
            user
        );
    }

    let outcome = tokio::select! {
        result = spawner.start() => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };

    match outcome {
        Some(Ok(endpoint)) => {
            println!();
            println!("{}", "✓ Server started".green().bold());
            if let Some(name) = &spawner.record().server_name {
                println!("  server:   {}", name.cyan());
            }
            println!("  endpoint: {}", endpoint.cyan());
            println!(
                "{}",
                format!("  check readiness with `vmspawn poll --user {}`", user).dimmed()
            );
        }
        Some(Err(e)) => {
            if spawner.record().is_tracking() {
                eprintln!(
                    "{}",
                    format!(
                        "⚠ server is still tracked; run `vmspawn stop --user {}` to delete it",
                        user
                    )
                    .yellow()
                );
            }
            return Err(e).context("failed to start notebook server");
        }
        None => {
            // stop() waits for the teardown the dropped start() began
            tracing::info!(user = %user, "start interrupted");
            println!();
            println!("{}", "Interrupted, deleting server...".yellow());
            spawner
                .stop()
                .await
                .context("failed to clean up after interruption")?;
            println!("{}", "✓ Cleaned up".green());
        }
    }

    lock.release().await?;
    Ok(())
}
