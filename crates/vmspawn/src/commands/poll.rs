use crate::utils;
use colored::Colorize;
use vmspawn_config::SpawnerConfig;
use vmspawn_core::{PollStatus, Spawner, UserSession};

pub async fn handle(config: &SpawnerConfig, session: UserSession) -> anyhow::Result<()> {
    let user = session.user.clone();
    let store = utils::open_store()?;

    let mut spawner = utils::build_controller(config, session, store.clone())?;
    spawner.restore(&store.load(&user).await?);

    let status = spawner.poll().await;
    let label = match &status {
        PollStatus::Running => status.to_string().green().bold(),
        PollStatus::Unconfirmed(_) => status.to_string().yellow(),
        PollStatus::Exited => status.to_string().dimmed(),
    };
    println!("{}: {}", user, label);

    if let Some(code) = status.exit_status() {
        println!("{}", format!("  exit status: {}", code).dimmed());
    }

    Ok(())
}
