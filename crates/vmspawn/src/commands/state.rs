use crate::utils;
use colored::Colorize;
use vmspawn_core::ProvisioningRecord;

/// Print one session's state as JSON, or a summary of all sessions
pub async fn handle(user: Option<&str>) -> anyhow::Result<()> {
    let store = utils::open_store()?;

    if let Some(user) = user {
        let state = store.load(user).await?;
        println!("{}", serde_json::to_string_pretty(&state)?);
        return Ok(());
    }

    let sessions = store.list_sessions().await?;
    if sessions.is_empty() {
        println!("{}", "No sessions".dimmed());
        return Ok(());
    }

    for session in sessions {
        let record = ProvisioningRecord::from_state(&store.load(&session).await?);
        println!(
            "{:<24} {:<40} {}",
            session.bold(),
            record.server_id.as_deref().unwrap_or("-"),
            record.server_name.as_deref().unwrap_or("-").cyan()
        );
    }

    Ok(())
}
