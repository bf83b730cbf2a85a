use anyhow::Context;
use std::io::Write;
use vmspawn_config::SpawnerConfig;
use vmspawn_core::{BootstrapDataProvider, TemplateBootstrap, UserSession};

pub fn handle(config: &SpawnerConfig, session: &UserSession) -> anyhow::Result<()> {
    let bootstrap = match &config.userdata_template {
        Some(path) => TemplateBootstrap::from_file(path)?,
        None => TemplateBootstrap::builtin()?,
    }
    .with_env_prefix(config.env_prefix.clone());

    let user_data = bootstrap
        .render(session)
        .context("failed to render user data")?;

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&user_data)?;
    stdout.flush()?;
    Ok(())
}
