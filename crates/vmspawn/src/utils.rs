use crate::SessionArgs;
use anyhow::Context;
use std::path::Path;
use std::sync::Arc;
use vmspawn_cloud_openstack::OpenStackProvider;
use vmspawn_config::SpawnerConfig;
use vmspawn_core::{HttpProbe, LifecycleController, SessionStore, StoreSink, UserSession};

/// Load the config from `path`, or from the usual search locations
pub fn load_config(path: Option<&Path>) -> anyhow::Result<SpawnerConfig> {
    let config = match path {
        Some(path) => SpawnerConfig::load(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => SpawnerConfig::discover().context("failed to load config")?,
    };
    tracing::debug!(
        cloud = %config.os_cloud_name,
        image = %config.os_image_name,
        "loaded config"
    );
    Ok(config)
}

/// Open the session store under the state directory
pub fn open_store() -> anyhow::Result<Arc<SessionStore>> {
    let dir = vmspawn_config::get_state_dir().context("cannot locate state directory")?;
    tracing::debug!("session store at {}", dir.display());
    Ok(Arc::new(SessionStore::new(dir)))
}

/// Parse a `KEY=VALUE` argument
pub fn parse_env(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got `{}`", raw))?;
    if key.is_empty() {
        return Err(format!("empty variable name in `{}`", raw));
    }
    Ok((key.to_string(), value.to_string()))
}

pub fn session_for(user: &str, base_path: Option<&str>) -> UserSession {
    let session = UserSession::new(user);
    match base_path {
        Some(base_path) => session.with_base_path(base_path),
        None => session,
    }
}

/// Build the session from command line arguments. Explicit `--env` values
/// win over inherited ones.
pub fn session(config: &SpawnerConfig, args: &SessionArgs) -> UserSession {
    let mut session = session_for(&args.user, args.base_path.as_deref());

    if args.inherit_env {
        session = session.with_envs(
            std::env::vars().filter(|(key, _)| key.starts_with(&config.env_prefix)),
        );
    }

    session.with_envs(args.envs.iter().cloned())
}

/// Controller for `session` against the configured OpenStack cloud,
/// checkpointing into the session store
pub fn build_controller(
    config: &SpawnerConfig,
    session: UserSession,
    store: Arc<SessionStore>,
) -> anyhow::Result<LifecycleController> {
    let user = session.user.clone();
    let provider = Arc::new(OpenStackProvider::new(config.os_cloud_name.clone()));
    let probe = Arc::new(HttpProbe::new(config.health_check_timeout())?);

    let controller = LifecycleController::from_config(config, session, provider, probe)?
        .with_record_sink(Arc::new(StoreSink::new(store, user)));
    Ok(controller)
}
