//! User data rendering
//!
//! The bootstrap payload is injected at server creation and configures the
//! notebook server on first boot. Rendering uses Tera with a single context
//! variable, `env`, that only carries prefix-filtered session variables.

use crate::error::{Result, SpawnError};
use crate::session::UserSession;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tera::{Context, Tera};
use tracing::debug;

const TEMPLATE_NAME: &str = "userdata";

/// Built-in user data script
pub const DEFAULT_TEMPLATE: &str = r#"#!/bin/bash
# Generated by vmspawn
set -euo pipefail

cat > /etc/profile.d/jupyterhub-env.sh <<'VMSPAWN_ENV'
{% for key, value in env %}export {{ key }}={{ value | shell_quote }}
{% endfor %}VMSPAWN_ENV

systemctl daemon-reload
systemctl restart jupyterhub-singleuser.service
"#;

/// Produces the opaque first-boot payload for a session
pub trait BootstrapDataProvider: Send + Sync {
    fn render(&self, session: &UserSession) -> Result<Vec<u8>>;
}

/// Tera-backed user data renderer
pub struct TemplateBootstrap {
    tera: Tera,
    env_prefix: String,
}

impl TemplateBootstrap {
    /// Compile a template. Syntax errors surface here rather than at spawn time.
    pub fn new(template: &str) -> Result<Self> {
        let mut tera = Tera::default();
        tera.register_filter("shell_quote", shell_quote);
        tera.add_raw_template(TEMPLATE_NAME, template)
            .map_err(|e| SpawnError::Bootstrap(describe(&e)))?;

        Ok(Self {
            tera,
            env_prefix: "JUPYTERHUB_".to_string(),
        })
    }

    pub fn builtin() -> Result<Self> {
        Self::new(DEFAULT_TEMPLATE)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let template = std::fs::read_to_string(path).map_err(|e| {
            SpawnError::Bootstrap(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::new(&template)
    }

    /// Only variables starting with this prefix are exposed to the template
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// The filtered environment handed to the template
    pub fn template_env(&self, session: &UserSession) -> BTreeMap<String, String> {
        let mut env: BTreeMap<String, String> = session
            .env
            .iter()
            .filter(|(k, _)| k.starts_with(&self.env_prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        if let Some(api_url) = env.get("JUPYTERHUB_API_URL").cloned() {
            let activity_url = format!(
                "{}/users/{}/activity",
                api_url.trim_end_matches('/'),
                session.user
            );
            env.insert("JUPYTERHUB_ACTIVITY_URL".to_string(), activity_url);
        }

        env
    }
}

impl BootstrapDataProvider for TemplateBootstrap {
    fn render(&self, session: &UserSession) -> Result<Vec<u8>> {
        let env = self.template_env(session);
        debug!(user = %session.user, env_var_count = env.len(), "Rendering user data");

        let mut context = Context::new();
        context.insert("env", &env);

        self.tera
            .render(TEMPLATE_NAME, &context)
            .map(String::into_bytes)
            .map_err(|e| SpawnError::Bootstrap(describe(&e)))
    }
}

/// Quote a value for POSIX shells
fn shell_quote(
    value: &tera::Value,
    _args: &HashMap<String, tera::Value>,
) -> tera::Result<tera::Value> {
    let raw = match value {
        tera::Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    Ok(tera::Value::String(format!(
        "'{}'",
        raw.replace('\'', r"'\''")
    )))
}

/// Tera hides the useful part of its errors in the source chain
fn describe(err: &tera::Error) -> String {
    let mut message = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = std::error::Error::source(cause);
    }
    message
}
