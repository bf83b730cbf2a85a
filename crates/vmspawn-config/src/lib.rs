pub mod error;

pub use error::*;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable pointing directly at a config file
pub const CONFIG_PATH_ENV: &str = "VMSPAWN_CONFIG_PATH";

/// Spawner settings
///
/// The `os_*` values are passed through to the cloud client untouched. The
/// remaining values tune polling, naming and the readiness probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpawnerConfig {
    /// Cloud name from clouds.yaml
    pub os_cloud_name: String,

    /// SSH key giving operators direct access to the notebook server
    pub os_keypair_name: String,

    /// Allocate floating IPs from this network
    pub os_floating_ip_network: String,

    pub os_flavor_name: String,
    pub os_image_name: String,
    pub os_network_name: String,
    pub os_server_tags: Vec<String>,

    /// Upper bound for one readiness probe, in seconds
    pub health_check_timeout_secs: u64,

    /// Port the notebook server listens on inside the instance
    pub port: u16,

    /// Server names look like `<name_prefix>-<user>-<suffix>`
    pub name_prefix: String,

    /// Delay between provider polls while waiting, in milliseconds
    pub poll_interval_ms: u64,

    /// Attempts per floating IP release on delete
    pub delete_ip_retry: u32,

    /// User data template file; the built-in template is used when unset
    pub userdata_template: Option<PathBuf>,

    /// Only environment variables with this prefix reach the user data
    pub env_prefix: String,
}

impl Default for SpawnerConfig {
    fn default() -> Self {
        Self {
            os_cloud_name: String::new(),
            os_keypair_name: String::new(),
            os_floating_ip_network: String::new(),
            os_flavor_name: String::new(),
            os_image_name: String::new(),
            os_network_name: String::new(),
            os_server_tags: Vec::new(),
            health_check_timeout_secs: 10,
            port: 8000,
            name_prefix: "jhub".to_string(),
            poll_interval_ms: 1000,
            delete_ip_retry: 5,
            userdata_template: None,
            env_prefix: "JUPYTERHUB_".to_string(),
        }
    }
}

impl SpawnerConfig {
    /// Load and validate a YAML config file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SpawnerConfig =
            serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        config.validate()?;
        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Locate the config file with [`find_config_file`] and load it
    pub fn discover() -> Result<Self> {
        Self::load(&find_config_file()?)
    }

    /// Check that every required setting is present and sane
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("os_cloud_name", &self.os_cloud_name),
            ("os_floating_ip_network", &self.os_floating_ip_network),
            ("os_flavor_name", &self.os_flavor_name),
            ("os_image_name", &self.os_image_name),
            ("os_network_name", &self.os_network_name),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::MissingField(field));
            }
        }

        if self.health_check_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "health_check_timeout_secs",
                message: "must be greater than zero".to_string(),
            });
        }
        if self.port == 0 {
            return Err(ConfigError::InvalidValue {
                field: "port",
                message: "must be greater than zero".to_string(),
            });
        }
        if self.name_prefix.is_empty() {
            return Err(ConfigError::MissingField("name_prefix"));
        }

        Ok(())
    }

    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_secs(self.health_check_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Keypair name, treating an empty value as "no keypair"
    pub fn keypair(&self) -> Option<&str> {
        Some(self.os_keypair_name.as_str()).filter(|k| !k.is_empty())
    }
}

/// Directory holding the session state file (`~/.local/share/vmspawn`)
pub fn get_state_dir() -> Result<PathBuf> {
    let base = dirs::data_dir()
        .or_else(dirs::config_dir)
        .ok_or(ConfigError::ConfigDirNotFound)?;
    Ok(base.join("vmspawn"))
}

/// Find the config file.
///
/// Search order:
/// 1. `VMSPAWN_CONFIG_PATH`
/// 2. current directory: vmspawn.local.yaml, vmspawn.yaml, .vmspawn.yaml
/// 3. `~/.config/vmspawn/config.yaml`
pub fn find_config_file() -> Result<PathBuf> {
    if let Ok(config_path) = std::env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(config_path);
        if path.exists() {
            return Ok(path);
        }
        tracing::warn!(
            "{} points to {} which does not exist",
            CONFIG_PATH_ENV,
            path.display()
        );
    }

    let current_dir = std::env::current_dir()?;
    for filename in ["vmspawn.local.yaml", "vmspawn.yaml", ".vmspawn.yaml"] {
        let path = current_dir.join(filename);
        if path.exists() {
            return Ok(path);
        }
    }

    if let Some(config_dir) = dirs::config_dir() {
        let global_config = config_dir.join("vmspawn").join("config.yaml");
        if global_config.exists() {
            return Ok(global_config);
        }
    }

    Err(ConfigError::ConfigFileNotFound)
}
