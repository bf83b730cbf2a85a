use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config directory not found")]
    ConfigDirNotFound,

    #[error(
        "Config file not found. Checked:\n\
        - VMSPAWN_CONFIG_PATH environment variable\n\
        - current directory: vmspawn.local.yaml, vmspawn.yaml, .vmspawn.yaml\n\
        - ~/.config/vmspawn/config.yaml"
    )]
    ConfigFileNotFound,

    #[error("Invalid config {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Missing required setting: {0}")]
    MissingField(&'static str),

    #[error("Invalid setting {field}: {message}")]
    InvalidValue {
        field: &'static str,
        message: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
