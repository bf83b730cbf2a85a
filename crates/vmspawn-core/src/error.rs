//! Provisioning error types

use thiserror::Error;
use vmspawn_cloud::CloudError;

/// Errors surfaced by the provisioning core
#[derive(Error, Debug)]
pub enum SpawnError {
    /// The provider rejected the server or the server ended up in ERROR.
    /// The partially created server has already been deleted.
    #[error("Server creation failed: {0}")]
    Creation(String),

    /// Creation failed and deleting the leftover server failed too
    #[error("Server creation failed: {message} (cleanup also failed: {source})")]
    Cleanup {
        message: String,
        #[source]
        source: CloudError,
    },

    #[error("Floating IP allocation failed: {0}")]
    AddressExhausted(String),

    #[error("User data rendering failed: {0}")]
    Bootstrap(String),

    #[error("Provider error: {0}")]
    Provider(#[from] CloudError),

    #[error("Failed to persist provisioning record: {0}")]
    Checkpoint(String),

    #[error("State file error: {0}")]
    State(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SpawnError {
    /// Whether this error means the start attempt failed during creation
    pub fn is_creation_failure(&self) -> bool {
        matches!(
            self,
            SpawnError::Creation(_) | SpawnError::Cleanup { .. } | SpawnError::Bootstrap(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, SpawnError>;
