//! Cloud provider error types

use thiserror::Error;

/// Cloud provider errors
#[derive(Error, Debug)]
pub enum CloudError {
    #[error("Server not found: {0}")]
    ServerNotFound(String),

    #[error("No floating IP available in pool {0}")]
    AddressExhausted(String),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Command execution failed: {0}")]
    CommandFailed(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Worker task failed during {operation}: {message}")]
    Worker { operation: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CloudError {
    /// Whether the failure came from exhausting the floating IP pool
    pub fn is_address_exhausted(&self) -> bool {
        matches!(self, CloudError::AddressExhausted(_))
    }
}

pub type Result<T> = std::result::Result<T, CloudError>;
