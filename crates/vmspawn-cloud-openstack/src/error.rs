//! OpenStack provider error types

use thiserror::Error;
use vmspawn_cloud::CloudError;

#[derive(Error, Debug)]
pub enum OpenStackError {
    #[error("openstack CLI not found. Please install: pip install python-openstackclient")]
    CliNotFound,

    #[error("openstack command failed: {0}")]
    CommandFailed(String),

    #[error("No floating IP available in network {0}")]
    NoFloatingIp(String),

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<OpenStackError> for CloudError {
    fn from(err: OpenStackError) -> Self {
        match err {
            OpenStackError::CliNotFound => CloudError::InvalidConfig(err.to_string()),
            OpenStackError::CommandFailed(msg) => CloudError::CommandFailed(msg),
            OpenStackError::NoFloatingIp(network) => CloudError::AddressExhausted(network),
            OpenStackError::JsonError(e) => CloudError::Json(e),
            OpenStackError::IoError(e) => CloudError::Io(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, OpenStackError>;
