//! OpenStack provider for vmspawn
//!
//! This crate implements the `CloudResourceClient` trait for OpenStack,
//! letting the provisioning core create, watch and delete notebook servers.
//!
//! # Requirements
//!
//! - `openstack` CLI (python-openstackclient) must be installed
//! - Authentication is managed through `clouds.yaml`; the provider only
//!   passes the cloud name along
//!
//! # Example
//!
//! ```ignore
//! use vmspawn_cloud::CloudResourceClient;
//! use vmspawn_cloud_openstack::OpenStackProvider;
//!
//! let provider = OpenStackProvider::new("mycloud");
//! provider.check_auth().await?;
//!
//! let server = provider.get_server_by_id("0b7d...").await?;
//! ```

pub mod cli;
pub mod error;
pub mod provider;

pub use cli::{FloatingIpInfo, OpenStackCli, ServerInfo};
pub use error::{OpenStackError, Result};
pub use provider::OpenStackProvider;
