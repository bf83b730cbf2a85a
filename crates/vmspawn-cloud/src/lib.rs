//! vmspawn cloud abstraction
//!
//! This crate defines the narrow slice of a cloud provider's compute API that
//! the vmspawn provisioning core relies on: server create/read/delete and
//! floating IP allocation/attachment.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │              vmspawn-core                        │
//! │   LifecycleController ─▶ ProvisioningStateMachine│
//! └─────────────────┬───────────────────────────────┘
//!                   │ Arc<dyn CloudResourceClient>
//! ┌─────────────────▼───────────────────────────────┐
//! │               vmspawn-cloud                      │
//! │  trait CloudResourceClient { ... }               │
//! │  offload() ── blocking calls on worker threads   │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//!           ┌───────▼────────┐
//!           │   openstack    │
//!           │   provider     │
//!           └────────────────┘
//! ```

pub mod blocking;
pub mod error;
pub mod provider;

// Re-exports
pub use blocking::offload;
pub use error::{CloudError, Result};
pub use provider::{CloudResourceClient, Fault, FloatingIp, Instance, InstanceStatus, ServerSpec};
