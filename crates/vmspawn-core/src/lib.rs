//! vmspawn core
//!
//! Provisions one compute instance per user session and keeps track of it:
//!
//! ```text
//! LifecycleController (start / poll / stop / serialize / restore / reset)
//!   │
//!   ├── BootstrapDataProvider  user data for first boot
//!   ├── RecordSink             durable checkpoint of the provisioning record
//!   └── ProvisioningStateMachine
//!         ├── CloudResourceClient  (vmspawn-cloud)
//!         └── ReadinessProbe       HTTP check of the notebook server
//! ```

pub mod bootstrap;
pub mod controller;
pub mod error;
pub mod health;
pub mod machine;
pub mod record;
pub mod session;
pub mod store;

pub use bootstrap::{BootstrapDataProvider, DEFAULT_TEMPLATE, TemplateBootstrap};
pub use controller::{LifecycleController, PollStatus, ServerTemplate, Spawner};
pub use error::{Result, SpawnError};
pub use health::{HttpProbe, Readiness, ReadinessProbe, health_url};
pub use machine::{MachineSettings, ProvisioningStateMachine, Stage};
pub use record::{ProvisioningRecord, RecordSink, SERVER_ID_KEY, SERVER_NAME_KEY, StateMap};
pub use session::UserSession;
pub use store::{SessionLock, SessionState, SessionStore, StoreSink};
