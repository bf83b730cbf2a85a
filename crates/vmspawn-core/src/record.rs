//! Durable provisioning record
//!
//! The record is the only state that survives a restart. Everything else
//! (status, address, readiness) is re-read from the provider.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Host-facing key/value state blob
pub type StateMap = serde_json::Map<String, serde_json::Value>;

pub const SERVER_ID_KEY: &str = "server_id";
pub const SERVER_NAME_KEY: &str = "server_name";

/// Identity of the server a session is tracking
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
}

impl ProvisioningRecord {
    pub fn new(server_id: impl Into<String>, server_name: impl Into<String>) -> Self {
        Self {
            server_id: Some(server_id.into()),
            server_name: Some(server_name.into()),
        }
    }

    /// Whether a server was requested and not yet confirmed deleted
    pub fn is_tracking(&self) -> bool {
        self.server_id.as_deref().is_some_and(|id| !id.is_empty())
    }

    pub fn clear(&mut self) {
        self.server_id = None;
        self.server_name = None;
    }

    /// Emit the persisted fields; empty unless a server id is present
    pub fn to_state(&self) -> StateMap {
        let mut state = StateMap::new();
        if let Some(id) = self.server_id.as_ref().filter(|id| !id.is_empty()) {
            state.insert(SERVER_ID_KEY.to_string(), id.clone().into());
            if let Some(name) = &self.server_name {
                state.insert(SERVER_NAME_KEY.to_string(), name.clone().into());
            }
        }
        state
    }

    /// Rebuild from a state blob. A blob without `server_id` yields an empty record.
    pub fn from_state(state: &StateMap) -> Self {
        let server_id = state
            .get(SERVER_ID_KEY)
            .and_then(|v| v.as_str())
            .filter(|id| !id.is_empty())
            .map(str::to_string);

        let server_name = server_id.as_ref().and_then(|_| {
            state
                .get(SERVER_NAME_KEY)
                .and_then(|v| v.as_str())
                .map(str::to_string)
        });

        Self {
            server_id,
            server_name,
        }
    }
}

/// Receives the record whenever it changes so it survives a crash
#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn save(&self, record: &ProvisioningRecord) -> Result<()>;
}
