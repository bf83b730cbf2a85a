//! File-backed session store
//!
//! Keeps one state file per session under `<root>/sessions/`:
//!
//! ```text
//! sessions/
//!   alice.json          {version, updated_at, state}
//!   alice.json.backup   previous contents
//!   alice.lock          advisory lock while a command drives the session
//! ```

use crate::error::{Result, SpawnError};
use crate::record::{ProvisioningRecord, RecordSink, StateMap};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;

const STATE_VERSION: u32 = 1;
const SESSIONS_DIR: &str = "sessions";
const STATE_EXT: &str = "json";
const BACKUP_EXT: &str = "json.backup";
const LOCK_EXT: &str = "lock";

/// Persisted state of one session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub version: u32,
    pub updated_at: DateTime<Utc>,
    /// The host-facing state blob, as produced by `Spawner::serialize`
    #[serde(default)]
    pub state: StateMap,
}

impl SessionState {
    pub fn new(state: StateMap) -> Self {
        Self {
            version: STATE_VERSION,
            updated_at: Utc::now(),
            state,
        }
    }
}

/// Reads and writes session state files
#[derive(Debug, Clone)]
pub struct SessionStore {
    root: PathBuf,
}

impl SessionStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn sessions_dir(&self) -> PathBuf {
        self.root.join(SESSIONS_DIR)
    }

    fn path(&self, session: &str, ext: &str) -> Result<PathBuf> {
        validate_session_name(session)?;
        Ok(self.sessions_dir().join(format!("{}.{}", session, ext)))
    }

    async fn ensure_dir(&self) -> Result<()> {
        let dir = self.sessions_dir();
        if !dir.exists() {
            fs::create_dir_all(&dir).await?;
            tracing::debug!("Created session directory: {}", dir.display());
        }
        Ok(())
    }

    /// Load a session's state blob; a session never saved has an empty one
    pub async fn load(&self, session: &str) -> Result<StateMap> {
        let path = self.path(session, STATE_EXT)?;
        if !path.exists() {
            tracing::debug!("No state for session {}", session);
            return Ok(StateMap::new());
        }

        let content = fs::read_to_string(&path).await?;
        let saved: SessionState = serde_json::from_str(&content)?;

        if saved.version > STATE_VERSION {
            return Err(SpawnError::State(format!(
                "{} has version {}, newer than supported version {}",
                path.display(),
                saved.version,
                STATE_VERSION
            )));
        }

        Ok(saved.state)
    }

    /// Save a session's state blob, keeping the previous file as a backup.
    /// An empty blob removes the session.
    pub async fn save(&self, session: &str, state: &StateMap) -> Result<()> {
        if state.is_empty() {
            return self.remove(session).await;
        }

        self.ensure_dir().await?;
        let path = self.path(session, STATE_EXT)?;
        let backup = self.path(session, BACKUP_EXT)?;

        if path.exists() {
            fs::copy(&path, &backup).await?;
        }

        let content = serde_json::to_string_pretty(&SessionState::new(state.clone()))?;
        fs::write(&path, content).await?;

        tracing::debug!("Saved state for session {}", session);
        Ok(())
    }

    /// Forget a session. The backup is kept.
    pub async fn remove(&self, session: &str) -> Result<()> {
        let path = self.path(session, STATE_EXT)?;
        if path.exists() {
            let backup = self.path(session, BACKUP_EXT)?;
            fs::rename(&path, &backup).await?;
            tracing::debug!("Removed state for session {}", session);
        }
        Ok(())
    }

    /// Names of all sessions with saved state, sorted
    pub async fn list_sessions(&self) -> Result<Vec<String>> {
        let dir = self.sessions_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let suffix = format!(".{}", STATE_EXT);
        let mut sessions = Vec::new();
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(session) = name.strip_suffix(&suffix) {
                sessions.push(session.to_string());
            }
        }
        sessions.sort();
        Ok(sessions)
    }

    /// Take the advisory lock for a session. Locks older than an hour are
    /// considered abandoned and replaced.
    pub async fn acquire_lock(&self, session: &str) -> Result<SessionLock> {
        self.ensure_dir().await?;
        let lock_path = self.path(session, LOCK_EXT)?;

        if lock_path.exists() {
            let content = fs::read_to_string(&lock_path).await?;
            let lock_info: LockInfo = serde_json::from_str(&content)?;

            let age = Utc::now().signed_duration_since(lock_info.acquired_at);
            if age.num_hours() < 1 {
                return Err(SpawnError::State(format!(
                    "session {} is locked by {} (pid {}) since {}",
                    session, lock_info.holder, lock_info.pid, lock_info.acquired_at
                )));
            }

            tracing::warn!("Removing stale lock on {} from {}", session, lock_info.holder);
        }

        let lock_info = LockInfo {
            holder: std::env::var("HOSTNAME")
                .or_else(|_| std::env::var("HOST"))
                .unwrap_or_else(|_| "unknown".to_string()),
            pid: std::process::id(),
            acquired_at: Utc::now(),
        };
        fs::write(&lock_path, serde_json::to_string_pretty(&lock_info)?).await?;

        tracing::debug!("Acquired lock on session {}", session);
        Ok(SessionLock {
            lock_path,
            released: false,
        })
    }
}

/// Session names become file names
fn validate_session_name(session: &str) -> Result<()> {
    let valid = !session.is_empty()
        && !session.starts_with('.')
        && session
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '@' | '-'));
    if valid {
        Ok(())
    } else {
        Err(SpawnError::State(format!("invalid session name: {:?}", session)))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LockInfo {
    holder: String,
    pid: u32,
    acquired_at: DateTime<Utc>,
}

/// Held lock; released on drop if not released explicitly
pub struct SessionLock {
    lock_path: PathBuf,
    released: bool,
}

impl SessionLock {
    pub async fn release(mut self) -> Result<()> {
        if !self.released {
            if self.lock_path.exists() {
                fs::remove_file(&self.lock_path).await?;
                tracing::debug!("Released {}", self.lock_path.display());
            }
            self.released = true;
        }
        Ok(())
    }
}

impl Drop for SessionLock {
    fn drop(&mut self) {
        if !self.released && self.lock_path.exists() {
            let _ = std::fs::remove_file(&self.lock_path);
        }
    }
}

/// Checkpoints a controller's record into the store
pub struct StoreSink {
    store: Arc<SessionStore>,
    session: String,
}

impl StoreSink {
    pub fn new(store: Arc<SessionStore>, session: impl Into<String>) -> Self {
        Self {
            store,
            session: session.into(),
        }
    }
}

#[async_trait]
impl RecordSink for StoreSink {
    async fn save(&self, record: &ProvisioningRecord) -> Result<()> {
        self.store
            .save(&self.session, &record.to_state())
            .await
            .map_err(|e| SpawnError::Checkpoint(e.to_string()))
    }
}
