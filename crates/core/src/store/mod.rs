//! User/device storage seam
//!
//! The engine only reads devices and users and writes online flags back as
//! one batch. Everything else about persistence belongs to the backends.

pub mod memory;
pub mod sqlite;

use crate::config::{StorageBackend, StorageConfig};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Registered user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub nickname: String,
    pub online: bool,
}

/// Registered device. `hashed_address` is an argon2 PHC string, never the
/// raw address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    pub owner_id: String,
    pub tag: String,
    pub owner: String,
    #[serde(skip_serializing)]
    pub hashed_address: String,
}

/// Aggregate numbers written alongside the online flags
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounters {
    /// Users marked online by the last committed tick
    pub online_users: usize,
    /// Observed addresses that matched no registered device
    pub unknown_devices: usize,
    /// When the last tick committed; `None` before the first one
    pub updated_at: Option<DateTime<Utc>>,
}

/// What the reconciliation engine needs from storage
#[async_trait]
pub trait PresenceStore: Send + Sync {
    async fn all_devices(&self) -> Result<Vec<Device>>;

    async fn all_users(&self) -> Result<Vec<User>>;

    /// Write every user's online flag and the counters as one all-or-nothing
    /// batch. An unknown user id fails the whole batch.
    async fn commit_all(&self, users: Vec<User>, counters: StatusCounters) -> Result<()>;

    async fn status_counters(&self) -> Result<StatusCounters>;
}

/// Registration surface used by the operator CLI
#[async_trait]
pub trait Registry: PresenceStore {
    async fn add_user(&self, nickname: &str) -> Result<User>;

    async fn user(&self, id: &str) -> Result<User>;

    /// Removes the user's devices too
    async fn remove_user(&self, id: &str) -> Result<()>;

    async fn add_device(&self, owner_id: &str, tag: &str, hashed_address: &str) -> Result<Device>;

    async fn devices_of(&self, owner_id: &str) -> Result<Vec<Device>>;

    async fn remove_device(&self, id: &str) -> Result<()>;
}

/// Open the configured backend
pub fn open_store(config: &StorageConfig) -> Result<Arc<dyn Registry>> {
    match config.backend {
        StorageBackend::Sqlite => {
            let store = SqliteStore::open(&config.database_path)?;
            tracing::info!(path = %config.database_path.display(), "opened sqlite store");
            Ok(Arc::new(store))
        }
        StorageBackend::Memory => {
            tracing::info!("using in-memory store; state is lost on exit");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
