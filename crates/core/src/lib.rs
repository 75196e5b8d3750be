//! longseason_core
//! Presence detection and status reconciliation for the hackerspace
//! "who is present" tracker.

pub mod address;
pub mod config;
pub mod engine;
pub mod error;
pub mod matcher;
pub mod presence;
pub mod reconcile;
pub mod store;

// Re-export commonly used types
pub use address::{parse_address, HardwareAddress};
pub use config::{Config, ConfigLoader, ConfigValidator, HashingConfig, PresenceConfig, StorageBackend, StorageConfig};
pub use engine::{EngineHandle, PresenceEngine, ReportSummary};
pub use error::{DomainError, InfraError, PresenceError, Result};
pub use presence::PresenceSet;
pub use reconcile::{Reconciler, TickReport};
pub use store::{open_store, Device, MemoryStore, PresenceStore, Registry, SqliteStore, StatusCounters, User};
