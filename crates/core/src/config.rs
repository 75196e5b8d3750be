//! Presence engine configuration
//!
//! Configuration structures with serde defaults, loaded from YAML. Every
//! field is optional in the file; missing sections fall back to defaults.

use crate::error::{PresenceError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// ============================================================================
// Constants
// ============================================================================

/// Default reconciliation tick period (seconds)
pub const DEFAULT_REFRESH_SECS: u64 = 60;
/// Default time-to-live of a reported address (seconds)
pub const DEFAULT_ADDRESS_TTL_SECS: u64 = 300;
/// Default depth of the presence set worker inbox
pub const DEFAULT_INBOX_CAPACITY: usize = 1024;
/// Default argon2 memory cost in KiB
pub const DEFAULT_MEMORY_KIB: u32 = 19 * 1024;
/// Default argon2 iteration count
pub const DEFAULT_ITERATIONS: u32 = 2;
/// Default argon2 lane count
pub const DEFAULT_PARALLELISM: u32 = 1;
/// Default database file name
pub const DEFAULT_DATABASE_FILE: &str = "long-season.db";
/// Upper bound for the tick period and address lifetime (one year)
pub const MAX_PERIOD_SECS: u64 = 365 * 24 * 60 * 60;

const ENV_DATABASE_PATH: &str = "LS_DATABASE_PATH";
const ENV_REFRESH_SECS: &str = "LS_REFRESH_SECS";
const ENV_ADDRESS_TTL_SECS: &str = "LS_ADDRESS_TTL_SECS";

fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

fn default_longseason_dir() -> PathBuf {
    home_dir().join(".longseason")
}

// ============================================================================
// Main Config
// ============================================================================

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Presence tracking configuration
    #[serde(default)]
    pub presence: PresenceConfig,
    /// Address hashing work factor
    #[serde(default)]
    pub hashing: HashingConfig,
    /// Storage backend configuration
    #[serde(default)]
    pub storage: StorageConfig,
}

// ============================================================================
// Presence Config
// ============================================================================

/// Presence set and scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceConfig {
    /// Reconciliation tick period in seconds
    #[serde(default = "PresenceConfig::default_refresh_secs")]
    pub refresh_secs: u64,
    /// Lifetime of a reported address in seconds
    #[serde(default = "PresenceConfig::default_address_ttl_secs")]
    pub address_ttl_secs: u64,
    /// Presence set worker queue depth
    #[serde(default = "PresenceConfig::default_inbox_capacity")]
    pub inbox_capacity: usize,
}

impl PresenceConfig {
    fn default_refresh_secs() -> u64 {
        DEFAULT_REFRESH_SECS
    }
    fn default_address_ttl_secs() -> u64 {
        DEFAULT_ADDRESS_TTL_SECS
    }
    fn default_inbox_capacity() -> usize {
        DEFAULT_INBOX_CAPACITY
    }

    pub fn refresh_period(&self) -> Duration {
        Duration::from_secs(self.refresh_secs)
    }

    pub fn address_ttl(&self) -> Duration {
        Duration::from_secs(self.address_ttl_secs)
    }
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            refresh_secs: DEFAULT_REFRESH_SECS,
            address_ttl_secs: DEFAULT_ADDRESS_TTL_SECS,
            inbox_capacity: DEFAULT_INBOX_CAPACITY,
        }
    }
}

// ============================================================================
// Hashing Config
// ============================================================================

/// Argon2 parameters used when hashing a new device address
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HashingConfig {
    /// Memory cost in KiB
    #[serde(default = "HashingConfig::default_memory_kib")]
    pub memory_kib: u32,
    /// Number of passes
    #[serde(default = "HashingConfig::default_iterations")]
    pub iterations: u32,
    /// Degree of parallelism
    #[serde(default = "HashingConfig::default_parallelism")]
    pub parallelism: u32,
}

impl HashingConfig {
    fn default_memory_kib() -> u32 {
        DEFAULT_MEMORY_KIB
    }
    fn default_iterations() -> u32 {
        DEFAULT_ITERATIONS
    }
    fn default_parallelism() -> u32 {
        DEFAULT_PARALLELISM
    }

    /// Cheapest parameters argon2 accepts. Only meant for tests.
    pub fn minimal() -> Self {
        Self {
            memory_kib: argon2::Params::MIN_M_COST,
            iterations: argon2::Params::MIN_T_COST,
            parallelism: argon2::Params::MIN_P_COST,
        }
    }

    pub fn params(&self) -> Result<argon2::Params> {
        argon2::Params::new(self.memory_kib, self.iterations, self.parallelism, None)
            .map_err(|e| PresenceError::config_invalid("hashing", e.to_string()))
    }
}

impl Default for HashingConfig {
    fn default() -> Self {
        Self {
            memory_kib: DEFAULT_MEMORY_KIB,
            iterations: DEFAULT_ITERATIONS,
            parallelism: DEFAULT_PARALLELISM,
        }
    }
}

// ============================================================================
// Storage Config
// ============================================================================

/// Storage backend selector
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// SQLite database file
    #[default]
    Sqlite,
    /// Process-local, lost on exit
    Memory,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Backend: sqlite or memory
    #[serde(default)]
    pub backend: StorageBackend,
    /// Database path (sqlite only)
    #[serde(default = "StorageConfig::default_database_path")]
    pub database_path: PathBuf,
}

impl StorageConfig {
    fn default_database_path() -> PathBuf {
        default_longseason_dir().join(DEFAULT_DATABASE_FILE)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Sqlite,
            database_path: Self::default_database_path(),
        }
    }
}

// ============================================================================
// Config Loading and Validation
// ============================================================================

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from file or default locations
    pub fn load(path: Option<&str>) -> Result<Config> {
        let config_path = Self::resolve_config_path(path)?;
        Self::load_from(&config_path)
    }

    /// Load from the given path, or defaults if no config file exists
    /// anywhere. An explicit path that does not exist is still an error.
    pub fn load_or_default(path: Option<&str>) -> Result<Config> {
        match Self::resolve_config_path(path) {
            Ok(config_path) => Self::load_from(&config_path),
            Err(_) if path.is_none() => Ok(Config::default()),
            Err(e) => Err(e),
        }
    }

    pub fn load_from(path: &Path) -> Result<Config> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| PresenceError::config_parse_error(format!("Failed to read: {}", e)))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Config> {
        Ok(serde_yml::from_str(content)?)
    }

    fn resolve_config_path(path: Option<&str>) -> Result<PathBuf> {
        if let Some(p) = path {
            let p = PathBuf::from(p);
            if !p.exists() {
                return Err(PresenceError::config_not_found(p.display().to_string()));
            }
            return Ok(p);
        }

        let default_paths = [
            default_longseason_dir().join("config.yaml"),
            dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("longseason.yaml"),
            PathBuf::from("./longseason.yaml"),
        ];

        default_paths
            .into_iter()
            .find(|p| p.exists())
            .ok_or_else(|| {
                PresenceError::config_not_found(
                    "Config not found. Run `longseason config-sample` or create ~/.longseason/config.yaml",
                )
            })
    }

    /// Apply `LS_*` environment overrides on top of a loaded config
    pub fn apply_env(config: &mut Config) -> Result<()> {
        Self::apply_overrides(config, |key| std::env::var(key).ok())
    }

    fn apply_overrides(
        config: &mut Config,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<()> {
        if let Some(path) = lookup(ENV_DATABASE_PATH).filter(|v| !v.is_empty()) {
            config.storage.database_path = PathBuf::from(path);
        }
        if let Some(secs) = lookup(ENV_REFRESH_SECS).filter(|v| !v.is_empty()) {
            config.presence.refresh_secs = parse_secs(ENV_REFRESH_SECS, &secs)?;
        }
        if let Some(secs) = lookup(ENV_ADDRESS_TTL_SECS).filter(|v| !v.is_empty()) {
            config.presence.address_ttl_secs = parse_secs(ENV_ADDRESS_TTL_SECS, &secs)?;
        }
        Ok(())
    }
}

fn parse_secs(key: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse()
        .map_err(|_| PresenceError::config_invalid(key, format!("not a number of seconds: {}", value)))
}

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    pub fn validate(config: &Config) -> Result<()> {
        if config.presence.refresh_secs == 0 {
            return Err(PresenceError::config_invalid(
                "presence.refresh_secs",
                "Tick period must be at least one second",
            ));
        }

        if config.presence.refresh_secs > MAX_PERIOD_SECS {
            return Err(PresenceError::config_invalid(
                "presence.refresh_secs",
                format!("Tick period cannot exceed {} seconds", MAX_PERIOD_SECS),
            ));
        }

        if config.presence.address_ttl_secs > MAX_PERIOD_SECS {
            return Err(PresenceError::config_invalid(
                "presence.address_ttl_secs",
                format!("Address lifetime cannot exceed {} seconds", MAX_PERIOD_SECS),
            ));
        }

        if config.presence.inbox_capacity == 0 {
            return Err(PresenceError::config_invalid(
                "presence.inbox_capacity",
                "Inbox capacity must be positive",
            ));
        }

        config.hashing.params()?;

        if config.storage.backend == StorageBackend::Sqlite
            && config.storage.database_path.as_os_str().is_empty()
        {
            return Err(PresenceError::config_invalid(
                "storage.database_path",
                "Database path cannot be empty",
            ));
        }

        Ok(())
    }
}

impl Config {
    /// Load, apply environment overrides and validate
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut config = ConfigLoader::load_or_default(path)?;
        ConfigLoader::apply_env(&mut config)?;
        ConfigValidator::validate(&config)?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yml::to_string(self)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Generate a sample configuration
    pub fn sample() -> Self {
        Config {
            presence: PresenceConfig::default(),
            hashing: HashingConfig::default(),
            storage: StorageConfig {
                backend: StorageBackend::Sqlite,
                database_path: default_longseason_dir().join(DEFAULT_DATABASE_FILE),
            },
        }
    }
}
