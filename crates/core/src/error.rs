//! Presence engine error types
//!
//! This module defines a layered error hierarchy:
//! - `DomainError`: presence logic failures (config, addresses, records, worker)
//! - `InfraError`: infrastructure failures (IO, database, serialization, tasks)
//! - `PresenceError`: top-level error that wraps both categories

use std::fmt;

/// Domain-level errors representing presence logic failures
#[derive(Debug)]
pub enum DomainError {
    /// Configuration file not found at the specified path
    ConfigNotFound { path: String },
    /// Configuration validation failed
    ConfigInvalid { field: String, reason: String },
    /// Configuration parsing failed
    ConfigParse { source: String },
    /// Input is not a 6-octet hardware address
    InvalidAddress { input: String },
    /// Address hashing failed
    Hashing { reason: String },
    /// No user with the given id
    UnknownUser { id: String },
    /// No device with the given id
    UnknownDevice { id: String },
    /// Nickname already registered
    NicknameTaken { nickname: String },
    /// Presence set worker has shut down
    PresenceClosed,
}

impl fmt::Display for DomainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigNotFound { path } => write!(f, "Config not found: {}", path),
            Self::ConfigInvalid { field, reason } => {
                write!(f, "Config invalid [{}]: {}", field, reason)
            }
            Self::ConfigParse { source } => write!(f, "Config parse error: {}", source),
            Self::InvalidAddress { input } => {
                write!(f, "Invalid hardware address: {:?}", input)
            }
            Self::Hashing { reason } => write!(f, "Address hashing failed: {}", reason),
            Self::UnknownUser { id } => write!(f, "No user with id {}", id),
            Self::UnknownDevice { id } => write!(f, "No device with id {}", id),
            Self::NicknameTaken { nickname } => {
                write!(f, "Nickname already registered: {}", nickname)
            }
            Self::PresenceClosed => write!(f, "Presence set is shut down"),
        }
    }
}

impl std::error::Error for DomainError {}

/// Infrastructure-level errors representing external system failures
#[derive(Debug)]
pub enum InfraError {
    /// IO operation failed
    Io(std::io::Error),
    /// YAML serialization/deserialization failed
    Yaml(serde_yml::Error),
    /// Database operation failed
    Database(rusqlite::Error),
    /// Blocking task panicked or was cancelled
    Task { reason: String },
}

impl fmt::Display for InfraError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "IO error: {}", err),
            Self::Yaml(err) => write!(f, "YAML error: {}", err),
            Self::Database(err) => write!(f, "Database error: {}", err),
            Self::Task { reason } => write!(f, "Background task failed: {}", reason),
        }
    }
}

impl std::error::Error for InfraError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Yaml(e) => Some(e),
            Self::Database(e) => Some(e),
            Self::Task { .. } => None,
        }
    }
}

impl From<std::io::Error> for InfraError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<serde_yml::Error> for InfraError {
    fn from(err: serde_yml::Error) -> Self {
        Self::Yaml(err)
    }
}

impl From<rusqlite::Error> for InfraError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(err)
    }
}

/// Top-level error type for the presence engine
///
/// Wraps both domain and infrastructure errors so callers get a single
/// error type while still being able to match on the category.
#[derive(Debug)]
pub enum PresenceError {
    /// Presence logic error
    Domain(DomainError),
    /// Infrastructure/external system error
    Infra(InfraError),
    /// Generic error for edge cases
    Other(String),
}

impl fmt::Display for PresenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Domain(e) => write!(f, "{}", e),
            Self::Infra(e) => write!(f, "{}", e),
            Self::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for PresenceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Domain(e) => Some(e),
            Self::Infra(e) => Some(e),
            Self::Other(_) => None,
        }
    }
}

impl From<DomainError> for PresenceError {
    fn from(err: DomainError) -> Self {
        Self::Domain(err)
    }
}

impl From<InfraError> for PresenceError {
    fn from(err: InfraError) -> Self {
        Self::Infra(err)
    }
}

// Convenience conversions from infrastructure error sources
impl From<std::io::Error> for PresenceError {
    fn from(err: std::io::Error) -> Self {
        Self::Infra(InfraError::Io(err))
    }
}

impl From<serde_yml::Error> for PresenceError {
    fn from(err: serde_yml::Error) -> Self {
        Self::Infra(InfraError::Yaml(err))
    }
}

impl From<rusqlite::Error> for PresenceError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Infra(InfraError::Database(err))
    }
}

impl From<tokio::task::JoinError> for PresenceError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Infra(InfraError::Task {
            reason: err.to_string(),
        })
    }
}

impl PresenceError {
    pub fn config_not_found(path: impl Into<String>) -> Self {
        Self::Domain(DomainError::ConfigNotFound { path: path.into() })
    }

    pub fn config_parse_error(source: impl Into<String>) -> Self {
        Self::Domain(DomainError::ConfigParse {
            source: source.into(),
        })
    }

    pub fn config_invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Domain(DomainError::ConfigInvalid {
            field: field.into(),
            reason: reason.into(),
        })
    }

    pub fn invalid_address(input: impl Into<String>) -> Self {
        Self::Domain(DomainError::InvalidAddress {
            input: input.into(),
        })
    }

    pub fn unknown_user(id: impl Into<String>) -> Self {
        Self::Domain(DomainError::UnknownUser { id: id.into() })
    }

    pub fn unknown_device(id: impl Into<String>) -> Self {
        Self::Domain(DomainError::UnknownDevice { id: id.into() })
    }

    /// True for errors a store returns when a record is missing
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::Domain(DomainError::UnknownUser { .. } | DomainError::UnknownDevice { .. })
        )
    }
}

pub type Result<T> = std::result::Result<T, PresenceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_wraps_domain_message() {
        let err = PresenceError::config_invalid("presence.refresh_secs", "must be positive");
        assert_eq!(
            err.to_string(),
            "Config invalid [presence.refresh_secs]: must be positive"
        );
    }

    #[test]
    fn test_not_found_classification() {
        assert!(PresenceError::unknown_user("u1").is_not_found());
        assert!(PresenceError::unknown_device("d1").is_not_found());
        assert!(!PresenceError::Domain(DomainError::PresenceClosed).is_not_found());
    }

    #[test]
    fn test_io_error_has_source() {
        let err = PresenceError::from(std::io::Error::new(std::io::ErrorKind::Other, "disk"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
