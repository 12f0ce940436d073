//! Error types for biolatch

use std::time::Duration;

use thiserror::Error;

/// Result type alias for unlock operations
pub type Result<T> = std::result::Result<T, UnlockError>;

/// Failures reported by the platform biometric ceremony
///
/// These are passed through to callers untouched; this crate never retries.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CeremonyError {
    /// User dismissed the prompt or it timed out on the platform side
    #[error("Biometric prompt was cancelled")]
    Cancelled,

    /// No credential is registered for this device
    #[error("No biometric credential registered")]
    NoCredential,

    /// Any other platform failure
    #[error("Platform error: {0}")]
    Platform(String),
}

/// Errors from the exclusive execution lock
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockError {
    /// The turn was not granted within the configured wait
    #[error("Timed out after {waited:?} waiting for '{label}'")]
    AcquireTimeout { label: String, waited: Duration },
}

/// Errors from key-value storage backends
#[derive(Debug, Error)]
pub enum StorageError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Backend refused the operation (disabled, quota, poisoned)
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Serialization(e.to_string())
    }
}

/// Errors surfaced by [`crate::UnlockFacade`] and [`crate::UnlockGate`]
#[derive(Debug, Error)]
pub enum UnlockError {
    /// Ceremony failure, unchanged
    #[error(transparent)]
    Ceremony(#[from] CeremonyError),

    /// Lock wait exceeded the opt-in timeout
    #[error(transparent)]
    Lock(#[from] LockError),
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
