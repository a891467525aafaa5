//! Error types for pairgate.

use thiserror::Error;

use crate::client::ClientError;

/// Main error type for pairgate operations.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Session with the given ID was not found.
    #[error("session not found: {0}")]
    NotFound(String),

    /// Session is already connected.
    #[error("session already connected: {0}")]
    AlreadyConnected(String),

    /// Session with the given name already exists.
    #[error("session already exists: {0}")]
    AlreadyExists(String),

    /// The registry is at its configured worker limit.
    #[error("maximum number of sessions ({max}) reached")]
    CapacityExceeded { max: usize },

    /// No pairing event arrived within the bound.
    #[error("pairing timeout")]
    PairingTimeout,

    /// Session has no connected worker.
    #[error("session not connected: {0}")]
    NotConnected(String),

    /// Request input failed validation.
    #[error("validation error: {0}")]
    Validation(String),

    /// Error surfaced by the external protocol client.
    #[error("external client failure: {0}")]
    ExternalFailure(#[from] ClientError),

    /// Durable store error.
    #[error("store error: {0}")]
    Store(String),

    /// Internal lock was poisoned.
    #[error("internal lock poisoned")]
    LockPoisoned,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<sqlx::Error> for GatewayError {
    fn from(e: sqlx::Error) -> Self {
        Self::Store(e.to_string())
    }
}

/// Convenience Result type for pairgate operations.
pub type Result<T> = std::result::Result<T, GatewayError>;
