//! Error types for the reconciliation loop

use thiserror::Error;

/// Result type for reconciliation operations
pub type Result<T> = std::result::Result<T, Error>;

/// Reconciliation errors
#[derive(Error, Debug)]
pub enum Error {
    /// Store, ledger or validation error from the core
    #[error("Core error: {0}")]
    Core(#[from] anchor_core::Error),

    /// Ledger event payload could not be interpreted
    #[error("Malformed event {event_id}: {reason}")]
    MalformedEvent {
        /// Event log row id
        event_id: i64,
        /// What was wrong
        reason: String,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<anchor_core::GatewayError> for Error {
    fn from(err: anchor_core::GatewayError) -> Self {
        Error::Core(err.into())
    }
}
