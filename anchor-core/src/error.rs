//! Error types for the anchoring engine

use std::time::Duration;
use thiserror::Error;

/// Result type for anchoring operations
pub type Result<T> = std::result::Result<T, Error>;

/// Result type for ledger gateway calls
pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// Anchoring errors
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed input
    #[error("Validation error: {0}")]
    Validation(String),

    /// BizID already exists
    #[error("Duplicate biz_id: {0}")]
    Duplicate(String),

    /// Record not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Illegal lifecycle transition
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Commitment / encryption failure
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Ledger gateway failure
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// Store failure
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for `NotFound`, including a gateway-side miss
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_) | Error::Gateway(GatewayError::NotFound(_)))
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Error::NotFound("row not found".to_string()),
            other => Error::Persistence(other.to_string()),
        }
    }
}

impl From<csv::Error> for Error {
    fn from(err: csv::Error) -> Self {
        Error::Validation(format!("Malformed CSV: {}", err))
    }
}

/// Commitment generator errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Key is not 32 bytes
    #[error("Invalid key length: expected 32 bytes, got {0}")]
    InvalidKeyLength(usize),

    /// Ciphertext is not a whole number of blocks
    #[error("Invalid block size: ciphertext of {0} bytes is not block aligned")]
    InvalidBlockSize(usize),

    /// Trailing padding bytes are inconsistent
    #[error("Invalid padding")]
    PaddingError,

    /// Input is not valid hex, or plaintext is not UTF-8
    #[error("Invalid encoding: {0}")]
    InvalidEncoding(String),

    /// Decrypted amount does not match its recorded digest
    #[error("Amount integrity check failed")]
    IntegrityCheck,
}

/// Ledger gateway errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Ledger backend unreachable
    #[error("Ledger unavailable: {0}")]
    Unavailable(String),

    /// Submission did not reach consensus in time
    #[error("Consensus timeout after {0:?}")]
    ConsensusTimeout(Duration),

    /// Batch arrays differ in length
    #[error("Length mismatch: {biz_ids} biz_ids vs {data_hashes} data_hashes")]
    LengthMismatch {
        /// Number of business ids
        biz_ids: usize,
        /// Number of data hashes
        data_hashes: usize,
    },

    /// No record on the ledger
    #[error("Not found on ledger: {0}")]
    NotFound(String),

    /// Ledger refused the call
    #[error("Rejected by ledger: {0}")]
    Rejected(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_not_found_maps_to_not_found() {
        let err: Error = sqlx::Error::RowNotFound.into();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_gateway_not_found_is_not_found() {
        let err: Error = GatewayError::NotFound("TX001".to_string()).into();
        assert!(err.is_not_found());
        assert!(!Error::Validation("x".to_string()).is_not_found());
    }

    #[test]
    fn test_length_mismatch_message() {
        let err = GatewayError::LengthMismatch { biz_ids: 3, data_hashes: 2 };
        assert!(err.to_string().contains("3 biz_ids"));
    }
}
