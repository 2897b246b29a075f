//! Anchor Core
//!
//! Confidential commitment anchoring for inter-institution transactions.
//!
//! # Architecture
//!
//! - **Commitments**: `SHA-256(biz_id ++ amount ++ salt)` is the only value that
//!   leaves the institution; the amount itself is stored AES-256-CBC encrypted
//! - **Store**: SQL-backed transaction lifecycle with status-guarded transitions
//! - **Gateway**: one trait over every ledger backend, one adapter per backend
//! - **Orchestrator**: single and batch anchoring with per-item failure isolation
//!
//! # Invariants
//!
//! - BizID is globally unique
//! - DataHash is a pure function of (BizID, amount, salt)
//! - Salt is written once and never leaves the store
//! - Pending → Uploaded happens once, together with its chain receipt
//! - Uploaded → Matched/Mismatch happens only through the reconciliation store path

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod anchor;
pub mod commitment;
pub mod config;
pub mod error;
pub mod gateway;
pub mod import;
pub mod keys;
pub mod metrics;
pub mod service;
pub mod store;
pub mod types;

// Re-exports
pub use anchor::AnchorOrchestrator;
pub use config::Config;
pub use error::{CryptoError, Error, GatewayError, Result};
pub use gateway::LedgerGateway;
pub use keys::EncryptionKey;
pub use metrics::Metrics;
pub use service::TransactionService;
pub use store::Store;
pub use types::{
    BatchUploadResult, ChainReceipt, EventLog, EventType, Institution, InstitutionStatus,
    ReceiptStatus, Reconciliation, ReconciliationStatus, Transaction, TxStatus,
};
