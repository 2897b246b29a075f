//! Ledger gateway abstraction
//!
//! Every ledger backend is reached through [`LedgerGateway`]. Calls may block
//! on a network round trip; callers bound them with a timeout and cancel by
//! dropping the future.

pub mod chaincode;
pub mod contract;
pub mod memory;
pub mod rpc;

use crate::config::GatewayConfig;
use crate::error::GatewayResult;
use crate::types::EventType;
use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

pub use chaincode::ChaincodeGateway;
pub use contract::ContractGateway;
pub use memory::InMemoryLedger;

/// Ledger backend style
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayKind {
    /// Simulated in-process ledger
    Memory,
    /// Smart-contract calls
    Contract,
    /// Chaincode invoke/query
    Chaincode,
}

impl fmt::Display for GatewayKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayKind::Memory => write!(f, "memory"),
            GatewayKind::Contract => write!(f, "contract"),
            GatewayKind::Chaincode => write!(f, "chaincode"),
        }
    }
}

impl FromStr for GatewayKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(GatewayKind::Memory),
            "contract" => Ok(GatewayKind::Contract),
            "chaincode" => Ok(GatewayKind::Chaincode),
            other => Err(Error::Config(format!("Unknown gateway kind: {}", other))),
        }
    }
}

/// Receipt for a single ledger submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerReceipt {
    /// Ledger transaction hash
    pub tx_hash: String,
    /// Block the submission landed in
    pub block_height: u64,
    /// Hash of that block
    pub block_hash: String,
    /// Gas or compute units consumed
    pub resource_cost: u64,
}

/// Receipt for a batch submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReceipt {
    /// Ledger transaction hash
    pub tx_hash: String,
    /// Block the batch landed in
    pub block_height: u64,
    /// Entries the ledger accepted
    pub success_count: usize,
}

/// Commitment as recorded on the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitmentRecord {
    /// Business identifier
    pub biz_id: String,
    /// Anchored commitment
    pub data_hash: String,
    /// Submitting participant
    pub uploader: String,
    /// Ledger timestamp (unix seconds)
    pub timestamp: i64,
    /// Ledger-side status discriminant
    pub status: i32,
    /// Matched counterparty, empty until reconciled
    pub counterparty: String,
    /// Height of the reconciliation, 0 until reconciled
    pub match_height: u64,
    /// Ledger transaction that anchored the commitment, empty if not reported
    pub tx_hash: String,
    /// Height the commitment was anchored at, 0 if not reported
    pub block_height: u64,
}

/// Ledger-wide aggregate counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerStatistics {
    /// Commitments anchored
    pub total_transactions: u64,
    /// Commitments reconciled as matched
    pub total_matched: u64,
    /// Matched percentage as reported by the ledger
    pub match_rate: u64,
    /// Registered participants
    pub institution_count: u64,
}

/// Event observed on the ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEvent {
    /// Kind
    pub event_type: EventType,
    /// Business identifier (empty for institution events)
    pub biz_id: String,
    /// Ledger transaction hash
    pub tx_hash: String,
    /// Block height
    pub block_height: u64,
    /// Emitting contract / chaincode
    pub ledger_endpoint: String,
    /// Event payload
    pub data: serde_json::Value,
}

/// Distributed ledger capability
#[async_trait]
pub trait LedgerGateway: Send + Sync + fmt::Debug {
    /// Contract address or chaincode id recorded on receipts
    fn endpoint(&self) -> &str;

    /// Check connectivity, returning the current block height
    async fn connect(&self) -> GatewayResult<u64>;

    /// Anchor one commitment
    async fn upload_commitment(&self, biz_id: &str, data_hash: &str) -> GatewayResult<LedgerReceipt>;

    /// Anchor several commitments in one ledger transaction
    async fn batch_upload_commitments(
        &self,
        biz_ids: &[String],
        data_hashes: &[String],
    ) -> GatewayResult<BatchReceipt>;

    /// Read back an anchored commitment
    async fn query_commitment(&self, biz_id: &str) -> GatewayResult<CommitmentRecord>;

    /// Ledger-wide counts
    async fn query_statistics(&self) -> GatewayResult<LedgerStatistics>;

    /// Register a participant institution
    async fn register_participant(&self, name: &str, address: &str) -> GatewayResult<LedgerReceipt>;

    /// Name a participant was registered under, `NotFound` if unregistered
    async fn query_participant(&self, address: &str) -> GatewayResult<String>;

    /// Events at or above `from_height`, in height order
    async fn fetch_events(&self, from_height: u64) -> GatewayResult<Vec<LedgerEvent>>;
}

/// Build the gateway selected by `config.kind`
pub fn build(config: &GatewayConfig) -> Result<Arc<dyn LedgerGateway>> {
    let gateway: Arc<dyn LedgerGateway> = match config.kind {
        GatewayKind::Memory => Arc::new(InMemoryLedger::new(config.ledger_endpoint.clone())),
        GatewayKind::Contract => Arc::new(ContractGateway::new(config)?),
        GatewayKind::Chaincode => Arc::new(ChaincodeGateway::new(config)?),
    };

    tracing::info!(
        kind = %config.kind,
        endpoint = %gateway.endpoint(),
        "Ledger gateway configured"
    );

    Ok(gateway)
}

pub(crate) fn check_batch_lengths(biz_ids: &[String], data_hashes: &[String]) -> GatewayResult<()> {
    if biz_ids.len() != data_hashes.len() {
        return Err(crate::GatewayError::LengthMismatch {
            biz_ids: biz_ids.len(),
            data_hashes: data_hashes.len(),
        });
    }
    Ok(())
}
